//! Subscription scheduling: one publishing task per subscription.
//!
//! Each task sleeps until the earliest of its next publish deadline and the
//! next sample deadline of its items. On a publish tick the item queues are
//! drained in registration order, followed by the event queue, and the
//! batch is handed to the subscription's handler outside of any lock.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::address_space::{AddressSpace, Store};
use crate::config::EngineConfig;
use crate::error::{UaError, UaResult};
use crate::monitored_item::{DataChange, MonitoredItem, MonitoredItemCreated, MonitoringParameters};
use crate::node::event_notifier;
use crate::subscription::{
    Event, EventFilter, EventNotification, MonitoredItemId, SubscriptionHandler, SubscriptionId,
    SubscriptionState, SubscriptionStats,
};
use crate::types::ids::{object_ids, type_ids};
use crate::types::{AttributeId, NodeId, ns0};

#[derive(Debug)]
struct EventItem {
    id: MonitoredItemId,
    client_handle: u32,
    notifier: NodeId,
    filter: EventFilter,
}

impl EventItem {
    /// The Server object hears every event; other notifiers hear events
    /// raised on themselves or anywhere below them.
    fn receives(&self, store: &Store, event: &Event) -> bool {
        let in_scope = self.notifier == ns0(object_ids::SERVER)
            || event.source_node == self.notifier
            || store.is_descendant(&event.source_node, &self.notifier);
        in_scope && self.filter.accepts(store, event)
    }
}

struct Batch {
    data: Vec<DataChange>,
    events: Vec<EventNotification>,
    first_publish: bool,
}

#[derive(Debug)]
struct SubscriptionData {
    publishing_interval: Duration,
    publishing_enabled: bool,
    lifecycle: SubscriptionState,
    items: Vec<MonitoredItem>,
    event_items: Vec<EventItem>,
    events: VecDeque<EventNotification>,
    max_events: usize,
    next_publish: Instant,
    stats: SubscriptionStats,
}

impl SubscriptionData {
    fn item_count(&self) -> usize {
        self.items.len() + self.event_items.len()
    }

    fn sample_due(&mut self, space: &AddressSpace, now: Instant) {
        for item in &mut self.items {
            if item.next_sample <= now {
                self.stats.dropped += item.sample(space);
                item.next_sample = next_deadline(item.next_sample, item.sampling_interval, now);
            }
        }
    }

    fn publish(&mut self) -> Option<Batch> {
        if !self.publishing_enabled {
            return None;
        }
        let mut data = Vec::new();
        for item in &mut self.items {
            item.drain_into(&mut data);
        }
        // Items whose node is gone have now delivered their last notification.
        self.items.retain(|item| !item.is_terminated());
        let events = self.events.drain(..).collect();

        self.stats.publish_count += 1;
        let first_publish = self.lifecycle == SubscriptionState::Created;
        if first_publish {
            self.lifecycle = SubscriptionState::Publishing;
        }
        Some(Batch {
            data,
            events,
            first_publish,
        })
    }

    fn next_wakeup(&self) -> Instant {
        self.items
            .iter()
            .filter(|item| !item.is_terminated())
            .map(|item| item.next_sample)
            .fold(self.next_publish, Instant::min)
    }

    fn push_event(&mut self, notification: EventNotification) {
        if self.events.len() >= self.max_events {
            self.events.pop_front();
            self.stats.dropped += 1;
        }
        self.events.push_back(notification);
    }
}

/// Next periodic deadline; skips missed periods instead of bursting.
fn next_deadline(previous: Instant, interval: Duration, now: Instant) -> Instant {
    let next = previous + interval;
    if next <= now { now + interval } else { next }
}

struct Shared {
    id: SubscriptionId,
    handler: Arc<dyn SubscriptionHandler>,
    data: Mutex<SubscriptionData>,
    /// Wakes the task early for deletion or interval changes.
    wake: Notify,
    /// Signalled to every pending handler call when deletion starts.
    deleted: Notify,
    deleting: AtomicBool,
    delivery_grace: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SubscriptionData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_deleting(&self) -> bool {
        self.deleting.load(Ordering::Acquire)
    }
}

struct SubscriptionEntry {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

/// Owns every subscription and its publishing task.
pub struct SubscriptionEngine {
    space: Arc<AddressSpace>,
    config: EngineConfig,
    subscriptions: Mutex<HashMap<SubscriptionId, SubscriptionEntry>>,
    next_subscription_id: AtomicU32,
    next_item_id: AtomicU32,
}

impl std::fmt::Debug for SubscriptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEngine")
            .field("subscriptions", &self.subscription_ids())
            .finish_non_exhaustive()
    }
}

impl SubscriptionEngine {
    pub fn new(space: Arc<AddressSpace>, config: EngineConfig) -> Self {
        Self {
            space,
            config,
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription_id: AtomicU32::new(1),
            next_item_id: AtomicU32::new(1),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<SubscriptionId, SubscriptionEntry>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn shared(&self, id: SubscriptionId) -> UaResult<Arc<Shared>> {
        self.registry()
            .get(&id)
            .map(|entry| Arc::clone(&entry.shared))
            .ok_or(UaError::SubscriptionNotFound(id))
    }

    /// Creates a subscription and starts its publishing task on the current
    /// tokio runtime.
    ///
    /// A zero interval selects the configured default.
    pub fn create_subscription(
        &self,
        publishing_interval: Duration,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> UaResult<SubscriptionId> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| UaError::Internal(format!("no tokio runtime for publishing task: {e}")))?;

        let mut registry = self.registry();
        if registry.len() >= self.config.max_subscriptions {
            return Err(UaError::TooManySubscriptions(self.config.max_subscriptions));
        }

        let id = SubscriptionId(self.next_subscription_id.fetch_add(1, Ordering::Relaxed));
        let interval = self.config.revise_publishing_interval(publishing_interval);
        let shared = Arc::new(Shared {
            id,
            handler,
            data: Mutex::new(SubscriptionData {
                publishing_interval: interval,
                publishing_enabled: true,
                lifecycle: SubscriptionState::Created,
                items: Vec::new(),
                event_items: Vec::new(),
                events: VecDeque::new(),
                max_events: self.config.max_queue_size.max(1),
                next_publish: Instant::now() + interval,
                stats: SubscriptionStats::default(),
            }),
            wake: Notify::new(),
            deleted: Notify::new(),
            deleting: AtomicBool::new(false),
            delivery_grace: self.config.delivery_grace,
        });
        let task = runtime.spawn(run(Arc::clone(&shared), Arc::clone(&self.space)));
        registry.insert(id, SubscriptionEntry { shared, task });

        tracing::debug!(subscription = %id, interval_ms = interval.as_millis(), "subscription created");
        Ok(id)
    }

    /// Changes the publishing interval; returns the revised value.
    pub fn modify_subscription(
        &self,
        id: SubscriptionId,
        publishing_interval: Duration,
    ) -> UaResult<Duration> {
        let shared = self.shared(id)?;
        let interval = self.config.revise_publishing_interval(publishing_interval);
        {
            let mut data = shared.lock();
            data.publishing_interval = interval;
            data.next_publish = Instant::now() + interval;
        }
        shared.wake.notify_one();
        tracing::debug!(subscription = %id, interval_ms = interval.as_millis(), "subscription modified");
        Ok(interval)
    }

    /// Disabled subscriptions keep sampling but hold their notifications.
    pub fn set_publishing_mode(&self, id: SubscriptionId, enabled: bool) -> UaResult<()> {
        self.shared(id)?.lock().publishing_enabled = enabled;
        tracing::debug!(subscription = %id, enabled, "publishing mode set");
        Ok(())
    }

    /// Deletes a subscription.
    ///
    /// Notifications of the current batch not yet handed to the handler are
    /// dropped. A handler call already in progress gets
    /// [`EngineConfig::delivery_grace`] to finish and is abandoned after
    /// that. Once this returns the handler receives nothing more.
    pub async fn delete_subscription(&self, id: SubscriptionId) -> UaResult<()> {
        let entry = self
            .registry()
            .remove(&id)
            .ok_or(UaError::SubscriptionNotFound(id))?;
        stop(&entry.shared);
        entry.task.await?;
        tracing::debug!(subscription = %id, "subscription deleted");
        Ok(())
    }

    /// Deletes every subscription.
    pub async fn shutdown(&self) {
        let entries: Vec<_> = self.registry().drain().collect();
        for (_, entry) in &entries {
            stop(&entry.shared);
        }
        for (id, entry) in entries {
            if let Err(e) = entry.task.await {
                tracing::warn!(subscription = %id, error = %e, "publishing task failed");
            }
        }
    }

    /// Monitors one attribute of a node. The current value is queued
    /// immediately and delivered on the next publish.
    pub fn subscribe_data_change(
        &self,
        id: SubscriptionId,
        node_id: &NodeId,
        attribute: AttributeId,
        params: MonitoringParameters,
    ) -> UaResult<MonitoredItemCreated> {
        match self.space.read_value_with_epoch(node_id, attribute) {
            Err(e @ (UaError::NotFound(_) | UaError::AttributeNotSupported { .. })) => {
                return Err(e);
            }
            // Other failures are reported through the item's status.
            _ => {}
        }

        let shared = self.shared(id)?;
        let mut data = shared.lock();
        let limit = self.config.max_monitored_items_per_subscription;
        if data.item_count() >= limit {
            return Err(UaError::TooManyMonitoredItems(limit));
        }

        let item_id = MonitoredItemId(self.next_item_id.fetch_add(1, Ordering::Relaxed));
        let sampling_interval = self
            .config
            .revise_sampling_interval(params.sampling_interval, data.publishing_interval);
        let queue_size = self.config.revise_queue_size(params.queue_size);
        let mut item = MonitoredItem::new(
            item_id,
            id,
            node_id.clone(),
            attribute,
            &params,
            sampling_interval,
            queue_size,
        );
        data.stats.dropped += item.sample(&self.space);
        data.items.push(item);
        drop(data);
        // The task may be asleep on a deadline computed without this item.
        shared.wake.notify_one();

        tracing::debug!(
            subscription = %id,
            item = %item_id,
            node = %node_id,
            sampling_ms = sampling_interval.as_millis(),
            queue_size,
            "data change item created"
        );
        Ok(MonitoredItemCreated {
            id: item_id,
            revised_sampling_interval: sampling_interval,
            revised_queue_size: queue_size,
        })
    }

    /// Subscribes to events reported by `notifier`, which must have its
    /// SubscribeToEvents bit set.
    pub fn subscribe_event(
        &self,
        id: SubscriptionId,
        notifier: &NodeId,
        client_handle: u32,
        filter: EventFilter,
    ) -> UaResult<MonitoredItemId> {
        let node = self.space.get_node(notifier)?;
        match node.event_notifier() {
            Some(bits) if bits & event_notifier::SUBSCRIBE_TO_EVENTS != 0 => {}
            _ => return Err(UaError::EventNotifierDisabled(notifier.clone())),
        }

        let shared = self.shared(id)?;
        let mut data = shared.lock();
        let limit = self.config.max_monitored_items_per_subscription;
        if data.item_count() >= limit {
            return Err(UaError::TooManyMonitoredItems(limit));
        }
        let item_id = MonitoredItemId(self.next_item_id.fetch_add(1, Ordering::Relaxed));
        data.event_items.push(EventItem {
            id: item_id,
            client_handle,
            notifier: notifier.clone(),
            filter,
        });
        tracing::debug!(subscription = %id, item = %item_id, notifier = %notifier, "event item created");
        Ok(item_id)
    }

    /// Removes a data-change or event item. Its queued notifications are
    /// discarded.
    pub fn unsubscribe(&self, id: SubscriptionId, item: MonitoredItemId) -> UaResult<()> {
        let shared = self.shared(id)?;
        let mut data = shared.lock();
        let before = data.item_count();
        data.items.retain(|i| i.id != item);
        data.event_items.retain(|i| i.id != item);
        if data.item_count() == before {
            return Err(UaError::MonitoredItemNotFound(item));
        }
        tracing::debug!(subscription = %id, item = %item, "item removed");
        Ok(())
    }

    /// Queues an event on every subscription with an event item that
    /// accepts it. Returns how many subscriptions took it.
    pub fn trigger_event(&self, mut event: Event) -> UaResult<usize> {
        {
            let store = self.space.read_store();
            store.entry(&event.source_node)?;
            if !store.is_subtype_of(&event.event_type, &ns0(type_ids::BASE_EVENT_TYPE)) {
                return Err(UaError::InvalidArgument(format!(
                    "{} is not an event type",
                    event.event_type
                )));
            }
        }
        event.receive_time = Utc::now();

        let mut targets: Vec<Arc<Shared>> = self
            .registry()
            .values()
            .map(|entry| Arc::clone(&entry.shared))
            .collect();
        targets.sort_by_key(|shared| shared.id);

        let mut accepted = 0;
        for shared in targets {
            if shared.is_deleting() {
                continue;
            }
            let mut data = shared.lock();
            let receivers: Vec<(MonitoredItemId, u32)> = {
                let store = self.space.read_store();
                data.event_items
                    .iter()
                    .filter(|item| item.receives(&store, &event))
                    .map(|item| (item.id, item.client_handle))
                    .collect()
            };
            if receivers.is_empty() {
                continue;
            }
            for (item_id, client_handle) in receivers {
                data.push_event(EventNotification {
                    subscription_id: shared.id,
                    monitored_item_id: item_id,
                    client_handle,
                    event: event.clone(),
                });
            }
            accepted += 1;
        }
        tracing::debug!(event = %event.event_id, message = %event.message, accepted, "event triggered");
        Ok(accepted)
    }

    pub fn subscription_stats(&self, id: SubscriptionId) -> UaResult<SubscriptionStats> {
        Ok(self.shared(id)?.lock().stats.clone())
    }

    pub fn subscription_state(&self, id: SubscriptionId) -> UaResult<SubscriptionState> {
        Ok(self.shared(id)?.lock().lifecycle)
    }

    pub fn publishing_interval(&self, id: SubscriptionId) -> UaResult<Duration> {
        Ok(self.shared(id)?.lock().publishing_interval)
    }

    /// Number of live items (data-change and event) of a subscription.
    pub fn item_count(&self, id: SubscriptionId) -> UaResult<usize> {
        Ok(self.shared(id)?.lock().item_count())
    }

    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self.registry().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Drop for SubscriptionEngine {
    fn drop(&mut self) {
        for (_, entry) in self.registry().drain() {
            stop(&entry.shared);
            entry.task.abort();
        }
    }
}

fn stop(shared: &Shared) {
    shared.deleting.store(true, Ordering::Release);
    {
        let mut data = shared.lock();
        data.lifecycle = SubscriptionState::Deleted;
        data.items.clear();
        data.event_items.clear();
        data.events.clear();
    }
    shared.wake.notify_one();
    shared.deleted.notify_waiters();
}

/// Awaits one handler call. If deletion starts first, the call is given
/// the subscription's grace period; `None` means it was abandoned.
async fn dispatch<F: Future>(shared: &Shared, call: F) -> Option<F::Output> {
    tokio::pin!(call);
    let deleted = shared.deleted.notified();
    tokio::pin!(deleted);
    deleted.as_mut().enable();
    if !shared.is_deleting() {
        tokio::select! {
            out = &mut call => return Some(out),
            () = deleted => {}
        }
    }
    tokio::time::timeout(shared.delivery_grace, call).await.ok()
}

async fn run(shared: Arc<Shared>, space: Arc<AddressSpace>) {
    let id = shared.id;
    loop {
        let (batch, wake_at) = {
            let mut data = shared.lock();
            if shared.is_deleting() {
                break;
            }
            let now = Instant::now();
            data.sample_due(&space, now);
            let batch = if now >= data.next_publish {
                data.next_publish = next_deadline(data.next_publish, data.publishing_interval, now);
                data.publish()
            } else {
                None
            };
            (batch, data.next_wakeup())
        };

        if let Some(batch) = batch {
            deliver(&shared, batch).await;
        }

        tokio::select! {
            () = tokio::time::sleep_until(wake_at) => {}
            () = shared.wake.notified() => {}
        }
    }
    let closing = shared.handler.status_change(id, SubscriptionState::Deleted);
    if dispatch(&shared, closing).await.is_none() {
        tracing::debug!(subscription = %id, "handler did not accept the Deleted state in time");
    }
    tracing::trace!(subscription = %id, "publishing task exiting");
}

async fn deliver(shared: &Shared, batch: Batch) {
    let id = shared.id;
    let handler = &shared.handler;
    let mut data_changes = 0;
    let mut events = 0;
    let mut failures = Vec::new();
    let mut cut_short = false;

    if batch.first_publish
        && dispatch(shared, handler.status_change(id, SubscriptionState::Publishing))
            .await
            .is_none()
    {
        cut_short = true;
    }

    for change in batch.data {
        if cut_short || shared.is_deleting() {
            cut_short = true;
            break;
        }
        let item = change.monitored_item_id;
        match dispatch(shared, handler.data_change(change)).await {
            Some(Ok(())) => data_changes += 1,
            Some(Err(e)) => failures.push(format!("data change for item {item} failed: {e:#}")),
            None => cut_short = true,
        }
    }
    for event in batch.events {
        if cut_short || shared.is_deleting() {
            cut_short = true;
            break;
        }
        let item = event.monitored_item_id;
        match dispatch(shared, handler.event(event)).await {
            Some(Ok(())) => events += 1,
            Some(Err(e)) => failures.push(format!("event for item {item} failed: {e:#}")),
            None => cut_short = true,
        }
    }
    if data_changes + events > 0 {
        tracing::trace!(subscription = %id, data_changes, events, "batch delivered");
    }
    if cut_short {
        tracing::debug!(subscription = %id, "delivery stopped by deletion");
    }

    for message in &failures {
        tracing::warn!(subscription = %id, error = %message, "notification handler failed");
        if shared.is_deleting() {
            continue;
        }
        if dispatch(shared, handler.error(id, message.clone())).await.is_none() {
            tracing::debug!(subscription = %id, "error report abandoned by deletion");
        }
    }

    let mut data = shared.lock();
    data.stats.data_changes_delivered += data_changes;
    data.stats.events_delivered += events;
    data.stats.handler_errors += failures.len() as u64;
    if let Some(last) = failures.pop() {
        data.stats.last_error = Some(last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NewNode, ObjectAttributes, NodeAttributes, VariableAttributes};
    use crate::subscription::{ChannelHandler, MockSubscriptionHandler, Notification};
    use crate::monitored_item::ItemStatus;
    use crate::types::ids::reference_ids;
    use crate::types::{QualifiedName, Variant};
    use tokio::sync::mpsc;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    struct Fixture {
        space: Arc<AddressSpace>,
        engine: SubscriptionEngine,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(EngineConfig::default())
        }

        fn with_config(config: EngineConfig) -> Self {
            let space = Arc::new(AddressSpace::new(&config.server_uri));
            let engine = SubscriptionEngine::new(Arc::clone(&space), config);
            Self { space, engine }
        }

        fn variable(&self, name: &str, value: i32) -> NodeId {
            self.space
                .add_node(
                    &ns0(object_ids::OBJECTS_FOLDER),
                    &ns0(reference_ids::HAS_COMPONENT),
                    NewNode::variable(QualifiedName::new(1, name), VariableAttributes::new(value)),
                )
                .unwrap()
        }

        fn write(&self, node: &NodeId, value: i32) {
            self.space
                .write_attribute(node, AttributeId::Value, Variant::Int32(value))
                .unwrap();
        }

        fn channel_subscription(
            &self,
            interval: Duration,
        ) -> (SubscriptionId, mpsc::Receiver<Notification>) {
            let (handler, rx) = ChannelHandler::channel(64);
            let id = self
                .engine
                .create_subscription(interval, Arc::new(handler))
                .unwrap();
            (id, rx)
        }
    }

    /// Next data or event notification, skipping status changes.
    async fn next_payload(rx: &mut mpsc::Receiver<Notification>) -> Option<Notification> {
        loop {
            match rx.recv().await? {
                Notification::StatusChange { .. } => {}
                other => return Some(other),
            }
        }
    }

    async fn next_data(rx: &mut mpsc::Receiver<Notification>) -> DataChange {
        match next_payload(rx).await {
            Some(Notification::DataChange(change)) => change,
            other => panic!("expected data change, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_temp_scenario_coalesces_per_tick() {
        let fx = Fixture::new();
        let temp = fx.variable("temp", 0);
        let (sub, mut rx) = fx.channel_subscription(ms(100));
        let created = fx
            .engine
            .subscribe_data_change(
                sub,
                &temp,
                AttributeId::Value,
                MonitoringParameters::new(1)
                    .with_sampling_interval(ms(100))
                    .with_queue_size(2),
            )
            .unwrap();
        assert_eq!(created.revised_sampling_interval, ms(100));
        assert_eq!(created.revised_queue_size, 2);

        let initial = next_data(&mut rx).await;
        assert_eq!(initial.value, Variant::Int32(0));
        assert_eq!(initial.client_handle, 1);

        for v in [5, 6, 7] {
            fx.write(&temp, v);
        }
        let change = next_data(&mut rx).await;
        assert_eq!(change.value, Variant::Int32(7));
        assert_eq!(change.status, ItemStatus::Good);

        let quiet = tokio::time::timeout(ms(350), next_payload(&mut rx)).await;
        assert!(quiet.is_err(), "unexpected notification: {quiet:?}");
        assert_eq!(
            fx.engine.subscription_state(sub).unwrap(),
            SubscriptionState::Publishing
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_keeps_newest_and_counts_drops() {
        let fx = Fixture::new();
        let node = fx.variable("fast", 0);
        let (sub, mut rx) = fx.channel_subscription(ms(1000));
        fx.engine
            .subscribe_data_change(
                sub,
                &node,
                AttributeId::Value,
                MonitoringParameters::new(9)
                    .with_sampling_interval(ms(10))
                    .with_queue_size(2),
            )
            .unwrap();

        tokio::time::sleep(ms(5)).await;
        for v in [1, 2, 3] {
            fx.write(&node, v);
            tokio::time::sleep(ms(10)).await;
        }

        let first = next_data(&mut rx).await;
        let second = next_data(&mut rx).await;
        assert_eq!(first.value, Variant::Int32(2));
        assert_eq!(second.value, Variant::Int32(3));
        assert_eq!(fx.engine.subscription_stats(sub).unwrap().dropped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_deliver_in_registration_order() {
        let fx = Fixture::new();
        let a = fx.variable("a", 1);
        let b = fx.variable("b", 2);
        let (sub, mut rx) = fx.channel_subscription(ms(100));
        for (handle, node) in [(20, &b), (10, &a)] {
            fx.engine
                .subscribe_data_change(sub, node, AttributeId::Value, MonitoringParameters::new(handle))
                .unwrap();
        }
        assert_eq!(next_data(&mut rx).await.client_handle, 20);
        assert_eq!(next_data(&mut rx).await.client_handle, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_node_reports_node_gone_once() {
        let fx = Fixture::new();
        let node = fx.variable("doomed", 3);
        let (sub, mut rx) = fx.channel_subscription(ms(100));
        fx.engine
            .subscribe_data_change(sub, &node, AttributeId::Value, MonitoringParameters::new(1))
            .unwrap();
        assert_eq!(next_data(&mut rx).await.value, Variant::Int32(3));

        fx.space.delete_node(&node).unwrap();
        let gone = next_data(&mut rx).await;
        assert_eq!(gone.status, ItemStatus::NodeGone);
        assert_eq!(gone.node_id, node);
        assert_eq!(fx.engine.item_count(sub).unwrap(), 0);

        let quiet = tokio::time::timeout(ms(500), next_payload(&mut rx)).await;
        assert!(quiet.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_delivered_in_trigger_order() {
        let fx = Fixture::new();
        fx.space
            .write_attribute(
                &ns0(object_ids::SERVER),
                AttributeId::EventNotifier,
                Variant::Byte(event_notifier::SUBSCRIBE_TO_EVENTS),
            )
            .unwrap();
        let (events_sub, mut events_rx) = fx.channel_subscription(ms(100));
        fx.engine
            .subscribe_event(events_sub, &ns0(object_ids::SERVER), 5, EventFilter::all())
            .unwrap();

        // An unrelated subscription producing data at the same time.
        let noisy = fx.variable("noisy", 0);
        let (data_sub, mut data_rx) = fx.channel_subscription(ms(100));
        fx.engine
            .subscribe_data_change(data_sub, &noisy, AttributeId::Value, MonitoringParameters::new(1))
            .unwrap();

        assert_eq!(fx.engine.trigger_event(Event::server_event("A")).unwrap(), 1);
        fx.write(&noisy, 1);
        assert_eq!(fx.engine.trigger_event(Event::server_event("B")).unwrap(), 1);

        let mut messages = Vec::new();
        for _ in 0..2 {
            match next_payload(&mut events_rx).await {
                Some(Notification::Event(n)) => {
                    assert_eq!(n.client_handle, 5);
                    messages.push(n.event.message.text);
                }
                other => panic!("expected event, got {other:?}"),
            }
        }
        assert_eq!(messages, vec!["A", "B"]);
        assert_eq!(next_data(&mut data_rx).await.subscription_id, data_sub);
        assert_eq!(fx.engine.subscription_stats(events_sub).unwrap().events_delivered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_scope_and_filter() {
        let fx = Fixture::new();
        let attrs = ObjectAttributes {
            event_notifier: event_notifier::SUBSCRIBE_TO_EVENTS,
        };
        let area = fx
            .space
            .add_node(
                &ns0(object_ids::OBJECTS_FOLDER),
                &ns0(reference_ids::ORGANIZES),
                NewNode::new(QualifiedName::new(1, "Area"), NodeAttributes::Object(attrs)),
            )
            .unwrap();
        let pump = fx
            .space
            .add_node(&area, &ns0(reference_ids::HAS_COMPONENT), NewNode::object(QualifiedName::new(1, "Pump")))
            .unwrap();
        let elsewhere = fx.variable("elsewhere", 0);

        let (sub, _rx) = fx.channel_subscription(ms(100));
        fx.engine
            .subscribe_event(
                sub,
                &area,
                1,
                EventFilter::all()
                    .with_event_type(ns0(type_ids::SYSTEM_EVENT_TYPE))
                    .with_min_severity(100),
            )
            .unwrap();

        let system = |source: &NodeId, severity| {
            Event::new(ns0(type_ids::SYSTEM_EVENT_TYPE), source.clone(), "x").with_severity(severity)
        };
        assert_eq!(fx.engine.trigger_event(system(&pump, 500)).unwrap(), 1);
        assert_eq!(fx.engine.trigger_event(system(&area, 500)).unwrap(), 1);
        assert_eq!(fx.engine.trigger_event(system(&elsewhere, 500)).unwrap(), 0);
        assert_eq!(fx.engine.trigger_event(system(&pump, 50)).unwrap(), 0);
        let base = Event::new(ns0(type_ids::BASE_EVENT_TYPE), pump.clone(), "y").with_severity(500);
        assert_eq!(fx.engine.trigger_event(base).unwrap(), 0);

        let not_an_event = Event::new(ns0(type_ids::FOLDER_TYPE), pump, "z");
        assert!(matches!(
            fx.engine.trigger_event(not_an_event),
            Err(UaError::InvalidArgument(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_delivered_after_delete() {
        let fx = Fixture::new();
        let node = fx.variable("v", 0);
        let (sub, mut rx) = fx.channel_subscription(ms(100));
        fx.engine
            .subscribe_data_change(sub, &node, AttributeId::Value, MonitoringParameters::new(1))
            .unwrap();
        fx.engine.delete_subscription(sub).await.unwrap();
        fx.write(&node, 42);
        tokio::time::sleep(ms(1000)).await;

        assert_eq!(
            rx.recv().await,
            Some(Notification::StatusChange {
                subscription: sub,
                state: SubscriptionState::Deleted
            })
        );
        assert_eq!(rx.recv().await, None);
        assert!(matches!(
            fx.engine.delete_subscription(sub).await,
            Err(UaError::SubscriptionNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_with_stalled_consumer_returns() {
        let fx = Fixture::new();
        let node = fx.variable("stalled", 0);
        let (handler, mut rx) = ChannelHandler::channel(1);
        let sub = fx
            .engine
            .create_subscription(ms(100), Arc::new(handler))
            .unwrap();
        fx.engine
            .subscribe_data_change(sub, &node, AttributeId::Value, MonitoringParameters::new(1))
            .unwrap();
        // The Publishing state fills the channel; the data change then blocks.
        tokio::time::sleep(ms(150)).await;

        let deleted = tokio::time::timeout(ms(60_000), fx.engine.delete_subscription(sub)).await;
        assert!(matches!(deleted, Ok(Ok(()))));

        assert_eq!(
            rx.recv().await,
            Some(Notification::StatusChange {
                subscription: sub,
                state: SubscriptionState::Publishing
            })
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_lets_slow_consumer_finish_within_grace() {
        let fx = Fixture::with_config(EngineConfig::default().with_delivery_grace(ms(2000)));
        let node = fx.variable("slow", 5);
        let (handler, mut rx) = ChannelHandler::channel(1);
        let sub = fx
            .engine
            .create_subscription(ms(100), Arc::new(handler))
            .unwrap();
        fx.engine
            .subscribe_data_change(sub, &node, AttributeId::Value, MonitoringParameters::new(1))
            .unwrap();
        tokio::time::sleep(ms(150)).await;

        let reader = tokio::spawn(async move {
            tokio::time::sleep(ms(1000)).await;
            let mut seen = Vec::new();
            while let Some(notification) = rx.recv().await {
                seen.push(notification);
            }
            seen
        });
        fx.engine.delete_subscription(sub).await.unwrap();

        let seen = reader.await.unwrap();
        assert!(seen.iter().any(|n| matches!(
            n,
            Notification::DataChange(change) if change.value == Variant::Int32(5)
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_errors_are_isolated() {
        let fx = Fixture::new();
        let node = fx.variable("shared", 0);

        let mut failing = MockSubscriptionHandler::new();
        failing
            .expect_data_change()
            .returning(|_| Err(anyhow::anyhow!("consumer offline")));
        failing.expect_status_change().returning(|_, _| ());
        failing
            .expect_error()
            .withf(|_, message| message.contains("consumer offline"))
            .times(1)
            .returning(|_, _| ());
        let bad = fx
            .engine
            .create_subscription(ms(100), Arc::new(failing))
            .unwrap();
        fx.engine
            .subscribe_data_change(bad, &node, AttributeId::Value, MonitoringParameters::new(1))
            .unwrap();

        let (good, mut rx) = fx.channel_subscription(ms(100));
        fx.engine
            .subscribe_data_change(good, &node, AttributeId::Value, MonitoringParameters::new(2))
            .unwrap();

        assert_eq!(next_data(&mut rx).await.client_handle, 2);
        tokio::time::sleep(ms(50)).await;

        let stats = fx.engine.subscription_stats(bad).unwrap();
        assert_eq!(stats.handler_errors, 1);
        assert_eq!(stats.data_changes_delivered, 0);
        assert!(stats.last_error.unwrap().contains("consumer offline"));
        assert_eq!(fx.engine.subscription_stats(good).unwrap().data_changes_delivered, 1);

        fx.engine.shutdown().await;
        assert!(fx.engine.subscription_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishing_mode_holds_notifications() {
        let fx = Fixture::new();
        let node = fx.variable("held", 0);
        let (sub, mut rx) = fx.channel_subscription(ms(100));
        fx.engine
            .subscribe_data_change(
                sub,
                &node,
                AttributeId::Value,
                MonitoringParameters::new(1).with_queue_size(10),
            )
            .unwrap();
        fx.engine.set_publishing_mode(sub, false).unwrap();

        tokio::time::sleep(ms(150)).await;
        fx.write(&node, 1);
        tokio::time::sleep(ms(300)).await;
        assert!(rx.try_recv().is_err());

        fx.engine.set_publishing_mode(sub, true).unwrap();
        assert_eq!(next_data(&mut rx).await.value, Variant::Int32(0));
        assert_eq!(next_data(&mut rx).await.value, Variant::Int32(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_modify_and_revisions() {
        let fx = Fixture::new();
        let (sub, _rx) = fx.channel_subscription(Duration::ZERO);
        assert_eq!(fx.engine.publishing_interval(sub).unwrap(), ms(1000));
        assert_eq!(fx.engine.modify_subscription(sub, ms(1)).unwrap(), ms(10));

        let node = fx.variable("v", 0);
        let created = fx
            .engine
            .subscribe_data_change(
                sub,
                &node,
                AttributeId::Value,
                MonitoringParameters::new(1).with_queue_size(5000),
            )
            .unwrap();
        assert_eq!(created.revised_sampling_interval, ms(10));
        assert_eq!(created.revised_queue_size, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_errors() {
        let fx = Fixture::with_config(
            EngineConfig::default()
                .with_max_subscriptions(1)
                .with_max_monitored_items(1),
        );
        let node = fx.variable("v", 0);
        let (sub, _rx) = fx.channel_subscription(ms(100));

        let (extra, _extra_rx) = ChannelHandler::channel(1);
        assert!(matches!(
            fx.engine.create_subscription(ms(100), Arc::new(extra)),
            Err(UaError::TooManySubscriptions(1))
        ));
        assert!(matches!(
            fx.engine.subscribe_data_change(
                sub,
                &NodeId::numeric(1, 4242),
                AttributeId::Value,
                MonitoringParameters::new(1)
            ),
            Err(UaError::NotFound(_))
        ));
        assert!(matches!(
            fx.engine.subscribe_data_change(
                sub,
                &ns0(object_ids::OBJECTS_FOLDER),
                AttributeId::Value,
                MonitoringParameters::new(1)
            ),
            Err(UaError::AttributeNotSupported { .. })
        ));
        assert!(matches!(
            fx.engine.subscribe_event(
                sub,
                &ns0(object_ids::OBJECTS_FOLDER),
                1,
                EventFilter::all()
            ),
            Err(UaError::EventNotifierDisabled(_))
        ));

        let item = fx
            .engine
            .subscribe_data_change(sub, &node, AttributeId::Value, MonitoringParameters::new(1))
            .unwrap();
        assert!(matches!(
            fx.engine
                .subscribe_data_change(sub, &node, AttributeId::Value, MonitoringParameters::new(2)),
            Err(UaError::TooManyMonitoredItems(1))
        ));
        fx.engine.unsubscribe(sub, item.id).unwrap();
        assert!(matches!(
            fx.engine.unsubscribe(sub, item.id),
            Err(UaError::MonitoredItemNotFound(_))
        ));
        assert!(matches!(
            fx.engine.set_publishing_mode(SubscriptionId(99), true),
            Err(UaError::SubscriptionNotFound(_))
        ));
    }

    #[test]
    fn test_create_outside_runtime_fails() {
        let fx = Fixture::new();
        let (handler, _rx) = ChannelHandler::channel(1);
        assert!(matches!(
            fx.engine.create_subscription(ms(100), Arc::new(handler)),
            Err(UaError::Internal(_))
        ));
    }
}
