//! Subscription-facing types: identifiers, the handler trait notifications
//! are delivered through, events and their filters.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

#[cfg(any(test, feature = "test-support"))]
use mockall::automock;

use crate::address_space::Store;
use crate::monitored_item::DataChange;
use crate::types::ids::{object_ids, type_ids};
use crate::types::{LocalizedText, NodeId, Variant, ns0};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u32);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitoredItemId(pub u32);

impl fmt::Display for MonitoredItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a subscription: `Created -> Publishing -> Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Created,
    Publishing,
    Deleted,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Delivery counters of one subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub data_changes_delivered: u64,
    pub events_delivered: u64,
    pub handler_errors: u64,
    /// Notifications lost to queue overflow.
    pub dropped: u64,
    pub publish_count: u64,
    pub last_error: Option<String>,
}

/// A transient event raised through `trigger_event`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: NodeId,
    pub source_node: NodeId,
    pub source_name: String,
    pub message: LocalizedText,
    /// 1 (lowest) to 1000 (highest).
    pub severity: u16,
    pub time: DateTime<Utc>,
    /// Set by the engine when the event is triggered.
    pub receive_time: DateTime<Utc>,
    pub fields: BTreeMap<String, Variant>,
}

impl Event {
    pub fn new(event_type: NodeId, source_node: NodeId, message: impl Into<LocalizedText>) -> Self {
        let now = Utc::now();
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            source_node,
            source_name: String::new(),
            message: message.into(),
            severity: 1,
            time: now,
            receive_time: now,
            fields: BTreeMap::new(),
        }
    }

    /// A `BaseEventType` event sourced at the Server object.
    pub fn server_event(message: impl Into<LocalizedText>) -> Self {
        Self::new(
            ns0(type_ids::BASE_EVENT_TYPE),
            ns0(object_ids::SERVER),
            message,
        )
        .with_source_name("Server")
    }

    pub fn with_severity(mut self, severity: u16) -> Self {
        self.severity = severity.clamp(1, 1000);
        self
    }

    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = source_name.into();
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Variant>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Selects which events an event item receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Accepted event types, subtypes included. Empty accepts every type.
    pub event_types: Vec<NodeId>,
    pub min_severity: u16,
}

impl EventFilter {
    /// Filter that accepts every event.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_event_type(mut self, event_type: NodeId) -> Self {
        self.event_types.push(event_type);
        self
    }

    pub fn with_min_severity(mut self, min_severity: u16) -> Self {
        self.min_severity = min_severity;
        self
    }

    pub(crate) fn accepts(&self, store: &Store, event: &Event) -> bool {
        event.severity >= self.min_severity
            && (self.event_types.is_empty()
                || self
                    .event_types
                    .iter()
                    .any(|t| store.is_subtype_of(&event.event_type, t)))
    }
}

/// One event delivered to an event item.
#[derive(Debug, Clone, PartialEq)]
pub struct EventNotification {
    pub subscription_id: SubscriptionId,
    pub monitored_item_id: MonitoredItemId,
    pub client_handle: u32,
    pub event: Event,
}

/// Receives the notifications of a subscription.
///
/// Calls for one subscription are made sequentially from its publishing
/// task; an `Err` is logged, counted, and reported back through
/// [`SubscriptionHandler::error`] without affecting other subscriptions.
#[cfg_attr(any(test, feature = "test-support"), automock)]
#[async_trait]
pub trait SubscriptionHandler: Send + Sync {
    /// Called once per data-change notification, per-item FIFO.
    ///
    /// # Errors
    /// Any error is isolated to this subscription.
    async fn data_change(&self, change: DataChange) -> anyhow::Result<()>;

    /// Called once per event, in trigger order.
    ///
    /// # Errors
    /// Any error is isolated to this subscription.
    async fn event(&self, event: EventNotification) -> anyhow::Result<()> {
        tracing::trace!(event = %event.event.event_id, "event ignored by handler");
        Ok(())
    }

    async fn status_change(&self, subscription: SubscriptionId, state: SubscriptionState) {
        tracing::trace!(%subscription, %state, "status change ignored by handler");
    }

    /// Reports a failure of one of this handler's own callbacks.
    async fn error(&self, subscription: SubscriptionId, message: String) {
        tracing::trace!(%subscription, %message, "handler error ignored");
    }
}

/// A notification as pushed by [`ChannelHandler`].
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    DataChange(DataChange),
    Event(EventNotification),
    StatusChange {
        subscription: SubscriptionId,
        state: SubscriptionState,
    },
    Error {
        subscription: SubscriptionId,
        message: String,
    },
}

/// Forwards every notification into an mpsc channel, for a transport to
/// serialize or a test to await.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    sender: mpsc::Sender<Notification>,
}

impl ChannelHandler {
    pub fn new(sender: mpsc::Sender<Notification>) -> Self {
        Self { sender }
    }

    /// Handler plus the receiving end of a channel of `capacity`.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    async fn forward(&self, notification: Notification) -> anyhow::Result<()> {
        self.sender
            .send(notification)
            .await
            .map_err(|_| anyhow::anyhow!("notification receiver dropped"))
    }
}

#[async_trait]
impl SubscriptionHandler for ChannelHandler {
    async fn data_change(&self, change: DataChange) -> anyhow::Result<()> {
        self.forward(Notification::DataChange(change)).await
    }

    async fn event(&self, event: EventNotification) -> anyhow::Result<()> {
        self.forward(Notification::Event(event)).await
    }

    async fn status_change(&self, subscription: SubscriptionId, state: SubscriptionState) {
        let notification = Notification::StatusChange {
            subscription,
            state,
        };
        if let Err(e) = self.forward(notification).await {
            tracing::debug!(%subscription, %state, error = %e, "status change not forwarded");
        }
    }

    async fn error(&self, subscription: SubscriptionId, message: String) {
        let notification = Notification::Error {
            subscription,
            message,
        };
        if let Err(e) = self.forward(notification).await {
            tracing::debug!(%subscription, error = %e, "handler error not forwarded");
        }
    }
}
