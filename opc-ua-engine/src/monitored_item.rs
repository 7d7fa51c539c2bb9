//! Per-item sampling, change detection and bounded queuing.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::address_space::AddressSpace;
use crate::error::UaError;
use crate::subscription::{MonitoredItemId, SubscriptionId};
use crate::types::{AttributeId, NodeId, Variant};

/// Client-requested monitoring settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringParameters {
    /// Echoed back in every notification of the item.
    pub client_handle: u32,
    /// Zero means "sample at the publishing interval".
    pub sampling_interval: Duration,
    pub queue_size: usize,
    /// On overflow drop the oldest entry (`true`) or replace the newest.
    pub discard_oldest: bool,
}

impl MonitoringParameters {
    pub fn new(client_handle: u32) -> Self {
        Self {
            client_handle,
            sampling_interval: Duration::ZERO,
            queue_size: 1,
            discard_oldest: true,
        }
    }

    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_discard_oldest(mut self, discard_oldest: bool) -> Self {
        self.discard_oldest = discard_oldest;
        self
    }
}

/// What the server granted for a new monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoredItemCreated {
    pub id: MonitoredItemId,
    pub revised_sampling_interval: Duration,
    pub revised_queue_size: usize,
}

/// Quality of a delivered data change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Good,
    /// The monitored node was deleted. Last notification of the item.
    NodeGone,
    /// Sampling failed with the given status code.
    Bad(u32),
}

/// One data-change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChange {
    pub subscription_id: SubscriptionId,
    pub monitored_item_id: MonitoredItemId,
    pub client_handle: u32,
    pub node_id: NodeId,
    pub attribute: AttributeId,
    pub value: Variant,
    pub status: ItemStatus,
    pub source_timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub(crate) struct MonitoredItem {
    pub(crate) id: MonitoredItemId,
    subscription_id: SubscriptionId,
    client_handle: u32,
    node_id: NodeId,
    attribute: AttributeId,
    pub(crate) sampling_interval: Duration,
    queue_size: usize,
    discard_oldest: bool,
    last_value: Option<Variant>,
    last_epoch: u64,
    last_error: Option<u32>,
    queue: VecDeque<DataChange>,
    terminated: bool,
    pub(crate) next_sample: Instant,
}

impl MonitoredItem {
    /// `sampling_interval` and `queue_size` must already be revised.
    pub(crate) fn new(
        id: MonitoredItemId,
        subscription_id: SubscriptionId,
        node_id: NodeId,
        attribute: AttributeId,
        params: &MonitoringParameters,
        sampling_interval: Duration,
        queue_size: usize,
    ) -> Self {
        Self {
            id,
            subscription_id,
            client_handle: params.client_handle,
            node_id,
            attribute,
            sampling_interval,
            queue_size: queue_size.max(1),
            discard_oldest: params.discard_oldest,
            last_value: None,
            last_epoch: 0,
            last_error: None,
            queue: VecDeque::new(),
            terminated: false,
            next_sample: Instant::now() + sampling_interval,
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Reads the target once and queues a notification if it changed.
    ///
    /// Returns the number of entries dropped by the overflow policy.
    pub(crate) fn sample(&mut self, space: &AddressSpace) -> u64 {
        if self.terminated {
            return 0;
        }
        match space.read_value_with_epoch(&self.node_id, self.attribute) {
            Ok((value, epoch)) => {
                self.last_error = None;
                if epoch != 0 && epoch == self.last_epoch {
                    return 0;
                }
                self.last_epoch = epoch;
                if self.last_value.as_ref() == Some(&value) {
                    return 0;
                }
                tracing::trace!(item = %self.id, node = %self.node_id, %value, "value changed");
                self.last_value = Some(value.clone());
                self.push(value, ItemStatus::Good)
            }
            Err(UaError::NotFound(_)) => {
                tracing::debug!(item = %self.id, node = %self.node_id, "monitored node gone");
                self.terminated = true;
                self.push(Variant::Empty, ItemStatus::NodeGone)
            }
            Err(err) => {
                let code = err.status_code();
                // Report each distinct failure once; a later good read is
                // reported again even if the value is unchanged.
                self.last_value = None;
                self.last_epoch = 0;
                if self.last_error == Some(code) {
                    return 0;
                }
                tracing::debug!(item = %self.id, error = %err, "sampling failed");
                self.last_error = Some(code);
                self.push(Variant::Empty, ItemStatus::Bad(code))
            }
        }
    }

    fn push(&mut self, value: Variant, status: ItemStatus) -> u64 {
        let change = DataChange {
            subscription_id: self.subscription_id,
            monitored_item_id: self.id,
            client_handle: self.client_handle,
            node_id: self.node_id.clone(),
            attribute: self.attribute,
            value,
            status,
            source_timestamp: Utc::now(),
        };
        let mut dropped = 0;
        if self.queue.len() >= self.queue_size {
            if self.discard_oldest {
                self.queue.pop_front();
            } else {
                self.queue.pop_back();
            }
            dropped = 1;
        }
        self.queue.push_back(change);
        dropped
    }

    pub(crate) fn drain_into(&mut self, out: &mut Vec<DataChange>) {
        out.extend(self.queue.drain(..));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NewNode, VariableAttributes};
    use crate::types::ids::{object_ids, reference_ids};
    use crate::types::{QualifiedName, ns0};

    fn setup(queue_size: usize, discard_oldest: bool) -> (AddressSpace, NodeId, MonitoredItem) {
        let space = AddressSpace::default();
        let node = space
            .add_node(
                &ns0(object_ids::OBJECTS_FOLDER),
                &ns0(reference_ids::HAS_COMPONENT),
                NewNode::variable(QualifiedName::new(1, "temp"), VariableAttributes::new(0i32)),
            )
            .unwrap();
        let params = MonitoringParameters::new(7)
            .with_queue_size(queue_size)
            .with_discard_oldest(discard_oldest);
        let item = MonitoredItem::new(
            MonitoredItemId(1),
            SubscriptionId(1),
            node.clone(),
            AttributeId::Value,
            &params,
            Duration::from_millis(100),
            queue_size,
        );
        (space, node, item)
    }

    fn write(space: &AddressSpace, node: &NodeId, value: i32) {
        space
            .write_attribute(node, AttributeId::Value, Variant::Int32(value))
            .unwrap();
    }

    fn drained(item: &mut MonitoredItem) -> Vec<(Variant, ItemStatus)> {
        let mut out = Vec::new();
        item.drain_into(&mut out);
        out.into_iter().map(|c| (c.value, c.status)).collect()
    }

    #[tokio::test]
    async fn test_writes_between_ticks_coalesce() {
        let (space, node, mut item) = setup(2, true);
        item.sample(&space);
        for v in [5, 6, 7] {
            write(&space, &node, v);
        }
        item.sample(&space);
        assert_eq!(
            drained(&mut item),
            vec![
                (Variant::Int32(0), ItemStatus::Good),
                (Variant::Int32(7), ItemStatus::Good)
            ]
        );
    }

    #[tokio::test]
    async fn test_unchanged_value_is_not_requeued() {
        let (space, node, mut item) = setup(4, true);
        item.sample(&space);
        item.sample(&space);
        // Rewriting the same value bumps the epoch but compares equal.
        write(&space, &node, 0);
        item.sample(&space);
        assert_eq!(drained(&mut item).len(), 1);
    }

    #[tokio::test]
    async fn test_overflow_discards_oldest() {
        let (space, node, mut item) = setup(2, true);
        let mut dropped = item.sample(&space);
        for v in [1, 2, 3] {
            write(&space, &node, v);
            dropped += item.sample(&space);
            assert!(item.queue_len() <= 2);
        }
        assert_eq!(dropped, 2);
        let values: Vec<_> = drained(&mut item).into_iter().map(|(v, _)| v).collect();
        assert_eq!(values, vec![Variant::Int32(2), Variant::Int32(3)]);
    }

    #[tokio::test]
    async fn test_overflow_replaces_newest() {
        let (space, node, mut item) = setup(2, false);
        item.sample(&space);
        for v in [1, 2, 3] {
            write(&space, &node, v);
            item.sample(&space);
        }
        let values: Vec<_> = drained(&mut item).into_iter().map(|(v, _)| v).collect();
        assert_eq!(values, vec![Variant::Int32(0), Variant::Int32(3)]);
    }

    #[tokio::test]
    async fn test_node_gone_is_terminal() {
        let (space, node, mut item) = setup(2, true);
        item.sample(&space);
        space.delete_node(&node).unwrap();
        item.sample(&space);
        item.sample(&space);
        assert!(item.is_terminated());
        assert_eq!(
            drained(&mut item),
            vec![
                (Variant::Int32(0), ItemStatus::Good),
                (Variant::Empty, ItemStatus::NodeGone)
            ]
        );
    }

    #[tokio::test]
    async fn test_recreated_node_value_is_reported() {
        let (space, node, mut item) = setup(4, true);
        item.sample(&space);
        space.delete_node(&node).unwrap();
        space
            .add_node(
                &ns0(object_ids::OBJECTS_FOLDER),
                &ns0(reference_ids::HAS_COMPONENT),
                NewNode::variable(QualifiedName::new(1, "temp"), VariableAttributes::new(42i32))
                    .with_id(node.clone()),
            )
            .unwrap();
        item.sample(&space);
        assert!(!item.is_terminated());
        assert_eq!(
            drained(&mut item),
            vec![
                (Variant::Int32(0), ItemStatus::Good),
                (Variant::Int32(42), ItemStatus::Good)
            ]
        );
    }

    #[tokio::test]
    async fn test_read_failure_reported_once() {
        let (space, node, mut item) = setup(4, true);
        item.sample(&space);
        space
            .write_attribute(&node, AttributeId::AccessLevel, Variant::Byte(0))
            .unwrap();
        item.sample(&space);
        item.sample(&space);
        space
            .write_attribute(&node, AttributeId::AccessLevel, Variant::Byte(1))
            .unwrap();
        item.sample(&space);
        assert_eq!(
            drained(&mut item),
            vec![
                (Variant::Int32(0), ItemStatus::Good),
                (Variant::Empty, ItemStatus::Bad(0x803A_0000)),
                (Variant::Int32(0), ItemStatus::Good),
            ]
        );
    }
}
