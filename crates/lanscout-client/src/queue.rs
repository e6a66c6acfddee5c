//! Inbound update queue and subscription filters.

use crate::error::{ChannelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

/// Delivery priority of an update. Ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// One update waiting to be dispatched to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedUpdate {
    #[serde(rename = "type")]
    pub update_type: String,

    #[serde(default)]
    pub payload: Value,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub priority: UpdatePriority,
}

impl QueuedUpdate {
    pub fn new(update_type: impl Into<String>, payload: Value, priority: UpdatePriority) -> Self {
        Self {
            update_type: update_type.into(),
            payload,
            timestamp: Utc::now(),
            priority,
        }
    }
}

/// Field-equality filter over an update payload.
///
/// Every field present in the filter must equal the payload's field; fields
/// the filter does not mention are wildcards. Only scalar values may be used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateFilter(BTreeMap<String, Value>);

impl UpdateFilter {
    /// Filter that matches every payload.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rejects empty field names and non-scalar values.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in &self.0 {
            if field.trim().is_empty() {
                return Err(ChannelError::invalid_filter(field, "field name cannot be empty"));
            }
            if value.is_object() || value.is_array() {
                return Err(ChannelError::invalid_filter(field, "value must be a scalar"));
            }
        }
        Ok(())
    }

    pub fn matches(&self, payload: &Value) -> bool {
        self.0
            .iter()
            .all(|(field, expected)| payload.get(field) == Some(expected))
    }
}

impl From<BTreeMap<String, Value>> for UpdateFilter {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self(fields)
    }
}

/// Bounded FIFO of inbound updates; the oldest entry is dropped when full.
#[derive(Debug)]
pub struct UpdateQueue {
    capacity: usize,
    items: VecDeque<QueuedUpdate>,
}

impl UpdateQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Appends an update, returning the entry evicted to make room.
    pub fn push(&mut self, update: QueuedUpdate) -> Option<QueuedUpdate> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(update);
        evicted
    }

    /// Empties the queue, highest priority first; equal priorities keep
    /// arrival order.
    pub fn drain_by_priority(&mut self) -> Vec<QueuedUpdate> {
        let mut drained: Vec<QueuedUpdate> = self.items.drain(..).collect();
        drained.sort_by(|a, b| b.priority.cmp(&a.priority));
        drained
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
