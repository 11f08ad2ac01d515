use crate::protocol::{AttributeName, ObjectId};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Where a change to an attribute is journaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HistoryScope {
    #[serde(rename = "")]
    None,
    #[default]
    #[serde(rename = "node")]
    ObjectLocal,
    #[serde(rename = "env")]
    EnvironmentGlobal,
}

impl HistoryScope {
    pub fn wire_name(&self) -> &'static str {
        match self {
            HistoryScope::None => "",
            HistoryScope::ObjectLocal => "node",
            HistoryScope::EnvironmentGlobal => "env",
        }
    }

    pub fn is_journaled(&self) -> bool {
        !matches!(self, HistoryScope::None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub object_id: ObjectId,
    pub attribute: AttributeName,
    pub old: Value,
    pub new: Value,
    /// Bumped each time a later change is folded into this record.
    pub version: u32,
    pub recorded_at: Instant,
}

impl HistoryRecord {
    pub fn new(object_id: &str, attribute: &str, old: Value, new: Value) -> Self {
        Self {
            object_id: object_id.to_string(),
            attribute: attribute.to_string(),
            old,
            new,
            version: 0,
            recorded_at: Instant::now(),
        }
    }

    fn targets(&self, object_id: &str, attribute: &str) -> bool {
        self.object_id == object_id && self.attribute == attribute
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryConfig {
    pub coalesce_window: Option<Duration>,
    pub capacity: Option<usize>,
}

/// A linear undo journal. Records before `head` are applied, records at and
/// after `head` form the redo branch.
#[derive(Debug, Clone, Default)]
pub struct History {
    records: Vec<HistoryRecord>,
    head: usize,
    config: HistoryConfig,
}

impl History {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            records: Vec::new(),
            head: 0,
            config,
        }
    }

    pub fn record(&mut self, record: HistoryRecord) {
        self.records.truncate(self.head);

        if let (Some(window), Some(last)) = (self.config.coalesce_window, self.records.last_mut()) {
            if last.targets(&record.object_id, &record.attribute)
                && record.recorded_at.duration_since(last.recorded_at) < window
            {
                last.new = record.new;
                last.recorded_at = record.recorded_at;
                last.version += 1;
                return;
            }
        }

        self.records.push(record);

        if let Some(capacity) = self.config.capacity {
            if self.records.len() > capacity {
                let excess = self.records.len() - capacity;
                self.records.drain(..excess);
            }
        }

        self.head = self.records.len();
    }

    /// Steps the head back and returns the record whose `old` value should be restored.
    pub fn undo(&mut self) -> Option<HistoryRecord> {
        if self.head == 0 {
            return None;
        }
        self.head -= 1;
        Some(self.records[self.head].clone())
    }

    /// Steps the head forward and returns the record whose `new` value should be re-applied.
    pub fn redo(&mut self) -> Option<HistoryRecord> {
        let record = self.records.get(self.head)?.clone();
        self.head += 1;
        Some(record)
    }

    pub fn can_undo(&self) -> bool {
        self.head > 0
    }

    pub fn can_redo(&self) -> bool {
        self.head < self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn latest(&self) -> Option<&HistoryRecord> {
        self.head.checked_sub(1).and_then(|i| self.records.get(i))
    }

    pub fn forget_object(&mut self, object_id: &str) {
        let before_head = self.records[..self.head]
            .iter()
            .filter(|r| r.object_id != object_id)
            .count();
        self.records.retain(|r| r.object_id != object_id);
        self.head = before_head;
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.head = 0;
    }
}
