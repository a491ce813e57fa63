//! Time-ordered message queues

use crate::raw::{RawRecord, Timestamp};

/// Messages kept in non-decreasing timestamp order
///
/// Records usually arrive in order, so insertion checks the tail first.
/// Records with equal timestamps keep their arrival order.
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    items: Vec<RawRecord>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: RawRecord) {
        let ts = record.timestamp;
        match self.items.last() {
            Some(last) if last.timestamp > ts => {
                let at = self.items.partition_point(|m| m.timestamp <= ts);
                self.items.insert(at, record);
            }
            _ => self.items.push(record),
        }
    }

    /// Removes and returns the records later than `ts`
    pub fn split_after(&mut self, ts: Timestamp) -> Vec<RawRecord> {
        let at = self.items.partition_point(|m| m.timestamp <= ts);
        self.items.split_off(at)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[RawRecord] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RawRecord> {
        self.items.iter()
    }

    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.items.first().map(|m| m.timestamp)
    }
}

impl<'a> IntoIterator for &'a MessageQueue {
    type Item = &'a RawRecord;
    type IntoIter = std::slice::Iter<'a, RawRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
