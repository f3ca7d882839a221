use crate::activity::ActivityRecord;
use std::ops::Range;

/// Ordered, append-only records that share one activity name.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityBucket {
    name: String,
    records: Vec<ActivityRecord>,
}

impl ActivityBucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ActivityRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[ActivityRecord] {
        &self.records
    }

    /// Records in `range`, clamped to what has been appended so far.
    pub fn slice(&self, range: Range<usize>) -> &[ActivityRecord] {
        let end = range.end.min(self.records.len());
        let start = range.start.min(end);
        &self.records[start..end]
    }

    pub(crate) fn push(&mut self, record: ActivityRecord) {
        self.records.push(record);
    }
}
