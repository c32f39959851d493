// # Owned Set
//
// The reconciler's memory of which records it asserted. Each entry carries
// the last time the record was observed as desired. The timestamp is
// unknown only for entries loaded from a document that did not record one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::record::Record;

/// Records this reconciler created and is responsible for removing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedSet {
    entries: HashMap<Record, Option<DateTime<Utc>>>,
}

impl OwnedSet {
    /// Create an empty owned set
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the record is owned
    pub fn contains(&self, record: &Record) -> bool {
        self.entries.contains_key(record)
    }

    /// Last-seen timestamp of an owned record
    ///
    /// Returns `None` both for records that are not owned and for owned
    /// records whose timestamp is unknown. Use [`OwnedSet::contains`] to
    /// tell them apart.
    pub fn last_seen(&self, record: &Record) -> Option<DateTime<Utc>> {
        self.entries.get(record).copied().flatten()
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, record: Record, last_seen: Option<DateTime<Utc>>) {
        self.entries.insert(record, last_seen);
    }

    /// Take ownership of a record unless it is owned already
    ///
    /// An existing entry keeps its timestamp.
    pub fn adopt(&mut self, record: Record, now: DateTime<Utc>) {
        self.entries.entry(record).or_insert(Some(now));
    }

    /// Refresh the timestamp of an owned record
    ///
    /// Returns `false` if the record is not owned.
    pub fn touch(&mut self, record: &Record, now: DateTime<Utc>) -> bool {
        match self.entries.get_mut(record) {
            Some(seen) => {
                *seen = Some(now);
                true
            }
            None => false,
        }
    }

    /// Drop ownership entirely
    pub fn remove(&mut self, record: &Record) -> bool {
        self.entries.remove(record).is_some()
    }

    /// Iterate over owned records and their timestamps
    pub fn iter(&self) -> impl Iterator<Item = (&Record, Option<DateTime<Utc>>)> {
        self.entries.iter().map(|(r, seen)| (r, *seen))
    }

    /// Owned records in deterministic order
    pub fn sorted_records(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self.entries.keys().cloned().collect();
        records.sort();
        records
    }

    /// Number of owned records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is owned
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(Record, Option<DateTime<Utc>>)> for OwnedSet {
    fn from_iter<I: IntoIterator<Item = (Record, Option<DateTime<Utc>>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
