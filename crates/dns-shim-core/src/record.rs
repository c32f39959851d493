// # Records
//
// A record is the unit of ownership, diffing and persistence: one
// `name -> target` mapping declared by a workload label.
//
// The target decides the record kind. An IPv4 literal makes an address
// (host) record, anything else is an alias (CNAME) record. Malformed
// targets are never rejected locally; the directory is the judge.

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;

use serde_json::Value;

use crate::error::{Error, Result};

/// Which directory sub-API a record is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Name resolves to an IPv4 address
    Address,
    /// Name resolves to another name
    Alias,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Address => f.write_str("address"),
            RecordKind::Alias => f.write_str("alias"),
        }
    }
}

/// A declared DNS mapping
///
/// Equality is exact on both fields. No case folding or trailing-dot
/// normalization is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Record {
    name: String,
    target: String,
}

impl Record {
    /// Create a new record
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
        }
    }

    /// The name being published
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address literal or alias target
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Derive the record kind from the target
    pub fn kind(&self) -> RecordKind {
        if self.target.parse::<Ipv4Addr>().is_ok() {
            RecordKind::Address
        } else {
            RecordKind::Alias
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.name, self.target)
    }
}

/// Snapshot of the remote directory content, fetched once per pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActualRecords {
    /// Address records currently published
    pub addresses: HashSet<Record>,
    /// Alias records currently published
    pub aliases: HashSet<Record>,
}

impl ActualRecords {
    /// Create a snapshot from the two record lists
    pub fn new(addresses: HashSet<Record>, aliases: HashSet<Record>) -> Self {
        Self { addresses, aliases }
    }

    /// Whether the record is published under its own kind
    pub fn contains(&self, record: &Record) -> bool {
        match record.kind() {
            RecordKind::Address => self.addresses.contains(record),
            RecordKind::Alias => self.aliases.contains(record),
        }
    }

    /// Whether the record is published under either kind
    pub fn contains_any(&self, record: &Record) -> bool {
        self.addresses.contains(record) || self.aliases.contains(record)
    }

    /// Total number of published records
    pub fn len(&self) -> usize {
        self.addresses.len() + self.aliases.len()
    }

    /// True when the directory holds no records at all
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.aliases.is_empty()
    }
}

/// Parse the value of a record label
///
/// The label holds a JSON array of `[name, target]` pairs. Invalid JSON
/// or a non-array value fails the whole label. A single malformed entry
/// inside a valid array is logged and skipped.
pub fn parse_record_label(raw: &str) -> Result<Vec<Record>> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::invalid_input(format!("record label is not valid JSON: {}", e)))?;

    let entries = value
        .as_array()
        .ok_or_else(|| Error::invalid_input("record label must be a JSON array"))?;

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        match record_from_pair(entry) {
            Some(record) => records.push(record),
            None => tracing::warn!("Skipping malformed record entry: {}", entry),
        }
    }

    Ok(records)
}

fn record_from_pair(entry: &Value) -> Option<Record> {
    let pair = entry.as_array()?;
    if pair.len() != 2 {
        return None;
    }

    let name = pair[0].as_str()?;
    let target = pair[1].as_str()?;
    if name.is_empty() || target.is_empty() {
        return None;
    }

    Some(Record::new(name, target))
}
