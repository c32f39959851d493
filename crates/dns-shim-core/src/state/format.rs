// # State Document Format
//
// Encoding and migration of the persisted owned set.
//
// ## Current Format (version 2)
//
// ```json
// {
//   "version": 2,
//   "owned": [["a.lan", "10.0.0.5"], ["x.lan", "y.lan"]],
//   "last_seen": [["a.lan", "10.0.0.5", 1700000000]]
// }
// ```
//
// `last_seen` holds unix seconds. An owned record without a `last_seen`
// entry loads with an unknown timestamp.
//
// ## Legacy Shapes
//
// - Bare array of `[name, target]` pairs
// - Bare array of `[name, target, "YYYY-MM-DD HH:MM:SS"]` triples (local time)
// - `{"version": 1, "owned": [[name, target], ...]}`
//
// Records without a timestamp get `now`. Decoding a version 2 document
// is lossless, so re-encoding and decoding again is a fixed point.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::owned::OwnedSet;
use crate::record::Record;

/// Version written by [`encode`]
pub const STATE_FORMAT_VERSION: u32 = 2;

/// Timestamp format of the oldest triple-shaped files
const LEGACY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Shape a document was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentShape {
    /// Bare array, pairs or dated triples
    LegacyList,
    /// Version 1 object, no timestamps
    V1,
    /// Current versioned object
    V2,
}

/// Result of decoding a state document
#[derive(Debug, Clone)]
pub struct Decoded {
    /// The owned set
    pub owned: OwnedSet,
    /// The shape it was read from
    pub shape: DocumentShape,
}

impl Decoded {
    /// Whether the source should be rewritten in the current format
    pub fn needs_upgrade(&self) -> bool {
        self.shape != DocumentShape::V2
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    #[serde(default)]
    owned: Vec<(String, String)>,
    #[serde(default)]
    last_seen: Vec<(String, String, i64)>,
}

/// Decode a state document of any supported shape
///
/// `now` is used for records that carry no timestamp.
pub fn decode(content: &str, now: DateTime<Utc>) -> Result<Decoded> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| Error::state_store(format!("Failed to parse state document: {}", e)))?;

    match value {
        Value::Array(entries) => Ok(Decoded {
            owned: decode_legacy_list(&entries, now),
            shape: DocumentShape::LegacyList,
        }),
        Value::Object(_) => {
            let document: StateDocument = serde_json::from_value(value).map_err(|e| {
                Error::state_store(format!("Failed to parse versioned state document: {}", e))
            })?;
            decode_versioned(document, now)
        }
        other => Err(Error::state_store(format!(
            "Unexpected state document root: {}",
            json_type(&other)
        ))),
    }
}

/// Encode the owned set as a current-version document
///
/// Output is sorted so identical sets produce identical files.
pub fn encode(owned: &OwnedSet) -> Result<String> {
    let records = owned.sorted_records();

    let document = StateDocument {
        version: STATE_FORMAT_VERSION,
        owned: records
            .iter()
            .map(|r| (r.name().to_string(), r.target().to_string()))
            .collect(),
        last_seen: records
            .iter()
            .filter_map(|r| {
                owned
                    .last_seen(r)
                    .map(|seen| (r.name().to_string(), r.target().to_string(), seen.timestamp()))
            })
            .collect(),
    };

    serde_json::to_string_pretty(&document)
        .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))
}

fn decode_versioned(document: StateDocument, now: DateTime<Utc>) -> Result<Decoded> {
    match document.version {
        0 | 1 => {
            let owned = document
                .owned
                .into_iter()
                .map(|(name, target)| (Record::new(name, target), Some(now)))
                .collect();
            Ok(Decoded {
                owned,
                shape: DocumentShape::V1,
            })
        }
        version => {
            if version > STATE_FORMAT_VERSION {
                tracing::warn!(
                    "State document version {} is newer than supported {}. \
                    Attempting to load anyway.",
                    version,
                    STATE_FORMAT_VERSION
                );
            }

            let mut owned: OwnedSet = document
                .owned
                .into_iter()
                .map(|(name, target)| (Record::new(name, target), None))
                .collect();

            for (name, target, secs) in document.last_seen {
                let record = Record::new(name, target);
                if !owned.contains(&record) {
                    tracing::debug!("Ignoring last_seen for unowned record {}", record);
                    continue;
                }
                match DateTime::from_timestamp(secs, 0) {
                    Some(seen) => owned.insert(record, Some(seen)),
                    None => tracing::warn!("Ignoring out-of-range last_seen for {}", record),
                }
            }

            Ok(Decoded {
                owned,
                shape: DocumentShape::V2,
            })
        }
    }
}

fn decode_legacy_list(entries: &[Value], now: DateTime<Utc>) -> OwnedSet {
    let mut owned = OwnedSet::new();

    for entry in entries {
        let fields = match entry.as_array() {
            Some(fields) if fields.len() == 2 || fields.len() == 3 => fields,
            _ => {
                tracing::warn!("Skipping malformed legacy state entry: {}", entry);
                continue;
            }
        };

        let (Some(name), Some(target)) = (fields[0].as_str(), fields[1].as_str()) else {
            tracing::warn!("Skipping malformed legacy state entry: {}", entry);
            continue;
        };

        let seen = fields
            .get(2)
            .and_then(Value::as_str)
            .and_then(parse_legacy_date)
            .unwrap_or(now);

        owned.insert(Record::new(name, target), Some(seen));
    }

    owned
}

fn parse_legacy_date(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, LEGACY_DATE_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
