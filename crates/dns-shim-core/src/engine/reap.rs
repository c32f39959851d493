//! Grace-period policy for removing stale records
//!
//! A record that stops being desired is kept until it has been unseen for
//! longer than the grace period. This absorbs workload restarts without
//! withdrawing and republishing records.

use chrono::{DateTime, Duration, Utc};

use crate::owned::OwnedSet;
use crate::record::Record;

/// Outcome of evaluating one stale record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapDecision {
    /// Grace period elapsed, delete now
    Remove,
    /// Keep for at least `remaining` longer
    Defer { remaining: Duration },
}

/// Reap policy over an owned set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapPolicy {
    grace: Duration,
}

impl ReapPolicy {
    /// Create a policy with the given grace period
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Configured grace period
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Decide whether a stale owned record may be removed at `now`
    ///
    /// A record with an unknown timestamp starts its grace period now, so
    /// nothing is removed before the shim has watched it for a full period.
    /// Deferral never advances a known timestamp.
    pub fn evaluate(&self, owned: &mut OwnedSet, record: &Record, now: DateTime<Utc>) -> ReapDecision {
        match owned.last_seen(record) {
            Some(seen) => {
                let age = now.signed_duration_since(seen);
                if age > self.grace {
                    ReapDecision::Remove
                } else {
                    ReapDecision::Defer {
                        remaining: self.grace.checked_sub(&age).unwrap_or(self.grace),
                    }
                }
            }
            None => {
                owned.touch(record, now);
                ReapDecision::Defer {
                    remaining: self.grace,
                }
            }
        }
    }
}
