//! Bounded history of sync attempts.
//!
//! Every attempt a syncer makes is appended as a [`SyncInfo`]. The ledger keeps
//! the most recent records and evicts the oldest first. It exists for
//! inspection and debugging only.

use crate::{ObjectKey, RetryCount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// What caused an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Explicit trigger from the embedding application
    Manual,
    /// Periodic resync
    Auto,
}

impl TriggerKind {
    pub fn from_auto(auto: bool) -> Self {
        if auto {
            Self::Auto
        } else {
            Self::Manual
        }
    }
}

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Outcome {
    Success,
    /// Failed and scheduled for another attempt
    Failure { error: String },
    /// Failed and dropped; no further attempts without a new trigger
    FailureFinal { error: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_final_failure(&self) -> bool {
        matches!(self, Self::FailureFinal { .. })
    }
}

/// One processed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncInfo {
    /// Unique identifier of this attempt
    pub attempt_id: Uuid,
    pub key: ObjectKey,
    pub trigger: TriggerKind,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: Outcome,
    /// Failures the key had accumulated when this attempt started
    pub retry_count: RetryCount,
}

/// Fixed-capacity ring of [`SyncInfo`] records.
#[derive(Debug)]
pub struct SyncLedger {
    capacity: usize,
    records: Mutex<VecDeque<SyncInfo>>,
}

impl SyncLedger {
    /// Create a ledger holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, info: SyncInfo) {
        let mut records = self.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(info);
    }

    /// Copy of every retained record, oldest first.
    pub fn snapshot(&self) -> Vec<SyncInfo> {
        self.lock().iter().cloned().collect()
    }

    /// Retained records for one key, oldest first.
    pub fn records_for(&self, key: &str) -> Vec<SyncInfo> {
        self.lock()
            .iter()
            .filter(|info| info.key == key)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<SyncInfo>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
