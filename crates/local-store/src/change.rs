//! Change notifications.
//!
//! Changes are emitted after the corresponding write has committed. The
//! store only emits; sinks decide what a change means (refresh a list,
//! schedule a sync, nothing at all).

use crate::{EntityKind, LocalId};
use credential_store::AccountId;
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// A committed change to the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Inserted {
        local_id: LocalId,
        account_id: AccountId,
        kind: EntityKind,
    },
    Updated {
        local_id: LocalId,
        account_id: AccountId,
        kind: EntityKind,
    },
    TombstoneSet {
        local_id: LocalId,
        account_id: AccountId,
        tombstone: bool,
    },
    ServerIdAssigned {
        local_id: LocalId,
        server_id: i64,
    },
    Deleted {
        local_id: LocalId,
    },
    AccountPurged {
        account_id: AccountId,
        removed: usize,
    },
}

/// Receives committed changes.
pub trait ChangeSink: Send + Sync {
    fn emit(&self, change: StoreChange);
}

/// Discards all changes.
#[derive(Debug, Default)]
pub struct NullSink;

impl ChangeSink for NullSink {
    fn emit(&self, _change: StoreChange) {}
}

/// Records every change, for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    changes: Mutex<Vec<StoreChange>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> Vec<StoreChange> {
        self.changes.lock().clone()
    }

    pub fn clear(&self) {
        self.changes.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.changes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChangeSink for RecordingSink {
    fn emit(&self, change: StoreChange) {
        self.changes.lock().push(change);
    }
}

/// Fans changes out to any number of subscribers (UI observers).
///
/// Slow subscribers lag and lose the oldest changes rather than blocking
/// writers.
#[derive(Debug)]
pub struct BroadcastSink {
    sender: broadcast::Sender<StoreChange>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChangeSink for BroadcastSink {
    fn emit(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.sender.send(change);
    }
}
