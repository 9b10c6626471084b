//! Offline-first reconciliation of journals, activities and contacts.
//!
//! The crate provides:
//! - [`SyncCoordinator`]: local-first create, edit, soft-delete and fetch,
//!   with every remote call going through the auth-gated executor
//! - [`EntityRemote`]: the domain CRUD endpoints, with an HTTP adapter
//! - [`SyncWorker`]: background sync passes with per-account backoff
//!
//! ## Reconciliation states
//!
//! ```text
//! LocalOnly ──upload──▶ Uploading ──server id──▶ Synced
//! Active ──soft delete──▶ PendingDelete ──server confirms──▶ (removed)
//! ```
//!
//! A row that never reached the server skips `PendingDelete` entirely.

mod coordinator;
mod error;
mod remote;
mod worker;

#[cfg(test)]
mod testing;

pub use coordinator::{DeleteOutcome, SyncCoordinator, SyncReport};
pub use error::{SyncError, SyncResult};
pub use remote::{EntityRemote, HttpEntityRemote, RemoteEntity};
pub use worker::{SyncTrigger, SyncWorker, SyncWorkerConfig};
