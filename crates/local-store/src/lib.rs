//! Local entity store for the Wayfarer client core.
//!
//! This crate provides:
//! - The [`LocalStore`] contract the sync coordinator reconciles against
//! - The syncable entity model (journals, activities, contacts) with
//!   tombstones and optional server ids
//! - A SQLite implementation over an async executor with a dedicated thread
//! - Change notifications emitted after commit
//!
//! # Architecture
//!
//! ```ignore
//! let store = SqliteLocalStore::open(path).await?;
//! let id = store.insert(NewEntity::local(account, EntityKind::Journal, fields)).await?;
//! let rows = store.query(EntityFilter::visible(&account, EntityKind::Journal)).await?;
//! ```
//!
//! **Important**: UI-facing reads go through [`EntityFilter::visible`], which
//! excludes tombstoned rows. The coordinator sees everything.

mod change;
mod error;
mod executor;
pub mod migrations;
pub mod queries;
mod store;
mod types;

pub use change::{BroadcastSink, ChangeSink, NullSink, RecordingSink, StoreChange};
pub use error::{StoreError, StoreResult};
pub use executor::AsyncDatabase;
pub use migrations::run_migrations;
pub use store::{LocalStore, SqliteLocalStore};
pub use types::{
    DeleteState, EntityFilter, EntityKind, Fields, LocalId, NewEntity, ServerIdFilter, SyncState,
    SyncableEntity,
};
