//! The local store contract and its SQLite implementation.

use crate::{
    queries, AsyncDatabase, ChangeSink, EntityFilter, Fields, LocalId, NewEntity, NullSink,
    StoreChange, StoreError, StoreResult, SyncableEntity,
};
use async_trait::async_trait;
use credential_store::AccountId;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Persistent, tombstone-aware cache of syncable entities.
///
/// Implementations must be safe under concurrent use from many in-flight
/// operations. Each call is atomic on its own row.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Insert a row and return its local id.
    async fn insert(&self, entity: NewEntity) -> StoreResult<LocalId>;

    /// Merge `fields` into a row.
    async fn update(&self, local_id: LocalId, fields: Fields) -> StoreResult<SyncableEntity>;

    /// Physically remove a row. Returns whether it existed.
    async fn delete(&self, local_id: LocalId) -> StoreResult<bool>;

    async fn query(&self, filter: EntityFilter) -> StoreResult<Vec<SyncableEntity>>;

    /// Set the tombstone flag. Returns `false` when it already had that
    /// value, which makes concurrent soft-deletes race-free.
    async fn set_tombstone(&self, local_id: LocalId, tombstone: bool) -> StoreResult<bool>;

    async fn get(&self, local_id: LocalId) -> StoreResult<Option<SyncableEntity>>;

    /// Record the server id of a row confirmed created.
    ///
    /// Another row already holding `server_id` for the same account and
    /// kind (inserted by a fetch that raced the upload) is folded into this
    /// one, so each server entity keeps a single local row.
    async fn assign_server_id(&self, local_id: LocalId, server_id: i64)
        -> StoreResult<SyncableEntity>;

    /// Remove every row of an account. Returns the number removed.
    async fn delete_account(&self, account_id: &AccountId) -> StoreResult<usize>;
}

/// SQLite-backed [`LocalStore`].
#[derive(Clone)]
pub struct SqliteLocalStore {
    db: AsyncDatabase,
    sink: Arc<dyn ChangeSink>,
}

impl SqliteLocalStore {
    /// Open the store at `path`.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        Ok(Self::new(AsyncDatabase::open(path).await?))
    }

    /// Open a private in-memory store.
    pub async fn in_memory() -> StoreResult<Self> {
        Ok(Self::new(AsyncDatabase::open_in_memory().await?))
    }

    pub fn new(db: AsyncDatabase) -> Self {
        Self {
            db,
            sink: Arc::new(NullSink),
        }
    }

    /// Emit changes to `sink` after each committed write.
    pub fn with_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn database(&self) -> &AsyncDatabase {
        &self.db
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn insert(&self, entity: NewEntity) -> StoreResult<LocalId> {
        let inserted = self
            .db
            .call(move |conn| queries::insert_entity(conn, &entity))
            .await?;

        debug!(
            local_id = inserted.local_id,
            kind = %inserted.kind,
            server_id = ?inserted.server_id,
            "Entity inserted"
        );
        self.sink.emit(StoreChange::Inserted {
            local_id: inserted.local_id,
            account_id: inserted.account_id,
            kind: inserted.kind,
        });
        Ok(inserted.local_id)
    }

    async fn update(&self, local_id: LocalId, fields: Fields) -> StoreResult<SyncableEntity> {
        let updated = self
            .db
            .call(move |conn| queries::update_fields(conn, local_id, &fields))
            .await?;

        self.sink.emit(StoreChange::Updated {
            local_id,
            account_id: updated.account_id.clone(),
            kind: updated.kind,
        });
        Ok(updated)
    }

    async fn delete(&self, local_id: LocalId) -> StoreResult<bool> {
        let existed = self
            .db
            .call(move |conn| queries::delete_entity(conn, local_id))
            .await?;

        if existed {
            debug!(local_id, "Entity deleted");
            self.sink.emit(StoreChange::Deleted { local_id });
        }
        Ok(existed)
    }

    async fn query(&self, filter: EntityFilter) -> StoreResult<Vec<SyncableEntity>> {
        self.db
            .call(move |conn| queries::query_entities(conn, &filter))
            .await
    }

    async fn set_tombstone(&self, local_id: LocalId, tombstone: bool) -> StoreResult<bool> {
        let changed = self
            .db
            .call(move |conn| {
                let changed = queries::set_tombstone(conn, local_id, tombstone)?;
                let entity =
                    queries::get_entity(conn, local_id)?.ok_or(StoreError::NotFound(local_id))?;
                Ok((changed, entity.account_id))
            })
            .await?;

        match changed {
            (true, account_id) => {
                debug!(local_id, tombstone, "Tombstone changed");
                self.sink.emit(StoreChange::TombstoneSet {
                    local_id,
                    account_id,
                    tombstone,
                });
                Ok(true)
            }
            (false, _) => Ok(false),
        }
    }

    async fn get(&self, local_id: LocalId) -> StoreResult<Option<SyncableEntity>> {
        self.db
            .call(move |conn| queries::get_entity(conn, local_id))
            .await
    }

    async fn assign_server_id(
        &self,
        local_id: LocalId,
        server_id: i64,
    ) -> StoreResult<SyncableEntity> {
        let (entity, folded) = self
            .db
            .call(move |conn| queries::assign_server_id(conn, local_id, server_id))
            .await?;

        if let Some(folded) = folded {
            self.sink.emit(StoreChange::Deleted { local_id: folded });
        }
        self.sink
            .emit(StoreChange::ServerIdAssigned { local_id, server_id });
        Ok(entity)
    }

    async fn delete_account(&self, account_id: &AccountId) -> StoreResult<usize> {
        let account = account_id.clone();
        let removed = self
            .db
            .call(move |conn| queries::delete_account_entities(conn, &account))
            .await?;

        self.sink.emit(StoreChange::AccountPurged {
            account_id: account_id.clone(),
            removed,
        });
        Ok(removed)
    }
}
