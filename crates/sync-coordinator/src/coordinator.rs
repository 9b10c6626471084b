//! Reconciliation between the local store and the domain endpoints.
//!
//! Local writes always happen first and are never rolled back. Remote
//! calls go through the auth-gated executor; when one fails the row keeps
//! its reconciliation state (`server_id == None` or `tombstone`) and a sync
//! pass is requested so it gets another chance.

use crate::worker::SyncTrigger;
use crate::{EntityRemote, RemoteEntity, SyncError, SyncResult};
use credential_store::AccountId;
use gated_executor::{
    classify_transport_error, AuthGatedExecutor, GatedError, RequestScope, TransportError,
};
use local_store::{
    EntityFilter, EntityKind, Fields, LocalId, LocalStore, NewEntity, ServerIdFilter, StoreError,
    SyncState, SyncableEntity,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a soft-delete did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Never uploaded; removed locally without a request.
    Removed,
    /// Deleted on the server, then removed locally.
    Deleted,
    /// Tombstoned; the remote delete is left to the next sync pass because
    /// another operation on the row is in flight.
    Deferred,
    /// Already tombstoned. Nothing was sent.
    AlreadyPending,
    /// No such row.
    Missing,
}

/// Counters for one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub uploaded: usize,
    /// Edits of synced rows sent after an earlier attempt failed.
    pub updated: usize,
    pub deleted: usize,
    /// Tombstoned rows the server never knew about.
    pub discarded: usize,
    /// Rows with another operation in flight.
    pub skipped: usize,
    pub failed: usize,
}

impl SyncReport {
    /// Nothing is left for a later pass.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Rows with a remote operation in flight.
#[derive(Clone, Default)]
struct InFlightSet(Arc<Mutex<HashSet<LocalId>>>);

impl InFlightSet {
    fn claim(&self, local_id: LocalId) -> Option<InFlight> {
        if self.0.lock().insert(local_id) {
            Some(InFlight {
                set: self.clone(),
                local_id,
            })
        } else {
            None
        }
    }

    fn contains(&self, local_id: LocalId) -> bool {
        self.0.lock().contains(&local_id)
    }
}

/// Releases its row on drop.
struct InFlight {
    set: InFlightSet,
    local_id: LocalId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.0.lock().remove(&self.local_id);
    }
}

/// Orchestrates creates, edits, deletes and fetches for syncable entities.
pub struct SyncCoordinator {
    executor: AuthGatedExecutor,
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn EntityRemote>,
    /// Lifetime of the coordinator's own remote calls.
    scope: RequestScope,
    in_flight: InFlightSet,
    /// Synced rows whose latest local edit has not reached the server.
    unsent_edits: Arc<Mutex<HashSet<LocalId>>>,
    trigger: Option<SyncTrigger>,
}

impl SyncCoordinator {
    pub fn new(
        executor: AuthGatedExecutor,
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn EntityRemote>,
    ) -> Self {
        Self {
            executor,
            store,
            remote,
            scope: RequestScope::new(),
            in_flight: InFlightSet::default(),
            unsent_edits: Arc::default(),
            trigger: None,
        }
    }

    /// Route sync requests to a background worker.
    pub fn with_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// Create an entity locally, then on the server.
    ///
    /// The row exists locally (LocalOnly) before any request is sent. If
    /// the upload fails the row stays and a sync is requested.
    pub async fn create(
        &self,
        account: &AccountId,
        kind: EntityKind,
        fields: Fields,
    ) -> SyncResult<SyncableEntity> {
        let local_id = self
            .store
            .insert(NewEntity::local(account.clone(), kind, fields))
            .await?;
        let entity = self
            .store
            .get(local_id)
            .await?
            .ok_or(SyncError::NotFound(local_id))?;
        let Some(_claim) = self.in_flight.claim(local_id) else {
            self.request_sync(account);
            return Ok(entity);
        };

        self.upload(&entity).await.inspect_err(|e| {
            warn!(local_id, account = %account, error = %e, "Upload failed, row kept local-only");
            self.request_sync(account);
        })
    }

    /// Apply an edit locally, then send it to the server.
    ///
    /// The local edit is kept when the remote update fails.
    pub async fn update(&self, local_id: LocalId, fields: Fields) -> SyncResult<SyncableEntity> {
        let entity = match self.store.update(local_id, fields).await {
            Err(StoreError::NotFound(id)) => return Err(SyncError::NotFound(id)),
            other => other?,
        };
        if entity.tombstone {
            return Ok(entity);
        }
        let Some(server_id) = entity.server_id else {
            // The upload carries the latest fields.
            self.request_sync(&entity.account_id);
            return Ok(entity);
        };

        self.push_edit(&entity, server_id).await.inspect_err(|e| {
            warn!(local_id, server_id, error = %e, "Remote update failed, local edit kept");
            self.request_sync(&entity.account_id);
        })?;
        Ok(entity)
    }

    /// Delete an entity.
    ///
    /// Rows the server never saw are removed at once without a request.
    /// Other rows are tombstoned before anything is sent, so visible reads
    /// stop returning them immediately; the row is removed once the server
    /// confirms. A second call on a tombstoned row sends nothing.
    pub async fn soft_delete(&self, local_id: LocalId) -> SyncResult<DeleteOutcome> {
        let Some(entity) = self.store.get(local_id).await? else {
            return Ok(DeleteOutcome::Missing);
        };

        if entity.is_local_only() {
            let removed = self.store.delete(local_id).await?;
            debug!(local_id, "Local-only entity removed");
            return Ok(if removed {
                DeleteOutcome::Removed
            } else {
                DeleteOutcome::Missing
            });
        }

        let claim = self.in_flight.claim(local_id);
        match self.store.set_tombstone(local_id, true).await {
            Ok(true) => {}
            Ok(false) => return Ok(DeleteOutcome::AlreadyPending),
            Err(StoreError::NotFound(_)) => return Ok(DeleteOutcome::Missing),
            Err(e) => return Err(e.into()),
        }
        let Some(_claim) = claim else {
            self.request_sync(&entity.account_id);
            return Ok(DeleteOutcome::Deferred);
        };

        self.remove_synced(&entity).await.inspect_err(|e| {
            warn!(local_id, error = %e, "Remote delete failed, tombstone kept");
            self.request_sync(&entity.account_id);
        })?;
        Ok(DeleteOutcome::Deleted)
    }

    /// Fetch the server's entities of `kind` and merge them.
    pub async fn fetch(
        &self,
        account: &AccountId,
        kind: EntityKind,
    ) -> SyncResult<Vec<SyncableEntity>> {
        let batch = self
            .gated(account, |token| {
                let remote = self.remote.clone();
                async move { remote.fetch(&token, kind).await }
            })
            .await?;
        self.merge_fetched(account, kind, batch).await
    }

    /// Merge a fetched batch into the local store.
    ///
    /// Rows with a matching server id are overwritten in place, unknown
    /// server ids are inserted, tombstoned rows are not resurrected and
    /// local rows absent from the batch are left untouched. Returns the
    /// visible rows: local-only rows newest first, then synced rows in
    /// batch order, then synced rows the batch did not mention.
    pub async fn merge_fetched(
        &self,
        account: &AccountId,
        kind: EntityKind,
        batch: Vec<RemoteEntity>,
    ) -> SyncResult<Vec<SyncableEntity>> {
        let existing = self
            .store
            .query(EntityFilter::for_account(account).with_kind(kind))
            .await?;
        let by_server_id: HashMap<i64, &SyncableEntity> = existing
            .iter()
            .filter_map(|row| row.server_id.map(|id| (id, row)))
            .collect();

        let mut order = Vec::with_capacity(batch.len());
        let mut seen = HashSet::new();
        let (mut inserted, mut updated) = (0usize, 0usize);
        for remote in batch {
            if !seen.insert(remote.server_id) {
                continue;
            }
            order.push(remote.server_id);
            match by_server_id.get(&remote.server_id) {
                Some(row) if row.tombstone => {}
                Some(row) => {
                    self.store.update(row.local_id, remote.fields).await?;
                    updated += 1;
                }
                None => {
                    let row = NewEntity::fetched(account.clone(), kind, remote.server_id, remote.fields);
                    match self.store.insert(row).await {
                        Ok(_) => inserted += 1,
                        // An upload claimed this server id after the read above.
                        Err(e) if e.is_constraint_violation() => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        debug!(account = %account, %kind, inserted, updated, "Fetched batch merged");

        let visible = self.visible(account, kind).await?;
        let (local_only, synced): (Vec<_>, Vec<_>) =
            visible.into_iter().partition(|row| row.is_local_only());
        let position: HashMap<i64, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let (mut in_batch, rest): (Vec<_>, Vec<_>) = synced
            .into_iter()
            .partition(|row| row.server_id.is_some_and(|id| position.contains_key(&id)));
        in_batch.sort_by_key(|row| row.server_id.and_then(|id| position.get(&id).copied()));

        Ok(local_only.into_iter().chain(in_batch).chain(rest).collect())
    }

    /// Rows of `kind` for display: tombstones excluded, local-only rows
    /// first, newest first within each group.
    pub async fn visible(
        &self,
        account: &AccountId,
        kind: EntityKind,
    ) -> SyncResult<Vec<SyncableEntity>> {
        let mut rows = self
            .store
            .query(EntityFilter::visible(account, kind))
            .await?;
        rows.sort_by(|a, b| {
            b.is_local_only()
                .cmp(&a.is_local_only())
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.local_id.cmp(&a.local_id))
        });
        Ok(rows)
    }

    /// Upload state of a row, `Uploading` included.
    pub async fn sync_state(&self, local_id: LocalId) -> SyncResult<Option<SyncState>> {
        let Some(entity) = self.store.get(local_id).await? else {
            return Ok(None);
        };
        Ok(Some(match entity.sync_state() {
            SyncState::LocalOnly if self.in_flight.contains(local_id) => SyncState::Uploading,
            state => state,
        }))
    }

    /// Reconcile every pending row of `account` once.
    ///
    /// Local-only rows are uploaded and tombstoned rows deleted on the
    /// server. Rows with an operation in flight are skipped. A failure that
    /// would repeat for every row (credentials, shutdown) ends the pass.
    pub async fn sync_pass(&self, account: &AccountId) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();

        let never_uploaded = EntityFilter {
            tombstone: Some(true),
            server_id: ServerIdFilter::Unassigned,
            ..EntityFilter::for_account(account)
        };
        for row in self.store.query(never_uploaded).await? {
            if self.store.delete(row.local_id).await? {
                report.discarded += 1;
            }
        }

        for row in self.store.query(EntityFilter::local_only(account)).await? {
            let Some(_claim) = self.in_flight.claim(row.local_id) else {
                report.skipped += 1;
                continue;
            };
            match self.upload(&row).await {
                Ok(_) => report.uploaded += 1,
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    debug!(local_id = row.local_id, error = %e, "Upload failed during sync");
                    report.failed += 1;
                }
            }
        }

        let unsent: Vec<LocalId> = self.unsent_edits.lock().iter().copied().collect();
        for local_id in unsent {
            let Some(row) = self.store.get(local_id).await? else {
                self.unsent_edits.lock().remove(&local_id);
                continue;
            };
            if &row.account_id != account {
                continue;
            }
            let Some(server_id) = row.server_id.filter(|_| !row.tombstone) else {
                self.unsent_edits.lock().remove(&local_id);
                continue;
            };
            let Some(_claim) = self.in_flight.claim(local_id) else {
                report.skipped += 1;
                continue;
            };
            match self.push_edit(&row, server_id).await {
                Ok(()) => report.updated += 1,
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    debug!(local_id, error = %e, "Update failed during sync");
                    report.failed += 1;
                }
            }
        }

        for row in self.store.query(EntityFilter::pending_delete(account)).await? {
            let Some(_claim) = self.in_flight.claim(row.local_id) else {
                report.skipped += 1;
                continue;
            };
            match self.remove_synced(&row).await {
                Ok(()) => report.deleted += 1,
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    debug!(local_id = row.local_id, error = %e, "Delete failed during sync");
                    report.failed += 1;
                }
            }
        }

        info!(
            account = %account,
            uploaded = report.uploaded,
            updated = report.updated,
            deleted = report.deleted,
            discarded = report.discarded,
            skipped = report.skipped,
            failed = report.failed,
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Ask for a background sync pass for `account`.
    pub fn request_sync(&self, account: &AccountId) {
        match &self.trigger {
            Some(trigger) => trigger.request(account),
            None => debug!(account = %account, "No sync worker attached, request dropped"),
        }
    }

    /// Remove every local row of `account`.
    pub async fn purge_account(&self, account: &AccountId) -> SyncResult<usize> {
        let removed = self.store.delete_account(account).await?;
        info!(account = %account, removed, "Local rows purged");
        Ok(removed)
    }

    /// Stop all in-flight remote calls. Their results are dropped and
    /// rows keep their pending state.
    pub fn shutdown(&self) {
        self.scope.teardown();
    }

    async fn upload(&self, entity: &SyncableEntity) -> SyncResult<SyncableEntity> {
        let kind = entity.kind;
        let created = self
            .gated(&entity.account_id, |token| {
                let remote = self.remote.clone();
                let fields = entity.fields.clone();
                async move { remote.create(&token, kind, &fields).await }
            })
            .await?;

        match self.store.assign_server_id(entity.local_id, created.server_id).await {
            Ok(synced) => {
                debug!(local_id = entity.local_id, server_id = created.server_id, "Entity uploaded");
                if synced.fields != entity.fields && !synced.tombstone {
                    // Edited while the create was in flight.
                    if let Err(e) = self.push_edit(&synced, created.server_id).await {
                        warn!(local_id = entity.local_id, error = %e, "Edit made during upload not sent yet");
                        self.request_sync(&entity.account_id);
                    }
                }
                Ok(synced)
            }
            Err(StoreError::NotFound(local_id)) => {
                // Deleted locally while the create was in flight.
                warn!(local_id, server_id = created.server_id, "Row vanished during upload, deleting server copy");
                self.delete_remote(&entity.account_id, kind, created.server_id)
                    .await?;
                Err(SyncError::NotFound(local_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send the row's current fields. Until that succeeds the row stays
    /// in the unsent set that sync passes work through.
    async fn push_edit(&self, entity: &SyncableEntity, server_id: i64) -> SyncResult<()> {
        let kind = entity.kind;
        let result = self
            .gated(&entity.account_id, |token| {
                let remote = self.remote.clone();
                let fields = entity.fields.clone();
                async move { remote.update(&token, kind, server_id, &fields).await }
            })
            .await;

        let mut unsent = self.unsent_edits.lock();
        match result {
            Ok(()) => {
                unsent.remove(&entity.local_id);
                debug!(local_id = entity.local_id, server_id, "Entity updated");
                Ok(())
            }
            Err(e) => {
                unsent.insert(entity.local_id);
                Err(e)
            }
        }
    }

    /// Delete a tombstoned row on the server, then locally.
    async fn remove_synced(&self, entity: &SyncableEntity) -> SyncResult<()> {
        let Some(server_id) = entity.server_id else {
            self.store.delete(entity.local_id).await?;
            return Ok(());
        };
        self.delete_remote(&entity.account_id, entity.kind, server_id)
            .await?;
        self.store.delete(entity.local_id).await?;
        debug!(local_id = entity.local_id, server_id, "Entity deleted");
        Ok(())
    }

    async fn delete_remote(
        &self,
        account: &AccountId,
        kind: EntityKind,
        server_id: i64,
    ) -> SyncResult<()> {
        let result = self
            .gated(account, |token| {
                let remote = self.remote.clone();
                async move { remote.delete(&token, kind, server_id).await }
            })
            .await;
        match result {
            // Already gone on the server.
            Err(SyncError::Remote(GatedError::Request(TransportError::Status {
                status: 404,
                ..
            }))) => Ok(()),
            other => other,
        }
    }

    async fn gated<T, F, Fut>(&self, account: &AccountId, dispatch: F) -> SyncResult<T>
    where
        F: FnMut(String) -> Fut + Send,
        Fut: Future<Output = Result<T, TransportError>> + Send,
        T: Send,
    {
        match self
            .executor
            .run(self.scope.ticket(), account, dispatch, classify_transport_error)
            .await
        {
            Some(result) => result.map_err(SyncError::from),
            None => Err(SyncError::Cancelled),
        }
    }
}

fn is_fatal(error: &SyncError) -> bool {
    error.requires_credentials() || matches!(error, SyncError::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRemote, RemoteCall, RotatingTokens};
    use local_store::SqliteLocalStore;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        coordinator: Arc<SyncCoordinator>,
        remote: Arc<FakeRemote>,
        tokens: Arc<RotatingTokens>,
        store: Arc<SqliteLocalStore>,
    }

    async fn harness_with(remote: Arc<FakeRemote>) -> Harness {
        let tokens = Arc::new(RotatingTokens::default());
        let store = Arc::new(SqliteLocalStore::in_memory().await.unwrap());
        let coordinator = SyncCoordinator::new(
            AuthGatedExecutor::new(tokens.clone()),
            store.clone(),
            remote.clone(),
        );
        Harness {
            coordinator: Arc::new(coordinator),
            remote,
            tokens,
            store,
        }
    }

    async fn harness() -> Harness {
        harness_with(FakeRemote::new()).await
    }

    fn account() -> AccountId {
        AccountId::new("a@example.com")
    }

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_server_id() {
        let h = harness().await;
        let a = account();

        let entity = h
            .coordinator
            .create(&a, EntityKind::Journal, fields(json!({ "title": "Porto" })))
            .await
            .unwrap();

        assert_eq!(entity.server_id, Some(1));
        assert_eq!(
            h.coordinator.sync_state(entity.local_id).await.unwrap(),
            Some(SyncState::Synced)
        );
    }

    #[tokio::test]
    async fn test_create_retries_once_with_fresh_token() {
        let h = harness_with(FakeRemote::starting_at(42)).await;
        h.remote.reject_token("tok-1");
        let a = account();

        let entity = h
            .coordinator
            .create(&a, EntityKind::Journal, fields(json!({ "title": "Douro" })))
            .await
            .unwrap();

        assert_eq!(entity.server_id, Some(42));
        assert_eq!(h.tokens.invalidations(), 1);
        assert_eq!(
            h.remote.calls(),
            vec![
                RemoteCall::Create {
                    token: "tok-1".to_string(),
                    kind: EntityKind::Journal
                },
                RemoteCall::Create {
                    token: "tok-2".to_string(),
                    kind: EntityKind::Journal
                },
            ]
        );

        // Later operations use the replacement token.
        h.coordinator
            .update(entity.local_id, fields(json!({ "title": "Douro valley" })))
            .await
            .unwrap();
        assert_eq!(
            h.remote.calls().last(),
            Some(&RemoteCall::Update {
                token: "tok-2".to_string(),
                server_id: 42
            })
        );
    }

    #[tokio::test]
    async fn test_failed_create_keeps_local_only_row() {
        let h = harness().await;
        h.remote.set_offline(true);
        let a = account();

        let error = h
            .coordinator
            .create(&a, EntityKind::Contact, fields(json!({ "name": "Rui" })))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), gated_executor::ErrorKind::IoError);

        let rows = h.store.query(EntityFilter::local_only(&a)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field("name"), Some(&json!("Rui")));
    }

    #[tokio::test]
    async fn test_local_only_delete_sends_nothing() {
        let h = harness().await;
        h.remote.set_offline(true);
        let a = account();
        let _ = h
            .coordinator
            .create(&a, EntityKind::Journal, Fields::new())
            .await;
        let local_id = h.store.query(EntityFilter::for_account(&a)).await.unwrap()[0].local_id;
        let calls_before = h.remote.calls().len();

        let outcome = h.coordinator.soft_delete(local_id).await.unwrap();

        assert_eq!(outcome, DeleteOutcome::Removed);
        assert_eq!(h.remote.calls().len(), calls_before);
        assert!(h.store.get(local_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_is_idempotent() {
        let h = harness().await;
        h.remote.set_offline(true);
        let a = account();
        let local_id = h
            .store
            .insert(NewEntity::fetched(a.clone(), EntityKind::Journal, 7, Fields::new()))
            .await
            .unwrap();

        // First call tombstones and fails remotely; the tombstone stays.
        assert!(h.coordinator.soft_delete(local_id).await.is_err());
        assert_eq!(h.remote.deletes(), 1);

        let outcome = h.coordinator.soft_delete(local_id).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::AlreadyPending);
        assert_eq!(h.remote.deletes(), 1);
        assert!(h.store.get(local_id).await.unwrap().unwrap().tombstone);
    }

    #[tokio::test]
    async fn test_tombstone_is_visible_before_delete_returns() {
        let h = harness().await;
        let a = account();
        let local_id = h
            .store
            .insert(NewEntity::fetched(a.clone(), EntityKind::Journal, 7, Fields::new()))
            .await
            .unwrap();
        let (started, release) = h.remote.hold_deletes();

        let coordinator = h.coordinator.clone();
        let delete = tokio::spawn(async move { coordinator.soft_delete(local_id).await });

        started.notified().await;
        let visible = h
            .store
            .query(EntityFilter::visible(&a, EntityKind::Journal))
            .await
            .unwrap();
        assert!(visible.is_empty());
        assert!(h.store.get(local_id).await.unwrap().is_some());

        release.notify_one();
        assert_eq!(delete.await.unwrap().unwrap(), DeleteOutcome::Deleted);
        assert!(h.store.get(local_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_deletes_send_one_request() {
        let h = harness().await;
        let a = account();
        let local_id = h
            .store
            .insert(NewEntity::fetched(a.clone(), EntityKind::Activity, 9, Fields::new()))
            .await
            .unwrap();
        let (started, release) = h.remote.hold_deletes();

        let first = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.soft_delete(local_id).await })
        };
        started.notified().await;
        let second = h.coordinator.soft_delete(local_id).await.unwrap();
        release.notify_one();

        assert_eq!(second, DeleteOutcome::AlreadyPending);
        assert_eq!(first.await.unwrap().unwrap(), DeleteOutcome::Deleted);
        assert_eq!(h.remote.deletes(), 1);
    }

    #[tokio::test]
    async fn test_edit_during_upload_reaches_server() {
        let h = harness().await;
        let a = account();
        let (started, release) = h.remote.hold_creates();

        let create = {
            let coordinator = h.coordinator.clone();
            let a = a.clone();
            tokio::spawn(async move {
                coordinator
                    .create(&a, EntityKind::Journal, fields(json!({ "title": "Old" })))
                    .await
            })
        };
        started.notified().await;
        let pending = h.store.query(EntityFilter::local_only(&a)).await.unwrap();
        let local_id = pending[0].local_id;
        h.coordinator
            .update(local_id, fields(json!({ "title": "New" })))
            .await
            .unwrap();
        release.notify_one();

        let created = create.await.unwrap().unwrap();
        assert_eq!(created.server_id, Some(1));
        assert_eq!(
            h.remote.server_fields(1).unwrap().get("title"),
            Some(&json!("New"))
        );

        let report = h.coordinator.sync_pass(&a).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(h.remote.creates(), 1);
    }

    #[tokio::test]
    async fn test_fetch_during_upload_keeps_one_row() {
        let h = harness().await;
        let a = account();
        let (started, release) = h.remote.hold_creates();

        let create = {
            let coordinator = h.coordinator.clone();
            let a = a.clone();
            tokio::spawn(async move {
                coordinator
                    .create(&a, EntityKind::Journal, fields(json!({ "title": "Lisbon" })))
                    .await
            })
        };
        started.notified().await;
        h.remote
            .serve_batch(vec![RemoteEntity::new(1, fields(json!({ "title": "Lisbon" })))]);
        h.coordinator.fetch(&a, EntityKind::Journal).await.unwrap();
        release.notify_one();

        let created = create.await.unwrap().unwrap();
        assert_eq!(created.server_id, Some(1));

        let rows = h.coordinator.visible(&a, EntityKind::Journal).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].local_id, created.local_id);
        assert_eq!(rows[0].server_id, Some(1));

        let report = h.coordinator.sync_pass(&a).await.unwrap();
        assert_eq!(report.uploaded, 0);
        assert_eq!(h.remote.creates(), 1);
    }

    #[tokio::test]
    async fn test_failed_edit_is_resent_by_sync_pass() {
        let h = harness().await;
        let a = account();
        let entity = h
            .coordinator
            .create(&a, EntityKind::Contact, fields(json!({ "name": "Rui" })))
            .await
            .unwrap();
        h.remote.set_offline(true);
        assert!(h
            .coordinator
            .update(entity.local_id, fields(json!({ "name": "Rui Costa" })))
            .await
            .is_err());
        h.remote.set_offline(false);

        let report = h.coordinator.sync_pass(&a).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(
            h.remote.server_fields(1).unwrap().get("name"),
            Some(&json!("Rui Costa"))
        );

        let again = h.coordinator.sync_pass(&a).await.unwrap();
        assert_eq!(again, SyncReport::default());
    }

    #[tokio::test]
    async fn test_update_is_not_rolled_back() {
        let h = harness().await;
        let a = account();
        let entity = h
            .coordinator
            .create(&a, EntityKind::Journal, fields(json!({ "title": "Old" })))
            .await
            .unwrap();
        h.remote.set_offline(true);

        let error = h
            .coordinator
            .update(entity.local_id, fields(json!({ "title": "New" })))
            .await
            .unwrap_err();
        assert!(error.user_message().is_some());

        let stored = h.store.get(entity.local_id).await.unwrap().unwrap();
        assert_eq!(stored.field("title"), Some(&json!("New")));
    }

    #[tokio::test]
    async fn test_update_of_missing_row() {
        let h = harness().await;
        assert!(matches!(
            h.coordinator.update(99, Fields::new()).await,
            Err(SyncError::NotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_refetch_keeps_server_id_without_duplicates() {
        let h = harness().await;
        let a = account();
        h.remote.set_offline(true);
        let _ = h
            .coordinator
            .create(&a, EntityKind::Journal, fields(json!({ "title": "Trip" })))
            .await;
        h.remote.set_offline(false);

        let report = h.coordinator.sync_pass(&a).await.unwrap();
        assert_eq!(report.uploaded, 1);

        h.remote.serve_batch(vec![RemoteEntity::new(
            1,
            fields(json!({ "title": "Trip (edited on server)" })),
        )]);
        let rows = h.coordinator.fetch(&a, EntityKind::Journal).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].server_id, Some(1));
        assert_eq!(rows[0].field("title"), Some(&json!("Trip (edited on server)")));
        assert_eq!(
            h.store.query(EntityFilter::for_account(&a)).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_merge_orders_local_only_first() {
        let h = harness().await;
        let a = account();
        h.remote.set_offline(true);
        let older = h
            .store
            .insert(NewEntity::local(a.clone(), EntityKind::Journal, Fields::new()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let newer = h
            .store
            .insert(NewEntity::local(a.clone(), EntityKind::Journal, Fields::new()))
            .await
            .unwrap();
        let untouched = h
            .store
            .insert(NewEntity::fetched(a.clone(), EntityKind::Journal, 50, Fields::new()))
            .await
            .unwrap();

        let rows = h
            .coordinator
            .merge_fetched(
                &a,
                EntityKind::Journal,
                vec![
                    RemoteEntity::new(20, Fields::new()),
                    RemoteEntity::new(10, Fields::new()),
                    RemoteEntity::new(20, Fields::new()),
                ],
            )
            .await
            .unwrap();

        let ids: Vec<(Option<i64>, LocalId)> =
            rows.iter().map(|r| (r.server_id, r.local_id)).collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(ids[0], (None, newer));
        assert_eq!(ids[1], (None, older));
        assert_eq!(ids[2].0, Some(20));
        assert_eq!(ids[3].0, Some(10));
        assert_eq!(ids[4], (Some(50), untouched));
    }

    #[tokio::test]
    async fn test_merge_does_not_resurrect_tombstones() {
        let h = harness().await;
        let a = account();
        let local_id = h
            .store
            .insert(NewEntity::fetched(a.clone(), EntityKind::Contact, 3, Fields::new()))
            .await
            .unwrap();
        h.store.set_tombstone(local_id, true).await.unwrap();

        let rows = h
            .coordinator
            .merge_fetched(&a, EntityKind::Contact, vec![RemoteEntity::new(3, Fields::new())])
            .await
            .unwrap();

        assert!(rows.is_empty());
        assert_eq!(
            h.store.query(EntityFilter::for_account(&a)).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_sync_pass_reconciles_pending_rows() {
        let h = harness().await;
        let a = account();
        let pending_create = h
            .store
            .insert(NewEntity::local(a.clone(), EntityKind::Journal, Fields::new()))
            .await
            .unwrap();
        let pending_delete = h
            .store
            .insert(NewEntity::fetched(a.clone(), EntityKind::Journal, 70, Fields::new()))
            .await
            .unwrap();
        h.store.set_tombstone(pending_delete, true).await.unwrap();
        let orphan = h
            .store
            .insert(NewEntity::local(a.clone(), EntityKind::Journal, Fields::new()))
            .await
            .unwrap();
        h.store.set_tombstone(orphan, true).await.unwrap();

        let report = h.coordinator.sync_pass(&a).await.unwrap();

        assert_eq!(
            report,
            SyncReport {
                uploaded: 1,
                updated: 0,
                deleted: 1,
                discarded: 1,
                skipped: 0,
                failed: 0
            }
        );
        assert!(h.store.get(pending_create).await.unwrap().unwrap().server_id.is_some());
        assert!(h.store.get(pending_delete).await.unwrap().is_none());
        assert!(h.store.get(orphan).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_pass_counts_failures() {
        let h = harness().await;
        let a = account();
        h.store
            .insert(NewEntity::local(a.clone(), EntityKind::Journal, Fields::new()))
            .await
            .unwrap();
        h.remote.set_offline(true);

        let report = h.coordinator.sync_pass(&a).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_remote_calls() {
        let h = harness().await;
        let a = account();
        let local_id = h
            .store
            .insert(NewEntity::fetched(a.clone(), EntityKind::Journal, 7, Fields::new()))
            .await
            .unwrap();
        let (started, _release) = h.remote.hold_deletes();

        let coordinator = h.coordinator.clone();
        let delete = tokio::spawn(async move { coordinator.soft_delete(local_id).await });
        started.notified().await;
        h.coordinator.shutdown();

        assert!(matches!(delete.await.unwrap(), Err(SyncError::Cancelled)));
        // The tombstone survives for a later pass.
        assert!(h.store.get(local_id).await.unwrap().unwrap().tombstone);
    }

    #[tokio::test]
    async fn test_purge_account() {
        let h = harness().await;
        let a = account();
        h.store
            .insert(NewEntity::local(a.clone(), EntityKind::Journal, Fields::new()))
            .await
            .unwrap();
        h.store
            .insert(NewEntity::fetched(a.clone(), EntityKind::Contact, 4, Fields::new()))
            .await
            .unwrap();

        assert_eq!(h.coordinator.purge_account(&a).await.unwrap(), 2);
        assert!(h.store.query(EntityFilter::for_account(&a)).await.unwrap().is_empty());
    }
}
