//! Scripted collaborators shared by the coordinator and worker tests.

use crate::{EntityRemote, RemoteEntity};
use async_trait::async_trait;
use auth_engine::AuthResult;
use credential_store::AccountId;
use gated_executor::{TokenSource, TransportError};
use local_store::{EntityKind, Fields};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Issues `tok-1`, then `tok-2` after the first invalidation, and so on.
#[derive(Default)]
pub struct RotatingTokens {
    generation: AtomicUsize,
    acquisitions: AtomicUsize,
    invalidations: AtomicUsize,
}

impl RotatingTokens {
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    fn current(&self) -> String {
        format!("tok-{}", self.generation.load(Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl TokenSource for RotatingTokens {
    async fn acquire(&self, _account: &AccountId) -> AuthResult<String> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(self.current())
    }

    async fn invalidate(&self, _account: &AccountId, token: &str) -> AuthResult<bool> {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        if token == self.current() {
            self.generation.fetch_add(1, Ordering::SeqCst);
            return Ok(true);
        }
        Ok(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Create { token: String, kind: EntityKind },
    Update { token: String, server_id: i64 },
    Delete { token: String, server_id: i64 },
    Fetch { token: String, kind: EntityKind },
}

/// In-memory server with scriptable failures.
pub struct FakeRemote {
    calls: Mutex<Vec<RemoteCall>>,
    next_id: AtomicI64,
    rejected_tokens: Mutex<HashSet<String>>,
    offline: AtomicBool,
    batch: Mutex<Vec<RemoteEntity>>,
    /// Server-side state: fields by server id.
    stored: Mutex<HashMap<i64, Fields>>,
    /// Signalled when a create has been stored on the server; the response
    /// then waits for `release_create`.
    create_started: Arc<Notify>,
    release_create: Mutex<Option<Arc<Notify>>>,
    /// Signalled when a delete reaches the server; the delete then waits
    /// for `release_delete`.
    delete_started: Arc<Notify>,
    release_delete: Mutex<Option<Arc<Notify>>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Self::starting_at(1)
    }

    /// Server ids are handed out from `first_id` upwards.
    pub fn starting_at(first_id: i64) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(first_id),
            rejected_tokens: Mutex::new(HashSet::new()),
            offline: AtomicBool::new(false),
            batch: Mutex::new(Vec::new()),
            stored: Mutex::new(HashMap::new()),
            create_started: Arc::new(Notify::new()),
            release_create: Mutex::new(None),
            delete_started: Arc::new(Notify::new()),
            release_delete: Mutex::new(None),
        })
    }

    pub fn reject_token(&self, token: &str) {
        self.rejected_tokens.lock().insert(token.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn serve_batch(&self, batch: Vec<RemoteEntity>) {
        *self.batch.lock() = batch;
    }

    /// Hold deletes until the returned handle is notified.
    pub fn hold_deletes(&self) -> (Arc<Notify>, Arc<Notify>) {
        let release = Arc::new(Notify::new());
        *self.release_delete.lock() = Some(release.clone());
        (self.delete_started.clone(), release)
    }

    /// Hold create responses, after the server stored the entity, until the
    /// returned handle is notified.
    pub fn hold_creates(&self) -> (Arc<Notify>, Arc<Notify>) {
        let release = Arc::new(Notify::new());
        *self.release_create.lock() = Some(release.clone());
        (self.create_started.clone(), release)
    }

    /// Fields the server holds for `server_id`.
    pub fn server_fields(&self, server_id: i64) -> Option<Fields> {
        self.stored.lock().get(&server_id).cloned()
    }

    pub fn creates(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RemoteCall::Create { .. }))
            .count()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    pub fn deletes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RemoteCall::Delete { .. }))
            .count()
    }

    fn check(&self, token: &str) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("offline".to_string()));
        }
        if self.rejected_tokens.lock().contains(token) {
            return Err(TransportError::Status {
                status: 401,
                message: "token rejected".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EntityRemote for FakeRemote {
    async fn create(
        &self,
        token: &str,
        kind: EntityKind,
        fields: &Fields,
    ) -> Result<RemoteEntity, TransportError> {
        self.calls.lock().push(RemoteCall::Create {
            token: token.to_string(),
            kind,
        });
        self.check(token)?;
        let server_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.stored.lock().insert(server_id, fields.clone());

        self.create_started.notify_one();
        let release = self.release_create.lock().take();
        if let Some(release) = release {
            release.notified().await;
        }
        Ok(RemoteEntity::new(server_id, fields.clone()))
    }

    async fn update(
        &self,
        token: &str,
        _kind: EntityKind,
        server_id: i64,
        fields: &Fields,
    ) -> Result<(), TransportError> {
        self.calls.lock().push(RemoteCall::Update {
            token: token.to_string(),
            server_id,
        });
        self.check(token)?;
        if let Some(stored) = self.stored.lock().get_mut(&server_id) {
            for (key, value) in fields {
                stored.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn delete(
        &self,
        token: &str,
        _kind: EntityKind,
        server_id: i64,
    ) -> Result<(), TransportError> {
        self.calls.lock().push(RemoteCall::Delete {
            token: token.to_string(),
            server_id,
        });
        self.delete_started.notify_one();
        let release = self.release_delete.lock().clone();
        if let Some(release) = release {
            release.notified().await;
        }
        self.check(token)?;
        self.stored.lock().remove(&server_id);
        Ok(())
    }

    async fn fetch(&self, token: &str, kind: EntityKind) -> Result<Vec<RemoteEntity>, TransportError> {
        self.calls.lock().push(RemoteCall::Fetch {
            token: token.to_string(),
            kind,
        });
        self.check(token)?;
        Ok(self.batch.lock().clone())
    }
}
