//! The client runtime: one handle wiring credentials, tokens, the gated
//! executor, the local store and the sync coordinator together.

use crate::{RuntimeError, RuntimeResult};
use auth_engine::{AcquireMode, AuthEndpoint, HttpAuthEndpoint, Registration, TokenProvider};
use client_config_and_utils::{Config, Paths};
use credential_store::{create_file_storage, AccountId, CredentialStore, Profile, SecureStorage};
use gated_executor::{ApiRequest, ApiResponse, AuthGatedExecutor, HttpTransport, ScopeTicket, Transport};
use local_store::{
    BroadcastSink, EntityKind, Fields, LocalId, LocalStore, SqliteLocalStore, StoreChange,
    SyncableEntity,
};
use parking_lot::Mutex;
use std::sync::Arc;
use sync_coordinator::{
    DeleteOutcome, HttpEntityRemote, SyncCoordinator, SyncReport, SyncTrigger, SyncWorker,
    SyncWorkerConfig,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Shared client state.
///
/// Every account-scoped operation runs against the active account, which
/// is re-validated against the credential store on each call.
pub struct ClientRuntime {
    config: Arc<Config>,
    credentials: Arc<CredentialStore>,
    tokens: Arc<TokenProvider>,
    executor: AuthGatedExecutor,
    transport: Arc<dyn Transport>,
    coordinator: Arc<SyncCoordinator>,
    changes: Arc<BroadcastSink>,
    worker: SyncWorker,
    worker_task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientRuntime {
    /// Open the runtime from configuration.
    ///
    /// Credentials live in `paths.credentials_file()` and entities in
    /// `paths.database_file()`. The endpoints come from `config`. Logging
    /// is left to the host (see [`init_logging`](crate::init_logging)).
    pub async fn open(config: Config, paths: &Paths) -> RuntimeResult<Self> {
        config.validate()?;
        paths.ensure_dirs()?;

        let storage = create_file_storage(paths.credentials_file())?;
        let endpoint = Arc::new(HttpAuthEndpoint::new(config.auth_url()?)?);
        let transport = Arc::new(HttpTransport::new(config.api_url()?)?);
        let store = SqliteLocalStore::open(&paths.database_file()).await?;

        info!(
            auth_url = %config.auth_url,
            api_url = %config.api_url,
            base_dir = %paths.base_dir().display(),
            "Client runtime opened"
        );
        Ok(Self::with_components(config, storage, endpoint, transport, store))
    }

    /// Assemble the runtime from explicit collaborators.
    pub fn with_components(
        config: Config,
        storage: Box<dyn SecureStorage>,
        endpoint: Arc<dyn AuthEndpoint>,
        transport: Arc<dyn Transport>,
        store: SqliteLocalStore,
    ) -> Self {
        let credentials = Arc::new(CredentialStore::new(storage));
        let tokens = Arc::new(
            TokenProvider::new(credentials.clone(), endpoint)
                .with_login_type(config.login_type)
                .with_push_registration_id(config.push_registration_id.clone()),
        );
        let executor = AuthGatedExecutor::new(tokens.clone());

        let changes = Arc::new(BroadcastSink::default());
        let store: Arc<dyn LocalStore> = Arc::new(store.with_sink(changes.clone()));
        let remote = Arc::new(HttpEntityRemote::new(transport.clone()));

        let (trigger, requests) = SyncTrigger::channel();
        let coordinator = Arc::new(
            SyncCoordinator::new(executor.clone(), store, remote).with_trigger(trigger),
        );
        let worker = SyncWorker::new(
            SyncWorkerConfig {
                flush_interval: config.sync_flush_interval(),
                max_retries: config.sync_max_retries,
                ..SyncWorkerConfig::default()
            },
            coordinator.clone(),
            requests,
        );

        Self {
            config: Arc::new(config),
            credentials,
            tokens,
            executor,
            transport,
            coordinator,
            changes,
            worker,
            worker_task: Mutex::new(None),
        }
    }

    /// Start background reconciliation. Calling it again does nothing.
    pub fn start(&self) {
        if let Some(handle) = self.worker.start() {
            *self.worker_task.lock() = Some(handle);
        }
    }

    /// Stop background reconciliation and drop in-flight remote calls.
    pub async fn shutdown(&self) {
        self.worker.stop();
        self.coordinator.shutdown();
        let handle = self.worker_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sync worker ended abnormally");
            }
        }
        info!("Client runtime shut down");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn executor(&self) -> &AuthGatedExecutor {
        &self.executor
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Committed local store changes, for observers such as list views.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    // ==========================================
    // Accounts
    // ==========================================

    /// Sign in and make the account active.
    pub async fn sign_in(&self, account: &AccountId, secret: &str) -> RuntimeResult<Profile> {
        let profile = self.tokens.sign_in(account, secret).await?;
        self.credentials.set_active(Some(account))?;
        Ok(profile)
    }

    /// Register a new account and make it active.
    pub async fn sign_up(&self, registration: Registration) -> RuntimeResult<Profile> {
        let account = registration.account_id.clone();
        let profile = self.tokens.sign_up(registration).await?;
        self.credentials.set_active(Some(&account))?;
        Ok(profile)
    }

    /// Store a new secret for the active account once the endpoint accepts it.
    pub async fn confirm_credentials(&self, secret: &str) -> RuntimeResult<()> {
        let account = self.require_active()?;
        self.tokens.confirm_credentials(&account, secret).await?;
        Ok(())
    }

    /// Sign the active account out. Its record and local rows are kept.
    pub async fn sign_out(&self) -> RuntimeResult<()> {
        let Some(account) = self.active_account()? else {
            return Ok(());
        };
        self.tokens.sign_out(&account).await?;
        self.credentials.set_active(None)?;
        Ok(())
    }

    /// The host reports that `account` no longer exists.
    ///
    /// Clears the active pointer if it named the account, drops the
    /// credential and removes the account's local rows. Returns whether the
    /// account was the active one.
    pub async fn handle_account_removed(&self, account: &AccountId) -> RuntimeResult<bool> {
        let was_active = self.credentials.handle_account_removed(account)?;
        self.tokens.forget(account);
        let removed = self.coordinator.purge_account(account).await?;
        info!(account = %account, was_active, removed, "Account removed by host");
        Ok(was_active)
    }

    /// The active account, after checking it still exists.
    ///
    /// A pointer to an account that disappeared while the client was not
    /// running is cleared here.
    pub fn active_account(&self) -> RuntimeResult<Option<AccountId>> {
        Ok(self.credentials.validated_active()?)
    }

    /// Whether the last active account was removed by the host.
    pub fn active_account_deleted(&self) -> RuntimeResult<bool> {
        Ok(self.credentials.active_deleted()?)
    }

    fn require_active(&self) -> RuntimeResult<AccountId> {
        self.active_account()?.ok_or(RuntimeError::NoActiveAccount)
    }

    // ==========================================
    // Tokens and gated requests
    // ==========================================

    /// Token for the active account.
    pub async fn acquire_token(&self, mode: AcquireMode) -> RuntimeResult<String> {
        let account = self.require_active()?;
        Ok(self.tokens.acquire(&account, mode).await?)
    }

    /// Send a domain request for the active account with the gated retry
    /// policy. Fails with `Cancelled` if `ticket` stops being live first.
    pub async fn send(&self, ticket: ScopeTicket, request: ApiRequest) -> RuntimeResult<ApiResponse> {
        let account = self.require_active()?;
        match self
            .executor
            .send(ticket, &account, self.transport.clone(), request)
            .await
        {
            Some(result) => Ok(result?),
            None => Err(RuntimeError::Cancelled),
        }
    }

    // ==========================================
    // Entities
    // ==========================================

    pub async fn create(&self, kind: EntityKind, fields: Fields) -> RuntimeResult<SyncableEntity> {
        let account = self.require_active()?;
        Ok(self.coordinator.create(&account, kind, fields).await?)
    }

    pub async fn update(&self, local_id: LocalId, fields: Fields) -> RuntimeResult<SyncableEntity> {
        Ok(self.coordinator.update(local_id, fields).await?)
    }

    pub async fn soft_delete(&self, local_id: LocalId) -> RuntimeResult<DeleteOutcome> {
        Ok(self.coordinator.soft_delete(local_id).await?)
    }

    /// Fetch from the server and return the merged visible list.
    pub async fn fetch(&self, kind: EntityKind) -> RuntimeResult<Vec<SyncableEntity>> {
        let account = self.require_active()?;
        Ok(self.coordinator.fetch(&account, kind).await?)
    }

    /// The visible list without touching the network.
    pub async fn visible(&self, kind: EntityKind) -> RuntimeResult<Vec<SyncableEntity>> {
        let account = self.require_active()?;
        Ok(self.coordinator.visible(&account, kind).await?)
    }

    /// Reconcile the active account now.
    pub async fn sync_now(&self) -> RuntimeResult<SyncReport> {
        let account = self.require_active()?;
        Ok(self.coordinator.sync_pass(&account).await?)
    }

    /// Queue a background sync for the active account.
    pub fn request_sync(&self) -> RuntimeResult<()> {
        let account = self.require_active()?;
        self.coordinator.request_sync(&account);
        Ok(())
    }
}
