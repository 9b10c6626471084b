//! Background sync worker.
//!
//! Mutations request a sync through a [`SyncTrigger`]. The worker collects
//! the requested accounts and, on every flush tick, runs a sync pass for
//! each account that is due. Accounts whose pass fails are retried with
//! exponential backoff (`base * 2^(retries - 1)`, capped) until
//! `max_retries` is exceeded; a later trigger starts them afresh.

use crate::SyncCoordinator;
use chrono::{DateTime, Utc};
use credential_store::AccountId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Default capacity of the trigger queue.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Worker timing and retry settings.
#[derive(Debug, Clone)]
pub struct SyncWorkerConfig {
    /// How often requested accounts are swept.
    pub flush_interval: Duration,
    /// First retry delay after a failed pass.
    pub backoff_base: Duration,
    /// Cap on the retry delay.
    pub backoff_max: Duration,
    /// Failed passes before an account is dropped until its next trigger.
    pub max_retries: u32,
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(300),
            max_retries: 20,
        }
    }
}

/// Cloneable handle that asks the worker for a sync pass.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    sender: mpsc::Sender<AccountId>,
}

impl SyncTrigger {
    /// A trigger and the receiving end the worker consumes.
    pub fn channel() -> (Self, mpsc::Receiver<AccountId>) {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<AccountId>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Never blocks; a full queue drops the request since the account is
    /// already queued or will be swept on a later trigger.
    pub fn request(&self, account: &AccountId) {
        if let Err(err) = self.sender.try_send(account.clone()) {
            debug!(account = %account, error = %err, "Sync request dropped");
        }
    }
}

#[derive(Debug, Clone, Default)]
struct RetryState {
    retry_count: u32,
    last_attempt_at: Option<DateTime<Utc>>,
}

/// Runs sync passes in the background.
pub struct SyncWorker {
    config: SyncWorkerConfig,
    coordinator: Arc<SyncCoordinator>,
    /// Taken by the worker task on start.
    receiver: Mutex<Option<mpsc::Receiver<AccountId>>>,
    shutdown: watch::Sender<bool>,
}

impl SyncWorker {
    pub fn new(
        config: SyncWorkerConfig,
        coordinator: Arc<SyncCoordinator>,
        receiver: mpsc::Receiver<AccountId>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            coordinator,
            receiver: Mutex::new(Some(receiver)),
            shutdown,
        }
    }

    /// Spawn the worker loop. Returns `None` if it was already started.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let Some(mut receiver) = self.receiver.lock().take() else {
            warn!("Sync worker already started");
            return None;
        };

        let config = self.config.clone();
        let coordinator = self.coordinator.clone();
        let mut shutdown = self.shutdown.subscribe();

        Some(tokio::spawn(async move {
            let mut pending: HashMap<AccountId, RetryState> = HashMap::new();
            let mut ticker = interval(config.flush_interval);
            info!(flush_interval_ms = config.flush_interval.as_millis() as u64, "Sync worker started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    maybe_account = receiver.recv() => match maybe_account {
                        Some(account) => {
                            pending.entry(account).or_default();
                        }
                        None => break,
                    },
                    _ = ticker.tick() => {
                        flush(&coordinator, &config, &mut pending).await;
                    }
                }
            }

            info!("Sync worker stopped");
        }))
    }

    /// Stop the worker loop after its current pass. Dropping the worker
    /// has the same effect.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

async fn flush(
    coordinator: &SyncCoordinator,
    config: &SyncWorkerConfig,
    pending: &mut HashMap<AccountId, RetryState>,
) {
    let now = Utc::now();
    let due: Vec<AccountId> = pending
        .iter()
        .filter(|(_, state)| is_account_due(state.last_attempt_at, state.retry_count, now, config))
        .map(|(account, _)| account.clone())
        .collect();

    for account in due {
        let outcome = coordinator.sync_pass(&account).await;
        let clean = match &outcome {
            Ok(report) => report.is_clean(),
            Err(e) => {
                warn!(account = %account, error = %e, "Sync pass failed");
                false
            }
        };

        if clean {
            pending.remove(&account);
            continue;
        }

        let Some(state) = pending.get_mut(&account) else {
            continue;
        };
        state.retry_count += 1;
        state.last_attempt_at = Some(Utc::now());
        if state.retry_count > config.max_retries {
            warn!(
                account = %account,
                retry_count = state.retry_count,
                max_retries = config.max_retries,
                "Giving up on account sync until the next request"
            );
            pending.remove(&account);
        }
    }
}

fn is_account_due(
    last_attempt_at: Option<DateTime<Utc>>,
    retry_count: u32,
    now: DateTime<Utc>,
    config: &SyncWorkerConfig,
) -> bool {
    let Some(last_attempt) = last_attempt_at else {
        return true;
    };

    now >= last_attempt + compute_backoff(retry_count, config)
}

fn compute_backoff(retry_count: u32, config: &SyncWorkerConfig) -> chrono::Duration {
    if retry_count == 0 {
        return chrono::Duration::zero();
    }

    let base_ms = config.backoff_base.as_millis() as u64;
    let max_ms = config.backoff_max.as_millis() as u64;
    let multiplier = 1u64.checked_shl(retry_count - 1).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);

    chrono::Duration::milliseconds(delay_ms as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRemote, RotatingTokens};
    use gated_executor::AuthGatedExecutor;
    use local_store::{EntityFilter, EntityKind, Fields, LocalStore, NewEntity, SqliteLocalStore};

    fn fast_config() -> SyncWorkerConfig {
        SyncWorkerConfig {
            flush_interval: Duration::from_millis(10),
            backoff_base: Duration::from_millis(10),
            backoff_max: Duration::from_millis(40),
            max_retries: 3,
        }
    }

    #[test]
    fn test_compute_backoff_caps_and_grows() {
        let config = SyncWorkerConfig {
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(10),
            ..SyncWorkerConfig::default()
        };

        assert_eq!(compute_backoff(0, &config), chrono::Duration::zero());
        assert_eq!(compute_backoff(1, &config), chrono::Duration::seconds(2));
        assert_eq!(compute_backoff(2, &config), chrono::Duration::seconds(4));
        assert_eq!(compute_backoff(3, &config), chrono::Duration::seconds(8));
        assert_eq!(compute_backoff(4, &config), chrono::Duration::seconds(10));
        assert_eq!(compute_backoff(64, &config), chrono::Duration::seconds(10));
    }

    #[test]
    fn test_is_account_due_respects_backoff() {
        let config = SyncWorkerConfig {
            backoff_base: Duration::from_secs(2),
            ..SyncWorkerConfig::default()
        };
        let now = Utc::now();

        assert!(is_account_due(None, 0, now, &config));
        assert!(is_account_due(Some(now), 0, now, &config));
        assert!(!is_account_due(Some(now), 1, now, &config));
        assert!(is_account_due(
            Some(now),
            1,
            now + chrono::Duration::seconds(2),
            &config
        ));
    }

    #[tokio::test]
    async fn test_trigger_without_receiver_is_harmless() {
        let (trigger, receiver) = SyncTrigger::with_capacity(1);
        drop(receiver);
        trigger.request(&AccountId::new("a@example.com"));
    }

    async fn coordinator(
        remote: Arc<FakeRemote>,
    ) -> (Arc<SyncCoordinator>, Arc<SqliteLocalStore>, mpsc::Receiver<AccountId>) {
        let (trigger, receiver) = SyncTrigger::channel();
        let store = Arc::new(SqliteLocalStore::in_memory().await.unwrap());
        let coordinator = SyncCoordinator::new(
            AuthGatedExecutor::new(Arc::new(RotatingTokens::default())),
            store.clone(),
            remote,
        )
        .with_trigger(trigger);
        (Arc::new(coordinator), store, receiver)
    }

    #[tokio::test]
    async fn test_worker_uploads_after_failed_create() {
        let remote = FakeRemote::new();
        remote.set_offline(true);
        let (coordinator, store, receiver) = coordinator(remote.clone()).await;
        let a = AccountId::new("a@example.com");

        let worker = SyncWorker::new(fast_config(), coordinator.clone(), receiver);
        let handle = worker.start().unwrap();
        assert!(worker.start().is_none());

        // Failing create requests a sync by itself.
        assert!(coordinator
            .create(&a, EntityKind::Journal, Fields::new())
            .await
            .is_err());
        remote.set_offline(false);

        let synced = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let rows = store.query(EntityFilter::for_account(&a)).await.unwrap();
                if rows.iter().all(|row| row.server_id.is_some()) {
                    return rows;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(synced.len(), 1);

        worker.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_deletes_tombstoned_rows() {
        let remote = FakeRemote::new();
        let (coordinator, store, receiver) = coordinator(remote.clone()).await;
        let a = AccountId::new("a@example.com");
        let local_id = store
            .insert(NewEntity::fetched(a.clone(), EntityKind::Contact, 5, Fields::new()))
            .await
            .unwrap();
        store.set_tombstone(local_id, true).await.unwrap();

        let worker = SyncWorker::new(fast_config(), coordinator.clone(), receiver);
        let handle = worker.start().unwrap();
        coordinator.request_sync(&a);

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.get(local_id).await.unwrap().is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(remote.deletes(), 1);

        worker.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_gives_up_after_max_retries() {
        let remote = FakeRemote::new();
        remote.set_offline(true);
        let (coordinator, store, receiver) = coordinator(remote.clone()).await;
        let a = AccountId::new("a@example.com");
        store
            .insert(NewEntity::local(a.clone(), EntityKind::Journal, Fields::new()))
            .await
            .unwrap();

        let worker = SyncWorker::new(fast_config(), coordinator.clone(), receiver);
        let handle = worker.start().unwrap();
        coordinator.request_sync(&a);

        // One attempt plus three retries, then the account is dropped.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(remote.calls().len(), 4);

        worker.stop();
        handle.await.unwrap();
    }
}
