//! Network-aware sync scheduler
//!
//! Watches connectivity and runs sync passes when the network is good enough.
//! Passes are mutually exclusive: whoever holds the single sync slot runs,
//! everyone else gets [`SyncError::SyncInProgress`]. Unforced passes are also
//! throttled to one per `min_sync_interval` after the last successful pass.
//!
//! Every pass runs on its own task, so leaving a sync-worthy network or
//! stopping the monitor never cancels a pass halfway through a drain.

use crate::config::SyncPolicy;
use crate::error::{SyncError, SyncResult};
use crate::local_db::LocalDatabase;
use crate::network::{NetworkAvailability, NetworkState};
use crate::sync_queue::{DrainReport, LedgerReport, SyncQueue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Notified each time the network becomes sync-worthy
#[async_trait]
pub trait NetworkListener: Send + Sync {
    async fn on_network_available(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Not watching the network
    Stopped,
    /// Watching, network not good enough to sync
    Idle,
    /// Background check running
    Active,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackgroundSyncStatus {
    pub state: SchedulerState,
    pub network_available: bool,
    pub is_syncing: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_outbox: i64,
    pub unsynced_results: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub outbox: DrainReport,
    pub ledger: LedgerReport,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct LastSync {
    at: Instant,
    wall: DateTime<Utc>,
}

#[derive(Default)]
struct Tasks {
    monitor: Option<JoinHandle<()>>,
    background: Option<JoinHandle<()>>,
    network_ok: bool,
}

struct Inner {
    queue: Arc<SyncQueue>,
    db: Arc<LocalDatabase>,
    policy: SyncPolicy,
    availability: NetworkAvailability,
    sync_slot: tokio::sync::Mutex<()>,
    last_sync: Mutex<Option<LastSync>>,
    listeners: RwLock<Vec<Arc<dyn NetworkListener>>>,
    tasks: Mutex<Tasks>,
}

/// Cloneable handle to the scheduler
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    pub fn new(
        queue: Arc<SyncQueue>,
        db: Arc<LocalDatabase>,
        policy: SyncPolicy,
        availability: NetworkAvailability,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                db,
                policy,
                availability,
                sync_slot: tokio::sync::Mutex::new(()),
                last_sync: Mutex::new(None),
                listeners: RwLock::new(Vec::new()),
                tasks: Mutex::new(Tasks::default()),
            }),
        }
    }

    pub fn availability(&self) -> NetworkAvailability {
        self.inner.availability.clone()
    }

    pub fn register_listener(&self, listener: Arc<dyn NetworkListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Follow network changes published on `network`.
    ///
    /// Replaces any earlier monitor. The current value is applied right away.
    pub fn start_monitoring(&self, mut network: watch::Receiver<NetworkState>) {
        let inner = self.inner.clone();
        let monitor = tokio::spawn(async move {
            loop {
                let state = *network.borrow_and_update();
                tracing::debug!(
                    connected = ?state.is_connected,
                    reachable = ?state.is_internet_reachable,
                    transport = ?state.transport,
                    should_sync = state.should_sync(),
                    "Network state changed"
                );
                inner.apply_network_state(state);

                if network.changed().await.is_err() {
                    tracing::debug!("Network state publisher dropped");
                    break;
                }
            }
        });

        let previous = self.inner.tasks.lock().monitor.replace(monitor);
        if let Some(previous) = previous {
            previous.abort();
        }
        tracing::info!("Started network monitoring");
    }

    /// Stop following the network and the background check
    pub fn stop_monitoring(&self) {
        let mut tasks = self.inner.tasks.lock();
        if let Some(monitor) = tasks.monitor.take() {
            monitor.abort();
        }
        if let Some(background) = tasks.background.take() {
            background.abort();
        }
        tasks.network_ok = false;
        self.inner.availability.set(false);
        tracing::info!("Stopped network monitoring");
    }

    /// Feed one network observation, as the monitor does for each change
    pub fn apply_network_state(&self, state: NetworkState) {
        self.inner.apply_network_state(state);
    }

    /// Run one sync pass now.
    ///
    /// `force` skips the throttle but never the single-pass rule.
    pub async fn perform_sync(&self, force: bool) -> SyncResult<SyncReport> {
        self.inner.perform_sync(force).await
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.sync_slot.try_lock().is_err()
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.inner.last_sync.lock().map(|last| last.wall)
    }

    pub fn state(&self) -> SchedulerState {
        let tasks = self.inner.tasks.lock();
        if tasks.background.is_some() {
            SchedulerState::Active
        } else if tasks.monitor.is_some() {
            SchedulerState::Idle
        } else {
            SchedulerState::Stopped
        }
    }

    pub async fn status(&self) -> SyncResult<BackgroundSyncStatus> {
        Ok(BackgroundSyncStatus {
            state: self.state(),
            network_available: self.inner.availability.is_available(),
            is_syncing: self.is_syncing(),
            last_sync_at: self.last_sync_at(),
            pending_outbox: self.inner.db.pending_sync_count().await?,
            unsynced_results: self.inner.db.unsynced_quiz_result_count().await?,
        })
    }
}

impl Inner {
    fn apply_network_state(self: &Arc<Self>, state: NetworkState) {
        let worthy = state.should_sync();

        let mut tasks = self.tasks.lock();
        if worthy == tasks.network_ok {
            return;
        }
        tasks.network_ok = worthy;
        self.availability.set(worthy);

        if !worthy {
            if let Some(background) = tasks.background.take() {
                background.abort();
            }
            tracing::info!("Network no longer suitable for sync, background check stopped");
            return;
        }

        let inner = self.clone();
        tasks.background = Some(tokio::spawn(async move { inner.background_loop().await }));
        drop(tasks);

        tracing::info!("Network suitable for sync");

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            tokio::spawn(async move { listener.on_network_available().await });
        }

        let inner = self.clone();
        tokio::spawn(async move { inner.run_best_effort(false).await });
    }

    async fn background_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.policy.background_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the entry pass covers it
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match self.has_pending_work().await {
                Ok(true) => {
                    let inner = self.clone();
                    tokio::spawn(async move { inner.run_best_effort(true).await });
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "Background sync check failed"),
            }
        }
    }

    async fn has_pending_work(&self) -> SyncResult<bool> {
        Ok(self.db.pending_sync_count().await? > 0 || self.db.unsynced_quiz_result_count().await? > 0)
    }

    /// Pass started by the scheduler itself; outcomes are only logged
    async fn run_best_effort(&self, force: bool) {
        match self.perform_sync(force).await {
            Ok(report) => tracing::debug!(
                synced = report.outbox.synced,
                pushed = report.ledger.pushed,
                "Background sync pass finished"
            ),
            Err(SyncError::SyncInProgress) => tracing::debug!("Sync already in progress, skipping"),
            Err(SyncError::Throttled { retry_after }) => tracing::debug!(
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                "Sync throttled"
            ),
            Err(e) => tracing::warn!(error = %e, "Background sync pass failed"),
        }
    }

    async fn perform_sync(&self, force: bool) -> SyncResult<SyncReport> {
        let _slot = self.sync_slot.try_lock().map_err(|_| SyncError::SyncInProgress)?;

        if !force {
            if let Some(retry_after) = self.throttle_remaining() {
                return Err(SyncError::Throttled { retry_after });
            }
        }

        let started = Instant::now();
        tracing::info!(force, "Sync pass started");

        let outcome = async {
            let outbox = self.queue.drain().await?;
            let ledger = self.queue.push_unqueued_results().await?;
            Ok::<_, SyncError>((outbox, ledger))
        }
        .await;

        let (outbox, ledger) = match outcome {
            Ok(reports) => reports,
            Err(e) => {
                tracing::error!(error = %e, "Sync pass failed");
                return Err(e);
            }
        };

        let finished_at = Utc::now();
        *self.last_sync.lock() = Some(LastSync {
            at: Instant::now(),
            wall: finished_at,
        });

        let report = SyncReport {
            outbox,
            ledger,
            finished_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        tracing::info!(
            synced = outbox.synced,
            failed = outbox.failed,
            abandoned = outbox.abandoned,
            pushed = ledger.pushed,
            duration_ms = report.duration_ms,
            "Sync pass completed"
        );
        Ok(report)
    }

    fn throttle_remaining(&self) -> Option<Duration> {
        let last = (*self.last_sync.lock())?;
        let elapsed = last.at.elapsed();
        self.policy
            .min_sync_interval
            .checked_sub(elapsed)
            .filter(|remaining| !remaining.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockRemoteGateway;
    use crate::local_db::test_support::create_test_db;
    use crate::network::CellularGeneration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn scheduler(policy: SyncPolicy) -> (SyncScheduler, tempfile::TempDir) {
        let (db, dir) = create_test_db().await;
        let db = Arc::new(db);
        let mut gateway = MockRemoteGateway::new();
        gateway
            .expect_submit_quiz_result()
            .returning(|_| Ok(Default::default()));
        let queue = Arc::new(SyncQueue::new(db.clone(), Arc::new(gateway), &policy));
        (
            SyncScheduler::new(queue, db, policy, NetworkAvailability::default()),
            dir,
        )
    }

    struct CountingListener(AtomicUsize);

    #[async_trait]
    impl NetworkListener for CountingListener {
        async fn on_network_available(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_throttle_applies_to_unforced_passes_only() {
        let (scheduler, _dir) = scheduler(SyncPolicy::default()).await;

        scheduler.perform_sync(false).await.unwrap();

        let err = scheduler.perform_sync(false).await.unwrap_err();
        assert!(matches!(err, SyncError::Throttled { .. }));

        scheduler.perform_sync(true).await.unwrap();
        assert!(scheduler.last_sync_at().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_pass_is_rejected() {
        let (scheduler, _dir) = scheduler(SyncPolicy::default()).await;

        let held = scheduler.inner.sync_slot.lock().await;
        assert!(scheduler.is_syncing());
        let err = scheduler.perform_sync(true).await.unwrap_err();
        assert!(matches!(err, SyncError::SyncInProgress));
        drop(held);

        scheduler.perform_sync(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_network_transitions_drive_state_and_listeners() {
        let (scheduler, _dir) = scheduler(SyncPolicy::default()).await;
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        scheduler.register_listener(listener.clone());
        let availability = scheduler.availability();

        let (tx, rx) = watch::channel(NetworkState::offline());
        scheduler.start_monitoring(rx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(!availability.is_available());

        tx.send(NetworkState::wifi()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.state(), SchedulerState::Active);
        assert!(availability.is_available());
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);

        // Switching between two good networks is not a new transition
        tx.send(NetworkState::cellular(Some(CellularGeneration::G5))).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);

        tx.send(NetworkState::cellular(Some(CellularGeneration::G3))).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(!availability.is_available());

        scheduler.stop_monitoring();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_status_reports_counts() {
        let (scheduler, _dir) = scheduler(SyncPolicy::default()).await;
        let status = scheduler.status().await.unwrap();

        assert_eq!(status.state, SchedulerState::Stopped);
        assert!(!status.network_available);
        assert!(!status.is_syncing);
        assert_eq!(status.pending_outbox, 0);
        assert_eq!(status.unsynced_results, 0);
        assert!(status.last_sync_at.is_none());
    }
}
