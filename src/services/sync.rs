//! Reconciles the local planner with the remote document store.
//!
//! An account is either mirrored (remote holds a full copy, local mutations
//! are written through) or local-only (a bounded number of pushes are tried,
//! spaced by a cooldown). Quota exhaustion drops back to local-only until a
//! manual retry.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::event::{publish, PlannerEvent};
use crate::models::sync::{SkipReason, SyncOutcome, SyncStatus, SyncStatusResponse};
use crate::store::local::{keys, load_json, save_json, LocalStore};
use crate::store::remote::{RemoteError, RemoteStore};

use super::mirror::{Mirror, MirrorOp};
use super::planner::{Planner, PlannerData};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub batch_limit: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(60),
            max_retries: 3,
            batch_limit: crate::store::remote::MAX_BATCH_OPS,
        }
    }
}

#[derive(Debug, Default)]
struct SyncState {
    status: SyncStatus,
    last_error: Option<String>,
    quota_exceeded: bool,
    in_flight: bool,
}

enum MirrorJob {
    Write(Vec<MirrorOp>),
    Flush(oneshot::Sender<()>),
}

pub struct SyncReconciler {
    user_id: Uuid,
    planner: Arc<Planner>,
    remote: Option<Arc<dyn RemoteStore>>,
    meta: Arc<dyn LocalStore>,
    settings: SyncSettings,
    events: broadcast::Sender<String>,
    clock: Arc<dyn Clock>,
    state: Mutex<SyncState>,
    queue: mpsc::UnboundedSender<MirrorJob>,
}

impl SyncReconciler {
    /// `meta` must be scoped to the account. Without `remote` the planner runs
    /// local-only and every sync request is skipped.
    pub fn new(
        user_id: Uuid,
        planner: Arc<Planner>,
        remote: Option<Arc<dyn RemoteStore>>,
        meta: Arc<dyn LocalStore>,
        settings: SyncSettings,
        events: broadcast::Sender<String>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (queue, rx) = mpsc::unbounded_channel();
        let sync = Arc::new(Self {
            user_id,
            planner,
            remote,
            meta,
            settings,
            events,
            clock,
            state: Mutex::new(SyncState::default()),
            queue,
        });
        tokio::spawn(run_mirror_queue(Arc::downgrade(&sync), rx));
        sync
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        // Nothing panics while holding the lock, but stay usable if it ever does
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mirror_for<'a>(&self, remote: &'a dyn RemoteStore) -> Mirror<'a> {
        Mirror {
            remote,
            user_id: self.user_id,
            batch_limit: self.settings.batch_limit,
        }
    }

    // Persisted bookkeeping

    pub fn is_mirrored(&self) -> bool {
        self.read_meta(keys::MIRRORED).unwrap_or(false)
    }

    pub fn retry_count(&self) -> u32 {
        self.read_meta(keys::RETRY_COUNT).unwrap_or(0)
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.read_meta(keys::LAST_ATTEMPT)
    }

    fn read_meta<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        match load_json(self.meta.as_ref(), key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "Unreadable sync metadata; using default");
                None
            }
        }
    }

    fn write_meta<T: serde::Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = save_json(self.meta.as_ref(), key, value) {
            tracing::error!(key, error = %e, "Failed to persist sync metadata");
        }
    }

    fn set_status(&self, status: SyncStatus) {
        {
            let mut state = self.state();
            if state.status == status {
                return;
            }
            state.status = status;
            if status == SyncStatus::Success {
                state.last_error = None;
            }
        }
        publish(&self.events, PlannerEvent::SyncStatusChanged { status });
    }

    /// Claim the single in-flight slot. Returns false if a sync is already running.
    fn begin(&self) -> bool {
        {
            let mut state = self.state();
            if state.in_flight {
                return false;
            }
            state.in_flight = true;
        }
        self.set_status(SyncStatus::Syncing);
        true
    }

    fn finish(&self) {
        self.state().in_flight = false;
    }

    /// Fold a remote failure into the user-visible status. Quota exhaustion
    /// also suspends remote writes until `retry_now`.
    pub fn record_remote_error(&self, error: &RemoteError) {
        if error.is_quota_exceeded() {
            tracing::warn!(error = %error, "Remote quota exhausted; falling back to local-only");
            let message = "Remote storage quota exceeded. Changes are saved on this device only until you retry sync.".to_string();
            {
                let mut state = self.state();
                state.quota_exceeded = true;
                state.last_error = Some(message.clone());
            }
            self.write_meta(keys::MIRRORED, &false);
            self.set_status(SyncStatus::Error);
            publish(&self.events, PlannerEvent::QuotaExceeded { message });
            return;
        }

        let message = error.user_message();
        tracing::warn!(error = %error, "Remote sync error");
        self.state().last_error = Some(message.clone());
        self.set_status(SyncStatus::Error);
        publish(&self.events, PlannerEvent::Error { message });
    }

    /// Session start: pull when the account is mirrored, otherwise try a push.
    pub async fn on_sign_in(&self) -> AppResult<SyncOutcome> {
        if self.remote.is_none() {
            return Ok(SyncOutcome::Skipped(SkipReason::LocalOnly));
        }
        if self.is_mirrored() {
            self.pull().await
        } else {
            self.attempt_push().await
        }
    }

    /// Replace local state with the remote copy.
    pub async fn pull(&self) -> AppResult<SyncOutcome> {
        let Some(remote) = self.remote.clone() else {
            return Ok(SyncOutcome::Skipped(SkipReason::LocalOnly));
        };
        if !self.begin() {
            return Ok(SyncOutcome::Skipped(SkipReason::InFlight));
        }

        let result = self.mirror_for(remote.as_ref()).pull_all().await;
        let outcome = match result {
            Ok(snapshot) => {
                tracing::info!(
                    goals = snapshot.goals.len(),
                    todos = snapshot.todos.len(),
                    diary_entries = snapshot.diary_entries.len(),
                    completed_tasks = snapshot.completed_tasks.len(),
                    "Pulled planner from remote store"
                );
                let superseded = snapshot.superseded_todos;
                let replaced = self
                    .planner
                    .replace_all(PlannerData {
                        goals: snapshot.goals,
                        todos: snapshot.todos,
                        diary_entries: snapshot.diary_entries,
                        completed_tasks: snapshot.completed_tasks,
                    })
                    .await;
                match replaced {
                    Ok(()) => {
                        self.write_meta(keys::RETRY_COUNT, &0u32);
                        self.set_status(SyncStatus::Success);
                        self.mirror(superseded.into_iter().map(MirrorOp::DeleteTodo).collect());
                        Ok(SyncOutcome::Pulled)
                    }
                    Err(e) => {
                        self.state().last_error = Some("Could not save pulled data".into());
                        self.set_status(SyncStatus::Error);
                        Err(e)
                    }
                }
            }
            Err(e) => {
                self.record_remote_error(&e);
                Err(AppError::from(e))
            }
        };
        self.finish();
        outcome
    }

    /// Push every local record, subject to the retry budget and cooldown.
    pub async fn attempt_push(&self) -> AppResult<SyncOutcome> {
        let Some(remote) = self.remote.clone() else {
            return Ok(SyncOutcome::Skipped(SkipReason::LocalOnly));
        };
        if self.is_mirrored() {
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadyMirrored));
        }
        if self.state().quota_exceeded {
            return Ok(SyncOutcome::Skipped(SkipReason::QuotaExceeded));
        }

        let retries = self.retry_count();
        if retries >= self.settings.max_retries {
            return Ok(SyncOutcome::Skipped(SkipReason::RetryBudgetExhausted));
        }
        let now = self.clock.now();
        if let Some(last) = self.last_attempt() {
            let cooldown = chrono::Duration::from_std(self.settings.retry_delay)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
            if now - last <= cooldown {
                return Ok(SyncOutcome::Skipped(SkipReason::CoolingDown));
            }
        }

        if !self.begin() {
            return Ok(SyncOutcome::Skipped(SkipReason::InFlight));
        }
        self.write_meta(keys::LAST_ATTEMPT, &now);

        let data = self.planner.snapshot().await;
        let result = self
            .mirror_for(remote.as_ref())
            .push_all(
                &data.goals,
                &data.todos,
                &data.diary_entries,
                &data.completed_tasks,
            )
            .await;

        let outcome = match result {
            Ok(written) => {
                tracing::info!(written, "Local planner pushed to remote store");
                self.write_meta(keys::MIRRORED, &true);
                self.write_meta(keys::RETRY_COUNT, &0u32);
                self.set_status(SyncStatus::Success);
                Ok(SyncOutcome::Pushed)
            }
            Err(e) => {
                let attempts = retries + 1;
                self.write_meta(keys::RETRY_COUNT, &attempts);
                tracing::warn!(
                    attempt = attempts,
                    max_retries = self.settings.max_retries,
                    "Push to remote store failed"
                );
                self.record_remote_error(&e);
                Err(AppError::from(e))
            }
        };
        self.finish();
        outcome
    }

    /// Manual retry: clears the retry budget, cooldown and quota lock, then
    /// runs the sign-in flow.
    pub async fn retry_now(&self) -> AppResult<SyncOutcome> {
        self.write_meta(keys::RETRY_COUNT, &0u32);
        if let Err(e) = self.meta.remove(keys::LAST_ATTEMPT) {
            tracing::warn!(error = %e, "Failed to clear last sync attempt");
        }
        self.state().quota_exceeded = false;
        tracing::info!("Manual sync retry requested");
        self.on_sign_in().await
    }

    /// Queue the remote writes for a local mutation. Skipped unless the
    /// account is mirrored and remote writes are not suspended.
    pub fn mirror(&self, ops: Vec<MirrorOp>) {
        if ops.is_empty() || !self.writes_enabled() {
            return;
        }
        if self.queue.send(MirrorJob::Write(ops)).is_err() {
            tracing::error!("Mirror queue closed; dropping remote writes");
        }
    }

    /// Wait until every queued mirror write has been attempted.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.queue.send(MirrorJob::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn writes_enabled(&self) -> bool {
        self.remote.is_some() && self.is_mirrored() && !self.state().quota_exceeded
    }

    async fn apply_mirror(&self, ops: Vec<MirrorOp>) {
        let Some(remote) = self.remote.clone() else { return };
        let mirror = self.mirror_for(remote.as_ref());
        for op in &ops {
            // Quota may have tripped on an earlier op
            if !self.writes_enabled() {
                tracing::debug!(op = op.name(), "Remote writes suspended; skipping");
                continue;
            }
            match mirror.apply(op).await {
                Ok(()) => tracing::debug!(op = op.name(), "Mirrored to remote store"),
                Err(e) => {
                    tracing::warn!(op = op.name(), error = %e, "Mirror write failed; local change kept");
                    self.record_remote_error(&e);
                }
            }
        }
    }

    pub fn status(&self) -> SyncStatusResponse {
        let state = self.state();
        SyncStatusResponse {
            status: state.status,
            remote_configured: self.remote.is_some(),
            mirrored: self.is_mirrored(),
            retry_count: self.retry_count(),
            max_retries: self.settings.max_retries,
            last_attempt: self.last_attempt(),
            quota_exceeded: state.quota_exceeded,
            last_error: state.last_error.clone(),
            regenerating: self.planner.is_regenerating(),
        }
    }
}

async fn run_mirror_queue(sync: Weak<SyncReconciler>, mut rx: mpsc::UnboundedReceiver<MirrorJob>) {
    while let Some(job) = rx.recv().await {
        let Some(sync) = sync.upgrade() else { break };
        match job {
            MirrorJob::Write(ops) => sync.apply_mirror(ops).await,
            MirrorJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Periodically retry the initial push while the account is not yet mirrored.
pub fn spawn_sync_worker(sync: Arc<SyncReconciler>) {
    if sync.remote.is_none() {
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sync.settings.retry_delay);
        // The first tick fires immediately; sign-in already covers that moment
        interval.tick().await;
        loop {
            interval.tick().await;
            if sync.is_mirrored() || sync.state().in_flight {
                continue;
            }
            match sync.attempt_push().await {
                Ok(SyncOutcome::Pushed) => tracing::info!("Background sync succeeded"),
                Ok(SyncOutcome::Skipped(reason)) => {
                    tracing::debug!(reason = ?reason, "Background sync skipped")
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Background sync worker error"),
            }
        }
    });
}
