//! Rebuilds goal-derived todos after the goal set changes.
//!
//! At most one pass runs at a time. A request arriving mid-pass is remembered
//! and replayed once the pass ends, so the last goal edit is always reflected.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::event::{publish, PlannerEvent};
use crate::models::goal::Goal;
use crate::models::todo::Todo;

use super::carryover::CarryOver;
use super::expansion::expand;
use super::planner::Planner;

#[derive(Debug, Clone, Copy)]
pub struct RegenerationSettings {
    pub chunk_size: usize,
    pub chunk_delay: Duration,
}

impl Default for RegenerationSettings {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            chunk_delay: Duration::from_millis(10),
        }
    }
}

pub struct Regenerator {
    settings: RegenerationSettings,
    in_flight: AtomicBool,
    pending: AtomicBool,
    // Bumped when planner state is replaced wholesale; commits from an
    // older epoch are discarded
    epoch: AtomicU64,
    running: watch::Sender<bool>,
}

impl Regenerator {
    pub fn new(settings: RegenerationSettings) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            settings,
            in_flight: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            running,
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub(super) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(super) fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Resolves once no pass is running or queued.
    pub async fn settled(&self) {
        let mut rx = self.running.subscribe();
        let _ = rx.wait_for(|running| !running).await;
    }
}

/// Smallest window covering every goal's range, or just today without goals.
pub fn union_window(goals: &[Goal], today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = goals.iter().filter_map(|g| g.start_date).min();
    let end = goals.iter().filter_map(|g| g.end_date).max();
    match (start, end) {
        (Some(start), Some(end)) => (start, end),
        _ => (today, today),
    }
}

impl Planner {
    /// Start a regeneration pass, or queue one if a pass is already running.
    pub fn request_regeneration(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let regen = self.regenerator();
        if regen.in_flight.swap(true, Ordering::SeqCst) {
            regen.pending.store(true, Ordering::SeqCst);
            tracing::debug!("Regeneration in flight; queued a replay");
            return None;
        }
        regen.running.send_replace(true);

        let planner = Arc::clone(self);
        Some(tokio::spawn(async move { planner.run_regenerations().await }))
    }

    pub async fn regeneration_settled(&self) {
        self.regenerator().settled().await
    }

    async fn run_regenerations(&self) {
        let regen = self.regenerator();
        loop {
            self.regenerate().await;
            if regen.pending.swap(false, Ordering::SeqCst) {
                continue;
            }
            regen.in_flight.store(false, Ordering::SeqCst);
            // A request that raced the release above only queued itself
            if regen.pending.load(Ordering::SeqCst) && !regen.in_flight.swap(true, Ordering::SeqCst) {
                regen.pending.store(false, Ordering::SeqCst);
                continue;
            }
            break;
        }
        regen.running.send_replace(false);
    }

    async fn regenerate(&self) {
        let settings = self.regenerator().settings;
        let started = std::time::Instant::now();

        let (goals, carry, epoch) = {
            let data = self.data().read().await;
            (
                data.goals.clone(),
                CarryOver::capture(&data.todos),
                self.regenerator().epoch(),
            )
        };
        let (start, end) = union_window(&goals, Utc::now().date_naive());

        let mut derived: Vec<Todo> = Vec::new();
        for goal in &goals {
            match expand(goal, start, end, self.holidays()).await {
                Ok(todos) => derived.extend(todos),
                Err(e) => {
                    tracing::warn!(goal_id = %goal.id, error = %e, "Goal expansion failed; skipping goal")
                }
            }
        }
        let derived = carry.apply(derived);

        if derived.is_empty() {
            if !self.commit_derived(epoch, &[]).await {
                tracing::debug!("Regeneration superseded by replaced planner state");
                return;
            }
        } else {
            let chunk_size = settings.chunk_size.max(1);
            let total_chunks = derived.len().div_ceil(chunk_size);
            for chunk in 1..=total_chunks {
                let committed = (chunk * chunk_size).min(derived.len());
                if !self.commit_derived(epoch, &derived[..committed]).await {
                    tracing::debug!(chunk, total_chunks, "Regeneration superseded by replaced planner state");
                    return;
                }
                publish(
                    self.events(),
                    PlannerEvent::RegenerationProgress {
                        chunk,
                        total_chunks,
                        derived: committed,
                    },
                );
                if chunk < total_chunks {
                    tokio::time::sleep(settings.chunk_delay).await;
                }
            }
        }

        tracing::info!(
            goals = goals.len(),
            derived = derived.len(),
            carried = carry.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Regeneration finished"
        );
        publish(
            self.events(),
            PlannerEvent::RegenerationFinished {
                derived: derived.len(),
            },
        );
    }
}
