use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use log::{error, info, warn};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::detection::DiscoveryOrchestrator;
use super::reconciler::Reconciler;
use crate::config::SchedulerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub interval_secs: Option<u64>,
    pub rounds_completed: u64,
    pub consecutive_failures: u32,
    pub last_round_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Counts of one discover-then-reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoundSummary {
    pub working: usize,
    pub rejected: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub offline: usize,
}

#[derive(Debug, Default)]
struct Stats {
    rounds_completed: u64,
    consecutive_failures: u32,
    last_round_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    interval: Duration,
}

/// Runs discovery and reconciliation on a fixed interval in the background
pub struct ContinuousDetectionScheduler {
    orchestrator: Arc<DiscoveryOrchestrator>,
    reconciler: Arc<Reconciler>,
    config: SchedulerConfig,
    worker: Mutex<Option<Worker>>,
    /// Worker left behind by a `stop` that timed out, still finishing its round
    draining: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<RwLock<Stats>>,
}

impl ContinuousDetectionScheduler {
    pub fn new(
        orchestrator: Arc<DiscoveryOrchestrator>,
        reconciler: Arc<Reconciler>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            orchestrator,
            reconciler,
            config,
            worker: Mutex::new(None),
            draining: Mutex::new(None),
            stats: Arc::new(RwLock::new(Stats::default())),
        }
    }

    /// Spawn the background worker. Returns `false` when one is already
    /// running, or when a stopped worker is still finishing its last round.
    pub async fn start(&self, interval: Duration) -> bool {
        let mut worker = self.worker.lock().await;
        if let Some(current) = worker.as_ref() {
            if !current.handle.is_finished() {
                warn!("Continuous detection is already running, ignoring start request");
                return false;
            }
        }

        let mut draining = self.draining.lock().await;
        if draining.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("Previous detection round is still finishing, ignoring start request");
            return false;
        }
        *draining = None;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker_loop(
            self.orchestrator.clone(),
            self.reconciler.clone(),
            self.stats.clone(),
            cancel.clone(),
            interval,
            Duration::from_secs(self.config.backoff_secs),
        ));

        info!("Started continuous detection every {:?}", interval);
        *worker = Some(Worker {
            cancel,
            handle,
            interval,
        });
        true
    }

    /// Signal the worker and wait for it up to the configured stop timeout.
    ///
    /// A round in flight when the wait expires is left to finish on its own;
    /// the worker exits without starting another one, and `start` is
    /// refused until it has.
    pub async fn stop(&self) -> bool {
        let mut worker = self.worker.lock().await;
        let Some(mut current) = worker.take() else {
            warn!("Continuous detection is not running");
            return false;
        };

        current.cancel.cancel();
        let wait = Duration::from_millis(self.config.stop_timeout_ms);
        match tokio::time::timeout(wait, &mut current.handle).await {
            Ok(Ok(())) => info!("Continuous detection stopped"),
            Ok(Err(e)) => error!("Continuous detection worker ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    "Discovery round still in flight after {:?}, detaching worker",
                    wait
                );
                *self.draining.lock().await = Some(current.handle);
            }
        }
        true
    }

    /// `true` while a stopped worker is still finishing its last round
    pub async fn is_draining(&self) -> bool {
        self.draining
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub async fn status(&self) -> SchedulerStatus {
        let (state, interval_secs) = match self.worker.lock().await.as_ref() {
            Some(w) if !w.handle.is_finished() => (SchedulerState::Running, Some(w.interval.as_secs())),
            _ => (SchedulerState::Stopped, None),
        };
        let stats = self.stats.read().await;
        SchedulerStatus {
            state,
            interval_secs,
            rounds_completed: stats.rounds_completed,
            consecutive_failures: stats.consecutive_failures,
            last_round_at: stats.last_round_at,
            last_error: stats.last_error.clone(),
        }
    }

    /// One discover-then-reconcile pass in the caller's task
    pub async fn run_once(&self) -> Result<RoundSummary> {
        run_round(&self.orchestrator, &self.reconciler).await
    }
}

async fn run_round(orchestrator: &DiscoveryOrchestrator, reconciler: &Reconciler) -> Result<RoundSummary> {
    let round = orchestrator.detect_all().await?;
    let report = reconciler.reconcile(&round.working).await;
    let offline = reconciler.mark_offline(round.offline_persisted()).await;

    Ok(RoundSummary {
        working: round.working.len(),
        rejected: round.rejected.len(),
        created: report.created.len(),
        updated: report.updated.len(),
        failed: report.failed.len(),
        offline,
    })
}

async fn worker_loop(
    orchestrator: Arc<DiscoveryOrchestrator>,
    reconciler: Arc<Reconciler>,
    stats: Arc<RwLock<Stats>>,
    cancel: CancellationToken,
    interval: Duration,
    backoff: Duration,
) {
    while !cancel.is_cancelled() {
        let outcome = AssertUnwindSafe(run_round(&orchestrator, &reconciler))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(summary)) => {
                info!(
                    "Detection round: {} working, {} new, {} updated, {} failed, {} offline",
                    summary.working, summary.created, summary.updated, summary.failed, summary.offline
                );
                None
            }
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(panic) => Some(match panic.downcast_ref::<&str>() {
                Some(msg) => format!("round panicked: {}", msg),
                None => match panic.downcast_ref::<String>() {
                    Some(msg) => format!("round panicked: {}", msg),
                    None => "round panicked".to_string(),
                },
            }),
        };

        let pause = {
            let mut stats = stats.write().await;
            stats.last_round_at = Some(Utc::now());
            match failure {
                None => {
                    stats.rounds_completed += 1;
                    stats.consecutive_failures = 0;
                    stats.last_error = None;
                    interval
                }
                Some(message) => {
                    stats.consecutive_failures += 1;
                    error!(
                        "Detection round failed ({} in a row), retrying in {:?}: {}",
                        stats.consecutive_failures, backoff, message
                    );
                    stats.last_error = Some(message);
                    backoff
                }
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    info!("Continuous detection worker exiting");
}
