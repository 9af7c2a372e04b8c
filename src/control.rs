//! The control plane (C8): signal handlers, pause-file poller,
//! checkpoint scheduling, metrics emission, and the run/resume
//! orchestrator that drives the iteration engine (C7) and relationship
//! resolver (C6) to completion.
//!
//! Grounded on the teacher's `proxy::server` shutdown-signal wiring
//! (`tokio::signal::unix`), generalized from "stop the proxy" to the
//! three-way pause/resume/stop protocol spec.md §4.8 describes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::signal::unix::{signal, SignalKind};

use crate::error::Result;
use crate::metrics::{MetricsEvent, MetricsSink};
use crate::model::RunStatus;
use crate::rate::RateController;
use crate::store::Store;

/// Shared cooperative pause/stop flags, polled by the engine between
/// batches and by the rate controller between permit acquisitions.
#[derive(Clone)]
pub struct ControlSignal {
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl ControlSignal {
    pub fn new() -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Block (polling every 200ms) while paused and not stopped.
    pub async fn wait_while_paused(&self) {
        while self.is_paused() && !self.stop_requested() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

impl Default for ControlSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls an optional pause-file every second, interpreting
/// `pause`/`resume`/`stop` (case-insensitively, trailing whitespace
/// ignored). Malformed content is ignored with a warning.
pub struct PauseFilePoller {
    path: Option<PathBuf>,
}

impl PauseFilePoller {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Spawn the poll loop on the current runtime; returns immediately.
    /// The loop exits once `signal.stop_requested()` is observed.
    pub fn spawn(self, signal: ControlSignal) {
        let Some(path) = self.path else { return };
        tokio::spawn(async move {
            loop {
                if signal.stop_requested() {
                    return;
                }
                match tokio::fs::read_to_string(&path).await {
                    Ok(contents) => match contents.trim().to_ascii_lowercase().as_str() {
                        "pause" => signal.set_paused(true),
                        "resume" => signal.set_paused(false),
                        "stop" => signal.request_stop(),
                        "" => {}
                        other => tracing::warn!(contents = other, "ignoring malformed pause-file content"),
                    },
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => tracing::warn!("failed to read pause-file: {e}"),
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });
    }
}

/// Registers handlers for INT/TERM (stop) and a dedicated user signal
/// (pause-toggle, `SIGUSR1` on unix). Spawns a background task per
/// signal; returns immediately.
pub fn install_signal_handlers(control: ControlSignal) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    let stop_control = control.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, stopping");
                stop_control.request_stop();
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, stopping");
                stop_control.request_stop();
            }
        }
    });

    tokio::spawn(async move {
        loop {
            if sigusr1.recv().await.is_none() {
                return;
            }
            let now_paused = !control.is_paused();
            control.set_paused(now_paused);
            tracing::info!(paused = now_paused, "pause toggled via signal");
        }
    });

    Ok(())
}

/// The run/resume orchestrator: opens the store, seeds the frontier
/// (for `run`, not `resume`), drives the iteration engine hop-by-hop,
/// then the relationship resolver, emitting metrics events and
/// scheduled checkpoints throughout.
pub struct ControlPlane<'a> {
    store: &'a Store,
    metrics: MetricsSink,
    checkpoint_interval: Duration,
    last_periodic_checkpoint: Mutex<Instant>,
}

impl<'a> ControlPlane<'a> {
    pub fn new(store: &'a Store, metrics: MetricsSink, checkpoint_interval: Duration) -> Self {
        Self {
            store,
            metrics,
            checkpoint_interval,
            last_periodic_checkpoint: Mutex::new(Instant::now()),
        }
    }

    pub fn emit_person_batch(&self, iteration: u32, requested: usize, succeeded: usize) -> Result<()> {
        self.metrics
            .emit(MetricsEvent::person_batch(iteration, requested, succeeded))
    }

    /// Scheduled checkpoint "additionally every `checkpoint_interval_seconds`
    /// when idle in a hop" (spec.md §4.8), as opposed to the one that
    /// always fires at iteration close. Call between units of work
    /// inside a hop; a no-op unless the interval has actually elapsed.
    pub fn maybe_periodic_checkpoint(&self, iteration: u32) -> Result<()> {
        let mut last = self.last_periodic_checkpoint.lock().expect("checkpoint clock poisoned");
        if last.elapsed() < self.checkpoint_interval {
            return Ok(());
        }
        *last = Instant::now();
        drop(last);
        self.emit_checkpoint(Some(iteration))
    }

    pub fn emit_run_start(&self) -> Result<()> {
        self.store.set_run_status(RunStatus::Running)?;
        self.metrics.emit(MetricsEvent::run_start())
    }

    pub fn emit_iteration_complete(&self, iteration: u32, duration_s: f64) -> Result<()> {
        self.metrics
            .emit(MetricsEvent::iteration_complete(iteration, duration_s))
    }

    pub fn emit_checkpoint(&self, iteration: Option<u32>) -> Result<()> {
        self.store.set_meta("last_checkpoint_ts", &chrono::Utc::now().to_rfc3339())?;
        self.metrics.emit(MetricsEvent::checkpoint(iteration))
    }

    pub fn emit_relationships_complete(&self, resolved: u64, duration_s: f64) -> Result<()> {
        self.metrics
            .emit(MetricsEvent::relationships_complete(resolved, duration_s))
    }

    pub fn emit_run_complete(&self) -> Result<()> {
        self.metrics.emit(MetricsEvent::run_complete())
    }

    pub fn checkpoint_interval(&self) -> Duration {
        self.checkpoint_interval
    }
}

/// Blocks the active hop for up to `grace` while in-flight work settles
/// after a stop request, then returns whatever PIDs are still in
/// ProcessingSet so the caller can force them back to the frontier
/// (spec.md §5 "outer deadline" clause).
pub async fn await_graceful_shutdown(store: &Store, rate: &RateController, grace: Duration) -> Result<()> {
    rate.stop();
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let remaining = store.get_ids_to_process()?;
        if remaining.is_empty() || tokio::time::Instant::now() >= deadline {
            if !remaining.is_empty() {
                store.return_to_frontier(&remaining)?;
            }
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pause_then_resume_unblocks_wait() {
        let control = ControlSignal::new();
        control.set_paused(true);
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move {
                control.wait_while_paused().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        control.set_paused(false);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_while_paused should unblock after resume")
            .unwrap();
    }

    #[tokio::test]
    async fn stop_unblocks_pause_wait_without_resuming() {
        let control = ControlSignal::new();
        control.set_paused(true);
        control.request_stop();
        tokio::time::timeout(Duration::from_secs(1), control.wait_while_paused())
            .await
            .expect("stop should unblock a paused wait");
    }
}
