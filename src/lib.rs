//! Core crawl engine for a FamilySearch-style genealogy crawler: a
//! durable graph+queue store, a hop-by-hop BFS iteration engine, and a
//! polite rate-limited HTTP controller, wired together by a control
//! plane that drives run/resume/checkpoint.
//!
//! The CLI surface (argument parsing, process entry point) lives in
//! `src/bin/fscrawl.rs`; this crate exposes only the engine.

pub mod batch;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod fsapi;
pub mod http;
pub mod metrics;
pub mod model;
pub mod person;
pub mod rate;
pub mod relationship;
pub mod store;

pub use config::RunConfig;
pub use error::{CrawlError, Result};
pub use store::Store;

use std::sync::Arc;
use std::time::Duration;

use control::{await_graceful_shutdown, install_signal_handlers, ControlPlane, ControlSignal, PauseFilePoller};
use engine::{HopOutcome, IterationEngine, IterationEngineConfig};
use http::{HttpClient, ReqwestSession};
use metrics::MetricsSink;
use model::RunStatus;
use rate::RateController;
use relationship::RelationshipResolver;

/// A URL-building closure pair, since `run`/`resume` need to reach the
/// out-of-scope authenticated-session layer (spec.md §1) for the
/// `persons` and relationship-resolution endpoints.
pub struct Endpoints {
    pub persons_url: Box<dyn Fn(&[String]) -> String + Send + Sync>,
    pub relationship_url: Box<dyn Fn(&[String]) -> String + Send + Sync>,
}

/// Run (or continue) a crawl to completion: seed the frontier (if this
/// is a fresh `run`, not a `resume`), drive the iteration engine hop by
/// hop, then the relationship resolver, until DONE or a stop request.
///
/// `client` is the already-authenticated HTTP session (out of scope
/// per spec.md §1); callers typically pass `ReqwestSession::build_default`.
pub async fn run_crawl(
    config: RunConfig,
    client: Arc<dyn HttpClient>,
    endpoints: Endpoints,
    seed_frontier: bool,
) -> Result<()> {
    let store = Store::open(config.db_path(), true)?;
    if seed_frontier && !config.seeds.is_empty() {
        store.seed_frontier_if_empty(&config.seeds)?;
    }

    let metrics = MetricsSink::open(config.metrics_file.clone())?;
    let control_plane = ControlPlane::new(
        &store,
        metrics,
        Duration::from_secs(config.checkpoint_interval_seconds),
    );
    let control_signal = ControlSignal::new();
    install_signal_handlers(control_signal.clone())?;
    PauseFilePoller::new(config.pause_file.clone()).spawn(control_signal.clone());

    let rate = RateController::new(config.throttle.clone());
    let engine = IterationEngine::new(
        &store,
        IterationEngineConfig {
            max_hops: config.max_hops,
            max_batch_drain: config.max_batch_drain,
            persons_per_request: config.persons_per_request,
            inter_batch_delay: config.inter_batch_delay,
            checkpoint_every_payloads: config.checkpoint_every_payloads,
        },
    );

    control_plane.emit_run_start()?;

    loop {
        if control_signal.stop_requested() {
            break;
        }
        control_signal.wait_while_paused().await;
        if control_signal.stop_requested() {
            break;
        }

        let hop_started = std::time::Instant::now();
        let before = store.next_iteration_to_run()?;
        let outcome = engine
            .run_hop(
                |pids| (endpoints.persons_url)(&pids.to_vec()),
                client.as_ref(),
                &rate,
                &control_signal,
                Some(&control_plane),
            )
            .await?;
        // `Resolve` can fire with no iteration actually closed (max_hops
        // already reached, or the frontier was already empty) -- only
        // emit iteration metrics when a LOG row genuinely committed.
        let after = store.next_iteration_to_run()?;
        if after > before {
            let closed = after.saturating_sub(1);
            control_plane.emit_iteration_complete(closed, hop_started.elapsed().as_secs_f64())?;
            control_plane.emit_checkpoint(Some(closed))?;
        }

        match outcome {
            HopOutcome::Continue => continue,
            HopOutcome::Resolve => break,
            HopOutcome::Stopped => {
                store.set_run_status(RunStatus::Aborted)?;
                await_graceful_shutdown(&store, &rate, Duration::from_secs(config.shutdown_grace_seconds)).await?;
                control_plane.emit_run_complete()?;
                return Ok(());
            }
        }
    }

    if control_signal.stop_requested() {
        store.set_run_status(RunStatus::Aborted)?;
        await_graceful_shutdown(&store, &rate, Duration::from_secs(config.shutdown_grace_seconds)).await?;
        control_plane.emit_run_complete()?;
        return Ok(());
    }

    store.set_run_status(RunStatus::Resolving)?;
    let resolve_started = std::time::Instant::now();
    let resolver = RelationshipResolver::new(&store, config.persons_per_request);
    let final_iteration = store.next_iteration_to_run()?.saturating_sub(1);
    let resolved = resolver
        .resolve_all(
            final_iteration,
            |ids| (endpoints.relationship_url)(&ids.to_vec()),
            client.as_ref(),
            &rate,
        )
        .await?;
    let resolve_duration = resolve_started.elapsed().as_secs_f64();
    store.end_relationship_resolution(resolve_duration, resolved)?;
    control_plane.emit_relationships_complete(resolved, resolve_duration)?;

    store.set_run_status(RunStatus::Done)?;
    control_plane.emit_run_complete()?;
    Ok(())
}

/// `checkpoint --status`: open the database read-only (via the store's
/// read pool) and return a status snapshot.
pub fn checkpoint_status(db_path: impl AsRef<std::path::Path>) -> Result<model::StatusSnapshot> {
    let store = Store::open(db_path, false)?;
    store.get_status()
}

/// Convenience constructor mirroring `ReqwestSession::build_default`,
/// re-exported so the bin crate doesn't need to depend on `reqwest`
/// directly for the common case.
pub fn default_http_client(timeout: Duration) -> Result<ReqwestSession> {
    ReqwestSession::build_default(timeout)
}
