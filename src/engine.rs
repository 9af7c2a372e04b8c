//! The iteration engine (C7): the per-hop BFS driver. Promotes
//! frontier -> processing, dispatches batches via C4, hands results to
//! C5, and closes the iteration once every batch has settled.

use std::time::{Duration, Instant};

use crate::batch::{ChunkOutcome, Partitioner};
use crate::control::{ControlPlane, ControlSignal};
use crate::error::Result;
use crate::http::HttpClient;
use crate::model::{IterationLogRow, Pid};
use crate::person::PersonProcessor;
use crate::rate::RateController;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopOutcome {
    /// Another hop should run; `next_iteration` is the one just closed + 1.
    Continue,
    /// `next_iteration_to_run() >= max_hops`, or the frontier drained to
    /// empty: move on to relationship resolution.
    Resolve,
    /// A stop was requested mid-hop; the caller should unwind to DONE/ABORTED.
    Stopped,
}

pub struct IterationEngineConfig {
    pub max_hops: u32,
    pub max_batch_drain: usize,
    pub persons_per_request: usize,
    pub inter_batch_delay: Duration,
    pub checkpoint_every_payloads: usize,
}

pub struct IterationEngine<'a> {
    store: &'a Store,
    config: IterationEngineConfig,
}

impl<'a> IterationEngine<'a> {
    pub fn new(store: &'a Store, config: IterationEngineConfig) -> Self {
        Self { store, config }
    }

    /// Run one hop. Mirrors spec.md §4.7's per-hop algorithm exactly:
    /// determine the next iteration number, promote up to
    /// `max_batch_drain` frontier entries, dispatch and process
    /// batches, return stragglers to the frontier, and commit the
    /// iteration log row.
    pub async fn run_hop<F>(
        &self,
        url_for_chunk: F,
        client: &dyn HttpClient,
        rate: &RateController,
        control: &ControlSignal,
        control_plane: Option<&ControlPlane<'_>>,
    ) -> Result<HopOutcome>
    where
        F: Fn(&[Pid]) -> String,
    {
        let n = self.store.next_iteration_to_run()?;
        if n >= self.config.max_hops {
            return Ok(HopOutcome::Resolve);
        }

        let processing = self.store.start_iteration(n, self.config.max_batch_drain)?;
        if processing.is_empty() {
            return Ok(HopOutcome::Resolve);
        }

        let started = Instant::now();
        let partitioner = Partitioner::new(self.config.persons_per_request);
        let processor = PersonProcessor::new(self.store, self.config.checkpoint_every_payloads);

        let mut vertices_added = 0u64;
        let mut edges_added = 0u64;
        let mut hop_edges: Vec<(Pid, Pid)> = Vec::new();
        let mut stopped = false;

        let chunks = partitioner.chunks(&processing);
        for (i, _) in chunks.iter().enumerate() {
            if control.stop_requested() {
                stopped = true;
                break;
            }
            control.wait_while_paused().await;
            if control.stop_requested() {
                stopped = true;
                break;
            }

            // Dispatch exactly this one chunk so we can check for
            // pause/stop between chunks rather than only before/after
            // the whole batch set (spec.md §4.7 cancellation points).
            let chunk_pids = &processing[i * self.config.persons_per_request.max(1)
                ..((i + 1) * self.config.persons_per_request.max(1)).min(processing.len())];
            let results = partitioner
                .dispatch(chunk_pids, &url_for_chunk, client, rate)
                .await?;

            for result in results {
                let requested = result.requested.len();
                match result.outcome {
                    ChunkOutcome::Success(body) => match processor.process_payload(&body, n) {
                        Ok(outcome) => {
                            vertices_added += outcome.vertices_added;
                            edges_added += outcome.edges_added;
                            let succeeded = outcome.returned_pids.len();
                            hop_edges.extend(outcome.edges);
                            if let Some(cp) = control_plane {
                                cp.emit_person_batch(n, requested, succeeded)?;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("person payload rejected, returning batch to frontier: {e}");
                            self.store.return_to_frontier(&result.requested)?;
                            if let Some(cp) = control_plane {
                                cp.emit_person_batch(n, requested, 0)?;
                            }
                        }
                    },
                    ChunkOutcome::Failed(reason) => {
                        tracing::warn!(reason, "chunk failed, returning to frontier");
                        self.store.return_to_frontier(&result.requested)?;
                        if let Some(cp) = control_plane {
                            cp.emit_person_batch(n, requested, 0)?;
                        }
                    }
                    ChunkOutcome::Cancelled => {
                        stopped = true;
                        self.store.return_to_frontier(&result.requested)?;
                    }
                }
            }

            if let Some(cp) = control_plane {
                cp.maybe_periodic_checkpoint(n)?;
            }

            if !self.config.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }
        }

        // Any PID still in ProcessingSet after every dispatched batch
        // has settled is a failure: return it to the frontier for
        // retry next hop (spec.md §4.5/§4.7).
        let stragglers = self.store.get_ids_to_process()?;
        if !stragglers.is_empty() {
            self.store.return_to_frontier(&stragglers)?;
        }

        // Classify each edge added this hop against Vertex membership
        // of its destination, taken *after* every batch has settled
        // (spec.md §3: "spanning edges are edges whose destination is
        // in-graph at iteration end; frontier edges are edges whose
        // destination is still pending").
        let destinations: Vec<Pid> = hop_edges.iter().map(|(_, dest)| dest.clone()).collect();
        let in_graph = self.store.vertices_present(&destinations)?;
        let spanning_edges_added = hop_edges.iter().filter(|(_, dest)| in_graph.contains(dest)).count() as u64;
        let frontier_edges_added = edges_added.saturating_sub(spanning_edges_added);

        let frontier_size_after = self.store.get_status()?.frontier_depth;
        self.store.end_iteration(IterationLogRow {
            iteration: n,
            duration_s: started.elapsed().as_secs_f64(),
            vertices_added,
            frontier_size_after,
            edges_added,
            spanning_edges_added,
            frontier_edges_added,
        })?;

        if stopped {
            return Ok(HopOutcome::Stopped);
        }
        Ok(HopOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Outcome;
    use async_trait::async_trait;

    struct CannedClient {
        body: &'static str,
    }

    #[async_trait]
    impl HttpClient for CannedClient {
        async fn get(&self, _url: &str) -> Outcome {
            Outcome::Success {
                body: bytes::Bytes::from_static(self.body.as_bytes()),
            }
        }
        fn request_count(&self) -> u64 {
            0
        }
    }

    #[tokio::test]
    async fn scenario_s1_single_seed_one_hop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("crawl.db"), true).unwrap();
        store.seed_frontier_if_empty(&["P0".to_string()]).unwrap();

        let client = CannedClient {
            body: r#"{
                "persons": [{"id": "P0", "gender": "male", "display": {"surname": "X", "givenName": "Y"}}],
                "relationships": [
                    {"id": "R1", "type": "ParentChild", "person1": "P1", "person2": "P0"},
                    {"id": "R2", "type": "ParentChild", "person1": "P2", "person2": "P0"}
                ]
            }"#,
        };
        let rate = RateController::new(crate::rate::ThrottleConfig {
            requests_per_second: 1000.0,
            burst: 1000.0,
            ..Default::default()
        });
        let control = ControlSignal::new();

        let engine = IterationEngine::new(
            &store,
            IterationEngineConfig {
                max_hops: 1,
                max_batch_drain: 10,
                persons_per_request: 200,
                inter_batch_delay: Duration::ZERO,
                checkpoint_every_payloads: 8,
            },
        );

        let outcome = engine
            .run_hop(
                |_pids| "http://example.invalid/persons".to_string(),
                &client,
                &rate,
                &control,
                None,
            )
            .await
            .unwrap();
        // n=0, max_hops=1: 0 >= 1 is false, so this hop runs and closes
        // iteration 0. `Resolve` only fires on the next call (n=1).
        assert_eq!(outcome, HopOutcome::Continue);

        assert!(store.all_vertex_ids().unwrap().contains("P0"));
        let mut frontier = store.frontier_snapshot().unwrap();
        frontier.sort();
        assert_eq!(frontier, vec!["P1".to_string(), "P2".to_string()]);
    }
}
