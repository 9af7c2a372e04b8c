//! The batch partitioner (C4): splits a set of PIDs into request
//! batches of at most `persons_per_request` IDs, builds one URL per
//! chunk, and dispatches them concurrently under the rate controller's
//! person-phase bound, the same fan-out-then-await-all shape the
//! teacher's `embedding_indexer` uses to drain a backlog in bounded
//! batches (`pipeline/embedding_indexer.rs`), generalized here from a
//! single dedicated thread to `futures::stream::buffer_unordered` over
//! async tasks.

use futures::stream::{self, StreamExt};

use crate::error::{CrawlError, Result};
use crate::http::{HttpClient, Outcome};
use crate::model::Pid;
use crate::rate::{Phase, RateController};

pub const DEFAULT_PERSONS_PER_REQUEST: usize = 200;

/// One fetched-and-classified chunk, handed to the caller (C5) for
/// processing. `requested` is kept so failed chunks can be returned to
/// the frontier without re-deriving which PIDs they covered.
pub struct ChunkResult {
    pub requested: Vec<Pid>,
    pub outcome: ChunkOutcome,
}

pub enum ChunkOutcome {
    Success(bytes::Bytes),
    Failed(String),
    Cancelled,
}

pub struct Partitioner {
    persons_per_request: usize,
}

impl Partitioner {
    pub fn new(persons_per_request: usize) -> Self {
        Self {
            persons_per_request: persons_per_request.max(1),
        }
    }

    pub fn chunks<'a>(&self, pids: &'a [Pid]) -> Vec<&'a [Pid]> {
        pids.chunks(self.persons_per_request).collect()
    }

    /// Dispatch every chunk of `pids` concurrently (bounded by the rate
    /// controller's person-phase concurrency cap), retrying
    /// transient/throttled failures up to `max_retries` before
    /// demoting a chunk to `Failed`. Awaits all chunks before
    /// returning; a `Failed`/`Cancelled` chunk's PIDs are NOT removed
    /// from the result -- the caller (the iteration engine) is
    /// responsible for returning them to the frontier, per spec.md
    /// §4.4's "no silent drop" rule. A 401 is fatal for the whole run
    /// (spec.md §7 `AuthExpired`), so it short-circuits the dispatch
    /// rather than being folded into a per-chunk `Failed`.
    pub async fn dispatch<F>(
        &self,
        pids: &[Pid],
        url_for_chunk: F,
        client: &dyn HttpClient,
        rate: &RateController,
    ) -> Result<Vec<ChunkResult>>
    where
        F: Fn(&[Pid]) -> String,
    {
        let chunks: Vec<Vec<Pid>> = self
            .chunks(pids)
            .into_iter()
            .map(|c| c.to_vec())
            .collect();

        let concurrency = rate.config().max_concurrent_person_requests.max(1);

        let results: Vec<std::result::Result<ChunkResult, CrawlError>> = stream::iter(chunks)
            .map(|chunk| {
                let url = url_for_chunk(&chunk);
                async move {
                    let outcome = self.fetch_with_retry(&url, client, rate).await?;
                    Ok(ChunkResult {
                        requested: chunk,
                        outcome,
                    })
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        results.into_iter().collect()
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        client: &dyn HttpClient,
        rate: &RateController,
    ) -> std::result::Result<ChunkOutcome, CrawlError> {
        let max_retries = rate.config().max_retries;
        for attempt in 0..=max_retries {
            let permit = match rate.acquire(Phase::Person).await {
                Ok(p) => p,
                Err(_) => return Ok(ChunkOutcome::Cancelled),
            };
            let outcome = client.get(url).await;
            drop(permit);

            match outcome {
                Outcome::Success { body } => {
                    rate.report_success().await;
                    return Ok(ChunkOutcome::Success(body));
                }
                Outcome::AuthExpired => {
                    return Err(CrawlError::AuthExpired);
                }
                Outcome::Throttled { retry_after_secs } => {
                    rate.report_throttled(retry_after_secs).await;
                    if attempt == max_retries {
                        return Ok(ChunkOutcome::Failed("throttled: retries exhausted".to_string()));
                    }
                }
                Outcome::Transient(msg) => {
                    if attempt == max_retries {
                        return Ok(ChunkOutcome::Failed(format!("transient: retries exhausted ({msg})")));
                    }
                }
                Outcome::PermanentFailure { status, body } => {
                    return Ok(ChunkOutcome::Failed(format!("http {status}: {body}")));
                }
            }
        }
        Ok(ChunkOutcome::Failed("unreachable: loop exhausted without return".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_respect_batch_size() {
        let p = Partitioner::new(3);
        let pids: Vec<Pid> = (0..7).map(|i| i.to_string()).collect();
        let chunks = p.chunks(&pids);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(chunks[2].len(), 1);
    }

    #[test]
    fn zero_batch_size_clamped_to_one() {
        let p = Partitioner::new(0);
        assert_eq!(p.persons_per_request, 1);
    }
}
