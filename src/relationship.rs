//! The relationship resolver (C6): drains edges flagged `Resolve`,
//! fetches the disambiguating fact from the remote service in batches,
//! and rewrites their type, the same fetch-classify-persist shape C4/C5
//! use for the person phase but keyed on relationship_id instead of pid.

use futures::stream::{self, StreamExt};

use crate::error::{CrawlError, Result};
use crate::fsapi::ResolutionResponse;
use crate::http::{HttpClient, Outcome};
use crate::model::EdgeType;
use crate::rate::{Phase, RateController};
use crate::store::Store;

/// Precedence table for resolving an ambiguous relationship's final
/// type (spec.md §4.6, Open Question 2 resolved in SPEC_FULL.md):
/// the remote service's own classification always wins; if it returns
/// nothing usable, fall back to the highest-precedence type already
/// recorded among the relationship's sibling edges rather than leaving
/// it `Resolve` forever.
pub fn precedence(edge_type: EdgeType) -> u8 {
    match edge_type {
        EdgeType::UnspecifiedParentType => 0,
        EdgeType::AssumedBiological => 1,
        EdgeType::BiologicalParent => 2,
        EdgeType::NonBiological => 2,
        EdgeType::Resolve => 255,
    }
}

pub struct RelationshipResolver<'a> {
    store: &'a Store,
    ids_per_request: usize,
}

impl<'a> RelationshipResolver<'a> {
    pub fn new(store: &'a Store, ids_per_request: usize) -> Self {
        Self {
            store,
            ids_per_request: ids_per_request.max(1),
        }
    }

    /// Run one full resolution pass: fetch every `Resolve`-flagged
    /// relationship_id's disambiguating fact and rewrite its type.
    /// Returns the number of relationships resolved.
    pub async fn resolve_all<F>(
        &self,
        current_iter: u32,
        url_for_chunk: F,
        client: &dyn HttpClient,
        rate: &RateController,
    ) -> Result<u64>
    where
        F: Fn(&[String]) -> String,
    {
        self.store.determine_resolution(current_iter)?;
        let pending = self.store.relationships_pending_resolution()?;
        if pending.is_empty() {
            return Ok(0);
        }

        let chunks: Vec<Vec<String>> = pending.chunks(self.ids_per_request).map(|c| c.to_vec()).collect();
        let concurrency = rate.config().max_concurrent_relationship_requests.max(1);

        let results: Vec<Result<Vec<ResolutionResponse>>> = stream::iter(chunks)
            .map(|chunk| {
                let url = url_for_chunk(&chunk);
                async move { self.fetch_chunk(&url, client, rate).await }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut resolved = 0u64;
        for result in results {
            match result {
                Ok(responses) => {
                    for r in responses {
                        if self.apply_resolution(&r)? {
                            resolved += 1;
                        }
                    }
                }
                Err(e @ CrawlError::AuthExpired) => return Err(e),
                Err(e) => {
                    tracing::warn!("relationship resolution chunk failed: {e}");
                }
            }
        }
        Ok(resolved)
    }

    async fn fetch_chunk(
        &self,
        url: &str,
        client: &dyn HttpClient,
        rate: &RateController,
    ) -> Result<Vec<ResolutionResponse>> {
        let max_retries = rate.config().max_retries;
        for attempt in 0..=max_retries {
            let permit = rate
                .acquire(Phase::Relationship)
                .await
                .map_err(|_| CrawlError::Cancelled)?;
            let outcome = client.get(url).await;
            drop(permit);

            match outcome {
                Outcome::Success { body } => {
                    rate.report_success().await;
                    let parsed: Vec<ResolutionResponse> = serde_json::from_slice(&body)
                        .map_err(|e| CrawlError::CorruptPayload(e.to_string()))?;
                    return Ok(parsed);
                }
                Outcome::AuthExpired => return Err(CrawlError::AuthExpired),
                Outcome::Throttled { retry_after_secs } => {
                    rate.report_throttled(retry_after_secs).await;
                    if attempt == max_retries {
                        return Err(CrawlError::Throttled { retry_after_secs });
                    }
                }
                Outcome::Transient(msg) => {
                    if attempt == max_retries {
                        return Err(CrawlError::Transient(msg));
                    }
                }
                Outcome::PermanentFailure { status, body } => {
                    return Err(CrawlError::PermanentFailure(format!("http {status}: {body}")));
                }
            }
        }
        Err(CrawlError::Transient("retries exhausted".to_string()))
    }

    /// Apply one resolution response: if the remote service gave a
    /// usable type, rewrite the edge to it; otherwise fall back to the
    /// highest-precedence sibling edge already on file. Returns whether
    /// the relationship was resolved (either way counts, since leaving
    /// it `Resolve` forever would stall the engine's DONE transition).
    fn apply_resolution(&self, response: &ResolutionResponse) -> Result<bool> {
        let rel_id = match &response.id {
            Some(id) => id,
            None => return Ok(false),
        };

        let resolved_type = response
            .resolved_type
            .as_deref()
            .and_then(EdgeType::parse)
            .filter(|t| *t != EdgeType::Resolve);

        let final_type = match resolved_type {
            Some(t) => t,
            None => self.fallback_type(rel_id)?,
        };

        self.store.update_relationship(rel_id, final_type)?;
        Ok(true)
    }

    /// Highest-precedence type already recorded among this relationship's
    /// sibling edges (other edges landing on the same child), for when
    /// the remote service's resolution response is unusable. Falls back
    /// to `BiologicalParent` if the edge or its siblings can't be found.
    fn fallback_type(&self, rel_id: &str) -> Result<EdgeType> {
        let Some(destination) = self.store.destination_for_relationship(rel_id)? else {
            return Ok(EdgeType::BiologicalParent);
        };
        let siblings = self.store.sibling_edge_types(&destination, rel_id)?;
        Ok(siblings
            .into_iter()
            .filter(|t| *t != EdgeType::Resolve)
            .max_by_key(|t| precedence(*t))
            .unwrap_or(EdgeType::BiologicalParent))
    }
}
