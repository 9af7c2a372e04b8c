//! The person processor (C5): parses a `persons` payload, inserts
//! vertices, emits parent -> child edges, and enqueues unseen
//! parents/children into the frontier (via `Store::add_parent_child_relationship`,
//! which does the enqueueing itself).

use crate::error::{CrawlError, Result};
use crate::fsapi::{PersonRecord, PersonsResponse, RelationshipRecord};
use crate::model::{Color, EdgeType, Vertex};
use crate::store::Store;

/// Outcome of processing one payload: which requested PIDs were
/// actually returned as vertices, plus counters for the iteration log.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    pub vertices_added: u64,
    pub edges_added: u64,
    pub returned_pids: std::collections::HashSet<String>,
    /// `(source, destination)` for every edge created by this payload,
    /// so the caller can classify spanning vs. frontier edges (spec.md
    /// §3) against `Vertex` membership once the whole hop has settled.
    pub edges: Vec<(String, String)>,
}

pub struct PersonProcessor<'a> {
    store: &'a Store,
    /// After this many processed payloads, ask the store for a
    /// mid-iteration commit checkpoint (spec.md §4.5 partial-write
    /// policy). SQLite's own per-statement commits already make every
    /// individual upsert durable, so this counter just drives the
    /// `checkpoint` event cadence the control plane emits.
    checkpoint_every: usize,
    processed_since_checkpoint: std::cell::Cell<usize>,
}

impl<'a> PersonProcessor<'a> {
    pub fn new(store: &'a Store, checkpoint_every: usize) -> Self {
        Self {
            store,
            checkpoint_every: checkpoint_every.max(1),
            processed_since_checkpoint: std::cell::Cell::new(0),
        }
    }

    /// Parse and apply one `persons` response body at the given
    /// iteration. A malformed body is a `CorruptPayload`; the caller
    /// treats the whole chunk's PIDs as a permanent failure.
    pub fn process_payload(&self, body: &[u8], iteration: u32) -> Result<ProcessOutcome> {
        let parsed: PersonsResponse = serde_json::from_slice(body)
            .map_err(|e| CrawlError::CorruptPayload(e.to_string()))?;

        let mut outcome = ProcessOutcome::default();

        for person in &parsed.persons {
            match self.apply_person(person, iteration) {
                Ok(pid) => {
                    outcome.vertices_added += 1;
                    outcome.returned_pids.insert(pid);
                }
                Err(e) => {
                    tracing::warn!("skipping malformed person record: {e}");
                }
            }
        }

        for rel in &parsed.relationships {
            if !rel.is_parent_child() {
                continue;
            }
            match self.apply_relationship(rel) {
                Ok(edge) => {
                    outcome.edges_added += 1;
                    outcome.edges.push(edge);
                }
                Err(e) => tracing::warn!("skipping malformed relationship record: {e}"),
            }
        }

        let count = self.processed_since_checkpoint.get() + 1;
        self.processed_since_checkpoint.set(count);
        if count >= self.checkpoint_every {
            self.processed_since_checkpoint.set(0);
            tracing::debug!("mid-iteration checkpoint after {count} payloads");
        }

        Ok(outcome)
    }

    fn apply_person(&self, person: &PersonRecord, iteration: u32) -> Result<String> {
        let pid = person
            .id
            .clone()
            .ok_or_else(|| CrawlError::CorruptPayload("person record missing id".to_string()))?;

        let display = person.display.as_ref();
        let vertex = Vertex {
            pid: pid.clone(),
            color: person
                .gender
                .as_deref()
                .map(Color::parse)
                .unwrap_or(Color::Unknown),
            surname: display.and_then(|d| d.surname.clone()).unwrap_or_default(),
            given_name: display.and_then(|d| d.given_name.clone()).unwrap_or_default(),
            iteration,
            lifespan: display.and_then(|d| d.lifespan.clone()).unwrap_or_default(),
        };

        self.store.add_individual(&vertex)?;
        Ok(pid)
    }

    /// Emit one edge per listed parent (one if only one parent is
    /// present, two if both are). Initial edge type is
    /// `UnspecifiedParentType` unless the payload already carries a
    /// typed fact. Returns the `(source, destination)` pair so the
    /// caller can classify it against `Vertex` membership later.
    fn apply_relationship(&self, rel: &RelationshipRecord) -> Result<(String, String)> {
        let rel_id = rel
            .id
            .clone()
            .ok_or_else(|| CrawlError::CorruptPayload("relationship record missing id".to_string()))?;
        let child = rel
            .person2
            .clone()
            .ok_or_else(|| CrawlError::CorruptPayload("relationship record missing child".to_string()))?;
        let parent = rel
            .person1
            .clone()
            .ok_or_else(|| CrawlError::CorruptPayload("relationship record missing parent".to_string()))?;

        let edge_type = rel
            .fact_type
            .as_deref()
            .and_then(EdgeType::parse)
            .unwrap_or(EdgeType::UnspecifiedParentType);

        self.store
            .add_parent_child_relationship(&parent, &child, &rel_id, edge_type)?;
        Ok((parent, child))
    }
}
