//! The durable crawl state store (C1): a single SQLite file in WAL mode
//! holding vertices, edges, the frontier queue, the processing set,
//! iteration log, and job metadata.
//!
//! A single writer connection serializes every mutation (§5 "single
//! writer" discipline), the same split the teacher uses between its
//! `lifestats-writer` OS thread and the read-only `LifestatsQuery` r2d2
//! pool (`pipeline/lifestats.rs`, `pipeline/lifestats_query.rs`): this
//! store keeps one `rusqlite::Connection` behind a `Mutex` for writes,
//! and a small r2d2 pool of read-only connections for status/peek
//! queries so operator inspection never blocks the writer.

mod schema;

use std::path::Path;
use std::sync::Mutex;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{CrawlError, Result};
use crate::model::{Color, Edge, EdgeType, IterationLogRow, Pid, RunStatus, StatusSnapshot, Vertex};

/// The durable crawl state store.
pub struct Store {
    writer: Mutex<Connection>,
    readers: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open (or create) the store at `path`. Runs forward-only schema
    /// migrations keyed on a `schema_version` row in `JOB_METADATA`.
    pub fn open(path: impl AsRef<Path>, create_if_missing: bool) -> Result<Self> {
        let path = path.as_ref();
        if !create_if_missing && !path.exists() {
            return Err(CrawlError::StoreIntegrity(format!(
                "database {} does not exist",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(path)?;
        schema::init(&writer)?;

        let manager = SqliteConnectionManager::file(path).with_flags(
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        );
        let readers = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(CrawlError::Pool)?;

        Ok(Self {
            writer: Mutex::new(writer),
            readers,
        })
    }

    fn writer(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.writer.lock().expect("store writer mutex poisoned")
    }

    // ---- seeding & frontier -------------------------------------------------

    /// Insert `pids` into FrontierQueue, skipping any already present in
    /// Vertex ∪ ProcessingSet ∪ FrontierQueue. Preserves submission
    /// order on first insertion.
    pub fn add_to_frontier(&self, pids: &[Pid]) -> Result<usize> {
        let mut conn = self.writer();
        let tx = conn.transaction()?;
        let mut next_seq: i64 = tx
            .query_row("SELECT COALESCE(MAX(seq), -1) + 1 FROM FRONTIER_QUEUE", [], |r| r.get(0))?;
        let mut inserted = 0usize;
        for pid in pids {
            if Self::is_seen(&tx, pid)? {
                continue;
            }
            tx.execute(
                "INSERT OR IGNORE INTO FRONTIER_QUEUE (id, seq) VALUES (?1, ?2)",
                params![pid, next_seq],
            )?;
            next_seq += 1;
            inserted += 1;
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Safe idempotent seeding at run start: seeds the frontier only if
    /// it is currently empty (and nothing has been promoted yet).
    pub fn seed_frontier_if_empty(&self, pids: &[Pid]) -> Result<bool> {
        let conn = self.writer();
        let frontier_count: i64 = conn.query_row("SELECT COUNT(*) FROM FRONTIER_QUEUE", [], |r| r.get(0))?;
        let processing_count: i64 = conn.query_row("SELECT COUNT(*) FROM PROCESSING_QUEUE", [], |r| r.get(0))?;
        let vertex_count: i64 = conn.query_row("SELECT COUNT(*) FROM VERTEX", [], |r| r.get(0))?;
        drop(conn);
        if frontier_count > 0 || processing_count > 0 || vertex_count > 0 {
            return Ok(false);
        }
        self.add_to_frontier(pids)?;
        Ok(true)
    }

    fn is_seen(tx: &rusqlite::Transaction<'_>, pid: &str) -> Result<bool> {
        let in_vertex: bool = tx
            .query_row("SELECT 1 FROM VERTEX WHERE id = ?1", params![pid], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        if in_vertex {
            return Ok(true);
        }
        let in_processing: bool = tx
            .query_row("SELECT 1 FROM PROCESSING_QUEUE WHERE id = ?1", params![pid], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        if in_processing {
            return Ok(true);
        }
        let in_frontier: bool = tx
            .query_row("SELECT 1 FROM FRONTIER_QUEUE WHERE id = ?1", params![pid], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        Ok(in_frontier)
    }

    // ---- iteration lifecycle ------------------------------------------------

    /// Atomically move up to `max_batch_drain` oldest frontier entries
    /// into ProcessingSet and return the promoted pids. If
    /// ProcessingSet was non-empty on entry (unclean prior shutdown),
    /// returns its current contents verbatim without promoting -- the
    /// crash-recovery path.
    pub fn start_iteration(&self, _n: u32, max_batch_drain: usize) -> Result<Vec<Pid>> {
        let mut conn = self.writer();
        let tx = conn.transaction()?;

        let existing = Self::processing_snapshot(&tx)?;
        if !existing.is_empty() {
            tx.commit()?;
            return Ok(existing);
        }

        let mut stmt = tx.prepare(
            "SELECT id FROM FRONTIER_QUEUE ORDER BY seq ASC LIMIT ?1",
        )?;
        let promoted: Vec<Pid> = stmt
            .query_map(params![max_batch_drain as i64], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        for pid in &promoted {
            tx.execute("DELETE FROM FRONTIER_QUEUE WHERE id = ?1", params![pid])?;
            tx.execute(
                "INSERT OR IGNORE INTO PROCESSING_QUEUE (id) VALUES (?1)",
                params![pid],
            )?;
        }
        tx.commit()?;
        Ok(promoted)
    }

    fn processing_snapshot(tx: &rusqlite::Transaction<'_>) -> Result<Vec<Pid>> {
        let mut stmt = tx.prepare("SELECT id FROM PROCESSING_QUEUE")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// Snapshot of the current ProcessingSet.
    pub fn get_ids_to_process(&self) -> Result<Vec<Pid>> {
        let conn = self.writer();
        let mut stmt = conn.prepare("SELECT id FROM PROCESSING_QUEUE")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// Return PIDs still in ProcessingSet to the frontier. Used at
    /// iteration end (still-in-flight PIDs are treated as failures and
    /// retried next hop) and on cooperative cancellation.
    pub fn return_to_frontier(&self, pids: &[Pid]) -> Result<()> {
        let mut conn = self.writer();
        let tx = conn.transaction()?;
        let mut next_seq: i64 =
            tx.query_row("SELECT COALESCE(MAX(seq), -1) + 1 FROM FRONTIER_QUEUE", [], |r| r.get(0))?;
        for pid in pids {
            tx.execute("DELETE FROM PROCESSING_QUEUE WHERE id = ?1", params![pid])?;
            tx.execute(
                "INSERT OR IGNORE INTO FRONTIER_QUEUE (id, seq) VALUES (?1, ?2)",
                params![pid, next_seq],
            )?;
            next_seq += 1;
        }
        tx.commit()?;
        Ok(())
    }

    // ---- vertex & edge mutation ----------------------------------------------

    /// Upsert into Vertex; remove that pid from ProcessingSet. No-op if
    /// already a Vertex (idempotent for replay safety).
    pub fn add_individual(&self, vertex: &Vertex) -> Result<()> {
        let mut conn = self.writer();
        let tx = conn.transaction()?;
        let already: bool = tx
            .query_row("SELECT 1 FROM VERTEX WHERE id = ?1", params![vertex.pid], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        if !already {
            tx.execute(
                "INSERT INTO VERTEX (id, color, surname, given_name, iteration, lifespan)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    vertex.pid,
                    vertex.color.as_str(),
                    vertex.surname,
                    vertex.given_name,
                    vertex.iteration,
                    vertex.lifespan,
                ],
            )?;
        }
        tx.execute("DELETE FROM PROCESSING_QUEUE WHERE id = ?1", params![vertex.pid])?;
        tx.commit()?;
        Ok(())
    }

    /// Upsert into Edge (keyed by source/destination/relationship_id).
    /// `dest` is the child already being processed this hop; `source`
    /// is the newly-discovered parent, so it is `source` that gets
    /// appended to FrontierQueue when unseen. Idempotent.
    pub fn add_parent_child_relationship(
        &self,
        source: &str,
        dest: &str,
        relationship_id: &str,
        edge_type: EdgeType,
    ) -> Result<()> {
        let mut conn = self.writer();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO EDGE (source, destination, id, type) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source, destination, id) DO UPDATE SET type = excluded.type",
            params![source, dest, relationship_id, edge_type.as_str()],
        )?;
        if !Self::is_seen(&tx, source)? {
            let next_seq: i64 =
                tx.query_row("SELECT COALESCE(MAX(seq), -1) + 1 FROM FRONTIER_QUEUE", [], |r| r.get(0))?;
            tx.execute(
                "INSERT OR IGNORE INTO FRONTIER_QUEUE (id, seq) VALUES (?1, ?2)",
                params![source, next_seq],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Flip edge type to `Resolve` for any child with more than two
    /// incident biological-ish edges from this or prior iterations.
    /// Returns the number of edges flipped.
    pub fn determine_resolution(&self, _iteration: u32) -> Result<usize> {
        let conn = self.writer();
        let mut stmt = conn.prepare(
            "SELECT destination FROM EDGE
             WHERE type IN ('UnspecifiedParentType', 'AssumedBiological', 'BiologicalParent')
             GROUP BY destination
             HAVING COUNT(*) > 2",
        )?;
        let ambiguous_children: Vec<Pid> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);
        drop(conn);

        let mut conn = self.writer();
        let tx = conn.transaction()?;
        let mut flipped = 0usize;
        for child in &ambiguous_children {
            flipped += tx.execute(
                "UPDATE EDGE SET type = 'Resolve'
                 WHERE destination = ?1
                   AND type IN ('UnspecifiedParentType', 'AssumedBiological', 'BiologicalParent')",
                params![child],
            )?;
        }
        tx.commit()?;
        Ok(flipped)
    }

    /// Rewrite `type` for all edges with the given relationship_id.
    pub fn update_relationship(&self, relationship_id: &str, new_type: EdgeType) -> Result<usize> {
        let conn = self.writer();
        let n = conn.execute(
            "UPDATE EDGE SET type = ?1 WHERE id = ?2",
            params![new_type.as_str(), relationship_id],
        )?;
        Ok(n)
    }

    /// Distinct relationship_ids currently flagged `Resolve`.
    pub fn relationships_pending_resolution(&self) -> Result<Vec<String>> {
        let conn = self.writer();
        let mut stmt = conn.prepare("SELECT DISTINCT id FROM EDGE WHERE type = 'Resolve'")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    // ---- iteration / resolution close ----------------------------------------

    /// Write the IterationLog row, clear ProcessingSet, commit. Emits a
    /// `checkpoint` event (left to the caller, which owns the metrics
    /// sink). Advances the resume cursor implicitly (it is always
    /// `max(LOG.iteration) + 1`).
    pub fn end_iteration(&self, row: IterationLogRow) -> Result<()> {
        let mut conn = self.writer();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO LOG (iteration, duration, vertices, frontier, edges, spanning_edges, frontier_edges)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.iteration,
                row.duration_s,
                row.vertices_added,
                row.frontier_size_after,
                row.edges_added,
                row.spanning_edges_added,
                row.frontier_edges_added,
            ],
        )?;
        tx.execute("DELETE FROM PROCESSING_QUEUE", [])?;
        tx.commit()?;
        Ok(())
    }

    /// Records a resolution log entry and commits.
    pub fn end_relationship_resolution(&self, duration_s: f64, count: u64) -> Result<()> {
        let conn = self.writer();
        conn.execute(
            "INSERT INTO RESOLUTION_LOG (duration, edges_resolved, finished_at) VALUES (?1, ?2, ?3)",
            params![duration_s, count, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ---- metadata -------------------------------------------------------------

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.writer();
        conn.execute(
            "INSERT INTO JOB_METADATA (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.writer();
        let value = conn
            .query_row("SELECT value FROM JOB_METADATA WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn set_run_status(&self, status: RunStatus) -> Result<()> {
        self.set_meta("run_status", status.as_str())
    }

    pub fn run_status(&self) -> Result<RunStatus> {
        Ok(self
            .get_meta("run_status")?
            .map(|s| RunStatus::parse(&s))
            .unwrap_or(RunStatus::Idle))
    }

    /// Resume cursor: `max(LOG.iteration) + 1`, or 0 if the log is empty.
    pub fn next_iteration_to_run(&self) -> Result<u32> {
        let conn = self.writer();
        let max: Option<i64> = conn.query_row("SELECT MAX(iteration) FROM LOG", [], |r| r.get(0))?;
        Ok(max.map(|m| (m + 1) as u32).unwrap_or(0))
    }

    // ---- read-only inspection ---------------------------------------------------

    /// Ordered snapshot of the frontier, for operator inspection.
    pub fn peek_frontier(&self, limit: usize) -> Result<Vec<Pid>> {
        let conn = self.readers.get().map_err(CrawlError::Pool)?;
        let mut stmt = conn.prepare("SELECT id FROM FRONTIER_QUEUE ORDER BY seq ASC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    pub fn get_status(&self) -> Result<StatusSnapshot> {
        let conn = self.readers.get().map_err(CrawlError::Pool)?;
        let frontier_depth: i64 = conn.query_row("SELECT COUNT(*) FROM FRONTIER_QUEUE", [], |r| r.get(0))?;
        let processing_depth: i64 = conn.query_row("SELECT COUNT(*) FROM PROCESSING_QUEUE", [], |r| r.get(0))?;
        let vertex_count: i64 = conn.query_row("SELECT COUNT(*) FROM VERTEX", [], |r| r.get(0))?;
        let edge_count: i64 = conn.query_row("SELECT COUNT(*) FROM EDGE", [], |r| r.get(0))?;
        let last_iteration: Option<i64> = conn.query_row("SELECT MAX(iteration) FROM LOG", [], |r| r.get(0))?;
        let run_status: Option<String> = conn
            .query_row("SELECT value FROM JOB_METADATA WHERE key = 'run_status'", [], |r| r.get(0))
            .optional()?;

        Ok(StatusSnapshot {
            frontier_depth: frontier_depth as u64,
            processing_depth: processing_depth as u64,
            vertex_count: vertex_count as u64,
            edge_count: edge_count as u64,
            last_iteration: last_iteration.map(|i| i as u32),
            run_status: run_status.unwrap_or_else(|| RunStatus::Idle.as_str().to_string()),
        })
    }

    pub fn get_vertex(&self, pid: &str) -> Result<Option<Vertex>> {
        let conn = self.readers.get().map_err(CrawlError::Pool)?;
        let row = conn
            .query_row(
                "SELECT id, color, surname, given_name, iteration, lifespan FROM VERTEX WHERE id = ?1",
                params![pid],
                |r| {
                    Ok(Vertex {
                        pid: r.get(0)?,
                        color: Color::parse(&r.get::<_, String>(1)?),
                        surname: r.get(2)?,
                        given_name: r.get(3)?,
                        iteration: r.get::<_, i64>(4)? as u32,
                        lifespan: r.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Which of `pids` currently have a Vertex row, for classifying
    /// edges as spanning (destination in-graph) vs. frontier
    /// (destination still pending) per spec.md §3.
    pub fn vertices_present(&self, pids: &[Pid]) -> Result<std::collections::HashSet<Pid>> {
        let conn = self.readers.get().map_err(CrawlError::Pool)?;
        let mut present = std::collections::HashSet::new();
        let mut stmt = conn.prepare("SELECT 1 FROM VERTEX WHERE id = ?1")?;
        for pid in pids {
            let found: bool = stmt.query_row(params![pid], |_| Ok(true)).optional()?.unwrap_or(false);
            if found {
                present.insert(pid.clone());
            }
        }
        Ok(present)
    }

    /// The destination of the edge with this relationship_id, if any.
    pub fn destination_for_relationship(&self, relationship_id: &str) -> Result<Option<Pid>> {
        let conn = self.readers.get().map_err(CrawlError::Pool)?;
        conn.query_row(
            "SELECT destination FROM EDGE WHERE id = ?1 LIMIT 1",
            params![relationship_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(CrawlError::from)
    }

    /// Types of the edges landing on `destination`, excluding the edge
    /// identified by `exclude_relationship_id`. Used by the relationship
    /// resolver's fallback precedence lookup.
    pub fn sibling_edge_types(&self, destination: &str, exclude_relationship_id: &str) -> Result<Vec<EdgeType>> {
        let conn = self.readers.get().map_err(CrawlError::Pool)?;
        let mut stmt = conn.prepare("SELECT type FROM EDGE WHERE destination = ?1 AND id != ?2")?;
        let rows: Vec<String> = stmt
            .query_map(params![destination, exclude_relationship_id], |r| r.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows.into_iter().filter_map(|s| EdgeType::parse(&s)).collect())
    }

    pub fn edges_from(&self, pid: &str) -> Result<Vec<Edge>> {
        let conn = self.readers.get().map_err(CrawlError::Pool)?;
        let mut stmt =
            conn.prepare("SELECT source, destination, id, type FROM EDGE WHERE source = ?1")?;
        let rows = stmt
            .query_map(params![pid], |r| {
                Ok(Edge {
                    source: r.get(0)?,
                    destination: r.get(1)?,
                    relationship_id: r.get(2)?,
                    edge_type: EdgeType::parse(&r.get::<_, String>(3)?)
                        .unwrap_or(EdgeType::UnspecifiedParentType),
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    #[cfg(test)]
    pub fn all_vertex_ids(&self) -> Result<std::collections::HashSet<Pid>> {
        let conn = self.writer();
        let mut stmt = conn.prepare("SELECT id FROM VERTEX")?;
        let rows = stmt
            .query_map([], |r| r.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    #[cfg(test)]
    pub fn all_edges(&self) -> Result<Vec<Edge>> {
        let conn = self.writer();
        let mut stmt = conn.prepare("SELECT source, destination, id, type FROM EDGE")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(Edge {
                    source: r.get(0)?,
                    destination: r.get(1)?,
                    relationship_id: r.get(2)?,
                    edge_type: EdgeType::parse(&r.get::<_, String>(3)?)
                        .unwrap_or(EdgeType::UnspecifiedParentType),
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    #[cfg(test)]
    pub fn frontier_snapshot(&self) -> Result<Vec<Pid>> {
        self.peek_frontier(usize::MAX)
    }
}
