//! Schema creation and forward-only migrations, keyed on a
//! `schema_version` row in `JOB_METADATA` the way
//! `pipeline::lifestats::LifestatsProcessor::init_schema` keys its own
//! migrations off a `metadata` table.

use rusqlite::Connection;

use crate::error::Result;

const CURRENT_SCHEMA_VERSION: i32 = 1;

pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA busy_timeout=5000;
        PRAGMA foreign_keys=ON;
        "#,
    )?;

    let table_exists: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='JOB_METADATA'",
            [],
            |_| Ok(true),
        )
        .unwrap_or(false);

    let current_version: i32 = if table_exists {
        conn.query_row(
            "SELECT CAST(value AS INTEGER) FROM JOB_METADATA WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0)
    } else {
        0
    };

    if current_version < 1 {
        apply_v1(conn)?;
    }

    Ok(())
}

fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS JOB_METADATA (
            key TEXT PRIMARY KEY,
            value TEXT
        );

        CREATE TABLE IF NOT EXISTS VERTEX (
            id TEXT PRIMARY KEY,
            color TEXT NOT NULL,
            surname TEXT NOT NULL DEFAULT '',
            given_name TEXT NOT NULL DEFAULT '',
            iteration INTEGER NOT NULL,
            lifespan TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_vertex_iteration ON VERTEX(iteration);

        CREATE TABLE IF NOT EXISTS EDGE (
            source TEXT NOT NULL,
            destination TEXT NOT NULL,
            id TEXT NOT NULL,
            type TEXT NOT NULL,
            PRIMARY KEY (source, destination, id)
        );
        CREATE INDEX IF NOT EXISTS idx_edge_type_source ON EDGE(type, source);
        CREATE INDEX IF NOT EXISTS idx_edge_type_destination ON EDGE(type, destination);
        CREATE INDEX IF NOT EXISTS idx_edge_rel_id ON EDGE(id);

        CREATE TABLE IF NOT EXISTS FRONTIER_QUEUE (
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_frontier_seq ON FRONTIER_QUEUE(seq);

        CREATE TABLE IF NOT EXISTS PROCESSING_QUEUE (
            id TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS LOG (
            iteration INTEGER PRIMARY KEY,
            duration REAL NOT NULL,
            vertices INTEGER NOT NULL,
            frontier INTEGER NOT NULL,
            edges INTEGER NOT NULL,
            spanning_edges INTEGER NOT NULL,
            frontier_edges INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS RESOLUTION_LOG (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            duration REAL NOT NULL,
            edges_resolved INTEGER NOT NULL,
            finished_at TEXT NOT NULL
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO JOB_METADATA (key, value) VALUES ('schema_version', ?1)",
        [CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}
