//! The data model from spec.md §3: person identifiers, vertices, edges,
//! and the run status enum threaded through JobMetadata.

use serde::{Deserialize, Serialize};

/// An opaque short string assigned by the remote service. Equality is
/// exact string equality; PIDs are never parsed or interpreted.
pub type Pid = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Male,
    Female,
    Unknown,
}

impl Color {
    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Male => "male",
            Color::Female => "female",
            Color::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "male" => Color::Male,
            "female" => Color::Female,
            _ => Color::Unknown,
        }
    }
}

/// A person vertex, as persisted by `Store::add_individual`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertex {
    pub pid: Pid,
    pub color: Color,
    pub surname: String,
    pub given_name: String,
    pub iteration: u32,
    pub lifespan: String,
}

/// Edge type. Ordering here matches the precedence table in spec.md
/// §4.6 (lowest to highest confidence), used by
/// `relationship::precedence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EdgeType {
    UnspecifiedParentType,
    AssumedBiological,
    BiologicalParent,
    NonBiological,
    Resolve,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::UnspecifiedParentType => "UnspecifiedParentType",
            EdgeType::AssumedBiological => "AssumedBiological",
            EdgeType::BiologicalParent => "BiologicalParent",
            EdgeType::NonBiological => "NonBiological",
            EdgeType::Resolve => "Resolve",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UnspecifiedParentType" => Some(EdgeType::UnspecifiedParentType),
            "AssumedBiological" => Some(EdgeType::AssumedBiological),
            "BiologicalParent" => Some(EdgeType::BiologicalParent),
            "NonBiological" => Some(EdgeType::NonBiological),
            "Resolve" => Some(EdgeType::Resolve),
            _ => None,
        }
    }

    /// The "biological-ish" set followed by downstream graph consumers.
    pub fn is_biological_ish(&self) -> bool {
        matches!(
            self,
            EdgeType::UnspecifiedParentType
                | EdgeType::AssumedBiological
                | EdgeType::BiologicalParent
        )
    }
}

/// A directed parent -> child edge, keyed by (source, destination, relationship_id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub source: Pid,
    pub destination: Pid,
    pub relationship_id: String,
    pub edge_type: EdgeType,
}

/// One completed iteration's counters, as written to the IterationLog.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IterationCounts {
    pub vertices_added: u64,
    pub edges_added: u64,
    pub spanning_edges_added: u64,
    pub frontier_edges_added: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct IterationLogRow {
    pub iteration: u32,
    pub duration_s: f64,
    pub vertices_added: u64,
    pub frontier_size_after: u64,
    pub edges_added: u64,
    pub spanning_edges_added: u64,
    pub frontier_edges_added: u64,
}

/// Run status threaded through JobMetadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Paused,
    Resolving,
    Done,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Resolving => "resolving",
            RunStatus::Done => "done",
            RunStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => RunStatus::Running,
            "paused" => RunStatus::Paused,
            "resolving" => RunStatus::Resolving,
            "done" => RunStatus::Done,
            "aborted" => RunStatus::Aborted,
            _ => RunStatus::Idle,
        }
    }
}

/// Snapshot returned by `Store::get_status`, for `checkpoint --status`
/// and periodic metrics emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub frontier_depth: u64,
    pub processing_depth: u64,
    pub vertex_count: u64,
    pub edge_count: u64,
    pub last_iteration: Option<u32>,
    pub run_status: String,
}
