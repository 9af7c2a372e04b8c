//! JSON-lines metrics event emission (C8's output). The sink itself
//! (where the lines end up being collected/shipped) is external per
//! spec.md §1; this module only shapes and writes the lines, the way
//! the teacher's `storage::mod` writes one JSON object per line to an
//! append-only event log.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::json;

use crate::error::Result;

#[derive(Debug, Serialize)]
pub struct MetricsEvent {
    pub event: &'static str,
    pub ts: String,
    #[serde(flatten)]
    pub fields: serde_json::Value,
}

impl MetricsEvent {
    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    pub fn run_start() -> Self {
        Self {
            event: "run_start",
            ts: Self::now(),
            fields: json!({}),
        }
    }

    pub fn person_batch(iteration: u32, requested: usize, succeeded: usize) -> Self {
        Self {
            event: "person_batch",
            ts: Self::now(),
            fields: json!({ "iteration": iteration, "requested": requested, "succeeded": succeeded }),
        }
    }

    pub fn iteration_complete(iteration: u32, duration_s: f64) -> Self {
        Self {
            event: "iteration_complete",
            ts: Self::now(),
            fields: json!({ "iteration": iteration, "duration_s": duration_s }),
        }
    }

    pub fn relationships_complete(resolved: u64, duration_s: f64) -> Self {
        Self {
            event: "relationships_complete",
            ts: Self::now(),
            fields: json!({ "resolved": resolved, "duration_s": duration_s }),
        }
    }

    pub fn checkpoint(iteration: Option<u32>) -> Self {
        Self {
            event: "checkpoint",
            ts: Self::now(),
            fields: json!({ "iteration": iteration }),
        }
    }

    pub fn run_complete() -> Self {
        Self {
            event: "run_complete",
            ts: Self::now(),
            fields: json!({}),
        }
    }
}

/// Append-only JSON-lines writer. `None` path means metrics are
/// dropped (still logged at debug level for local inspection).
pub struct MetricsSink {
    file: Option<Mutex<std::fs::File>>,
}

impl MetricsSink {
    pub fn open(path: Option<PathBuf>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Some(Mutex::new(
                    std::fs::OpenOptions::new().create(true).append(true).open(path)?,
                ))
            }
            None => None,
        };
        Ok(Self { file })
    }

    pub fn emit(&self, event: MetricsEvent) -> Result<()> {
        let line = serde_json::to_string(&event)?;
        tracing::debug!(%line, "metrics event");
        if let Some(file) = &self.file {
            let mut file = file.lock().expect("metrics sink mutex poisoned");
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}
