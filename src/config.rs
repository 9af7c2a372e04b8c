//! Run configuration (SPEC_FULL.md §10.3): layered the way the
//! teacher's `config/mod.rs` layers its own `Config` — environment
//! variables over a TOML file (`dirs::config_dir()`-rooted) over
//! built-in defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::rate::ThrottleConfig;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub output_dir: PathBuf,
    pub basename: String,
    pub seeds: Vec<String>,
    pub max_hops: u32,
    pub throttle: ThrottleConfig,
    pub persons_per_request: usize,
    pub max_batch_drain: usize,
    pub inter_batch_delay: Duration,
    pub checkpoint_every_payloads: usize,
    pub pause_file: Option<PathBuf>,
    pub metrics_file: Option<PathBuf>,
    pub checkpoint_interval_seconds: u64,
    pub shutdown_grace_seconds: u64,
}

impl RunConfig {
    pub fn db_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.db", self.basename))
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./crawl-out"),
            basename: "crawl".to_string(),
            seeds: Vec::new(),
            max_hops: 10,
            throttle: ThrottleConfig::default(),
            persons_per_request: crate::batch::DEFAULT_PERSONS_PER_REQUEST,
            max_batch_drain: 200,
            inter_batch_delay: Duration::from_millis(0),
            checkpoint_every_payloads: 8,
            pause_file: None,
            metrics_file: None,
            checkpoint_interval_seconds: 60,
            shutdown_grace_seconds: 30,
        }
    }
}

/// Subset of `RunConfig` that makes sense to persist in a TOML file,
/// the same split the teacher draws between `Config` and `FileConfig`.
#[derive(Debug, Deserialize, Default)]
struct FileRunConfig {
    output_dir: Option<String>,
    basename: Option<String>,
    max_hops: Option<u32>,
    requests_per_second: Option<f64>,
    burst: Option<f64>,
    max_concurrent_person_requests: Option<usize>,
    max_concurrent_relationship_requests: Option<usize>,
    max_retries: Option<u32>,
    persons_per_request: Option<usize>,
    max_batch_drain: Option<usize>,
    inter_batch_delay_ms: Option<u64>,
    checkpoint_every_payloads: Option<usize>,
    pause_file: Option<String>,
    metrics_file: Option<String>,
    checkpoint_interval_seconds: Option<u64>,
    shutdown_grace_seconds: Option<u64>,
}

impl RunConfig {
    /// `~/.config/fscrawl/config.toml`, mirroring
    /// `Config::config_path()`'s `dirs::home_dir()`-rooted layout.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("fscrawl").join("config.toml"))
    }

    fn load_file_config() -> FileRunConfig {
        let Some(path) = Self::config_path() else {
            return FileRunConfig::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("config error: failed to parse {}: {e}", path.display());
                std::process::exit(1);
            }),
            Err(_) => FileRunConfig::default(),
        }
    }

    /// Layered load: environment variables over the TOML file over
    /// built-in defaults. `seeds` is runtime-only (supplied by the CLI
    /// invocation, never persisted).
    pub fn from_env(seeds: Vec<String>) -> Self {
        let file = Self::load_file_config();
        let defaults = Self::default();

        let output_dir = std::env::var("FSCRAWL_OUTPUT_DIR")
            .ok()
            .or(file.output_dir)
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        let basename = std::env::var("FSCRAWL_BASENAME")
            .ok()
            .or(file.basename)
            .unwrap_or(defaults.basename);

        let max_hops = std::env::var("FSCRAWL_MAX_HOPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.max_hops)
            .unwrap_or(defaults.max_hops);

        let throttle = ThrottleConfig {
            requests_per_second: std::env::var("FSCRAWL_REQUESTS_PER_SECOND")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(file.requests_per_second)
                .unwrap_or(defaults.throttle.requests_per_second),
            burst: file.burst.unwrap_or(defaults.throttle.burst),
            max_concurrent_person_requests: file
                .max_concurrent_person_requests
                .unwrap_or(defaults.throttle.max_concurrent_person_requests),
            max_concurrent_relationship_requests: file
                .max_concurrent_relationship_requests
                .unwrap_or(defaults.throttle.max_concurrent_relationship_requests),
            max_retries: file.max_retries.unwrap_or(defaults.throttle.max_retries),
            ..defaults.throttle.clone()
        };

        let pause_file = std::env::var("FSCRAWL_PAUSE_FILE")
            .ok()
            .or(file.pause_file)
            .map(PathBuf::from);

        let metrics_file = std::env::var("FSCRAWL_METRICS_FILE")
            .ok()
            .or(file.metrics_file)
            .map(PathBuf::from);

        Self {
            output_dir,
            basename,
            seeds,
            max_hops,
            throttle,
            persons_per_request: file.persons_per_request.unwrap_or(defaults.persons_per_request),
            max_batch_drain: file.max_batch_drain.unwrap_or(defaults.max_batch_drain),
            inter_batch_delay: file
                .inter_batch_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.inter_batch_delay),
            checkpoint_every_payloads: file
                .checkpoint_every_payloads
                .unwrap_or(defaults.checkpoint_every_payloads),
            pause_file,
            metrics_file,
            checkpoint_interval_seconds: file
                .checkpoint_interval_seconds
                .unwrap_or(defaults.checkpoint_interval_seconds),
            shutdown_grace_seconds: file
                .shutdown_grace_seconds
                .unwrap_or(defaults.shutdown_grace_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_path_joins_output_dir_and_basename() {
        let mut config = RunConfig::default();
        config.output_dir = PathBuf::from("/tmp/out");
        config.basename = "mycrawl".to_string();
        assert_eq!(config.db_path(), PathBuf::from("/tmp/out/mycrawl.db"));
    }
}
