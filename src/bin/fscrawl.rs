//! Thin CLI wrapper (spec.md §6): argument parsing, tracing setup, and
//! mapping `CrawlError::exit_code()` to the process exit code. Every
//! other responsibility lives in the `fscrawl` library crate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use fscrawl::error::CrawlError;
use fscrawl::{checkpoint_status, default_http_client, run_crawl, Endpoints, RunConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "fscrawl")]
#[command(version, about = "FamilySearch genealogy crawl engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start or continue a crawl.
    Run {
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long, default_value = "crawl")]
        basename: String,
        #[arg(long = "seed")]
        seeds: Vec<String>,
        #[arg(long, default_value_t = 10)]
        max_hops: u32,
        #[arg(long)]
        pause_file: Option<PathBuf>,
        #[arg(long)]
        metrics_file: Option<PathBuf>,
        #[arg(long)]
        persons_base_url: String,
        #[arg(long)]
        relationships_base_url: String,
    },
    /// Resume an existing crawl. Requires an existing database; ignores seeds.
    Resume {
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long, default_value = "crawl")]
        basename: String,
        #[arg(long)]
        pause_file: Option<PathBuf>,
        #[arg(long)]
        metrics_file: Option<PathBuf>,
        #[arg(long)]
        persons_base_url: String,
        #[arg(long)]
        relationships_base_url: String,
    },
    /// Open the database read-only and print status as JSON.
    Checkpoint {
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long, default_value = "crawl")]
        basename: String,
        #[arg(long)]
        status: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "fscrawl=info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn persons_endpoint(base_url: String) -> Box<dyn Fn(&[String]) -> String + Send + Sync> {
    Box::new(move |pids: &[String]| format!("{base_url}?pids={}", pids.join(",")))
}

fn relationship_endpoint(base_url: String) -> Box<dyn Fn(&[String]) -> String + Send + Sync> {
    Box::new(move |ids: &[String]| format!("{base_url}/{}", ids.join(",")))
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Command::Run {
            output_dir,
            basename,
            seeds,
            max_hops,
            pause_file,
            metrics_file,
            persons_base_url,
            relationships_base_url,
        } => {
            let mut config = RunConfig::from_env(seeds);
            config.output_dir = output_dir;
            config.basename = basename;
            config.max_hops = max_hops;
            config.pause_file = pause_file;
            config.metrics_file = metrics_file;

            execute_run(config, persons_base_url, relationships_base_url, true).await
        }
        Command::Resume {
            output_dir,
            basename,
            pause_file,
            metrics_file,
            persons_base_url,
            relationships_base_url,
        } => {
            let mut config = RunConfig::from_env(Vec::new());
            config.output_dir = output_dir;
            config.basename = basename;
            config.pause_file = pause_file;
            config.metrics_file = metrics_file;

            execute_run(config, persons_base_url, relationships_base_url, false).await
        }
        Command::Checkpoint {
            output_dir,
            basename,
            status,
        } => {
            if !status {
                eprintln!("checkpoint: pass --status");
                1
            } else {
                let db_path = output_dir.join(format!("{basename}.db"));
                match checkpoint_status(db_path) {
                    Ok(snapshot) => {
                        println!("{}", serde_json::to_string_pretty(&snapshot).unwrap());
                        0
                    }
                    Err(e) => {
                        eprintln!("checkpoint failed: {e}");
                        e.exit_code()
                    }
                }
            }
        }
    };

    std::process::exit(exit_code);
}

async fn execute_run(
    config: RunConfig,
    persons_base_url: String,
    relationships_base_url: String,
    seed_frontier: bool,
) -> i32 {
    let client = match default_http_client(Duration::from_secs(30)) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("failed to build http client: {e}");
            return e.exit_code();
        }
    };

    let endpoints = Endpoints {
        persons_url: persons_endpoint(persons_base_url),
        relationship_url: relationship_endpoint(relationships_base_url),
    };

    match run_crawl(config, client, endpoints, seed_frontier).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("crawl exited with error: {e}");
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(e: &CrawlError) -> i32 {
    e.exit_code()
}
