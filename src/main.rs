//! # Repository Harvester Entry Point
//!
//! `serve` runs the HTTP API, `harvest` prints one export document and
//! `batch` harvests every repository listed in a CSV file.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use repo_harvester::batch::{load_entries, select, BatchOptions, BatchRunner};
use repo_harvester::config::HarvesterConfig;
use repo_harvester::export::Exporter;
use repo_harvester::harvest::HttpFetcher;
use repo_harvester::http::ReqwestFetcher;
use repo_harvester::logging::init_subscriber;
use repo_harvester::server::{run_server, AppState};
use repo_harvester::store::GraphStore;
use repo_harvester::{HarvestExecutor, HarvestTarget};

#[derive(Debug, Parser)]
#[command(name = "repo-harvester", version, about = "Research data repository metadata harvester")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the harvest API over HTTP
    Serve {
        /// Overrides HARVESTER_BIND_ADDR
        #[arg(long)]
        bind: Option<std::net::SocketAddr>,
    },
    /// Harvest one repository and print the export document
    Harvest {
        url: String,
        #[arg(long)]
        fairsharing_id: Option<String>,
        #[arg(long)]
        re3data_id: Option<String>,
    },
    /// Harvest every repository listed in a CSV file
    Batch {
        #[arg(long, default_value = "repos.csv")]
        csv: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
        /// Only entries whose name or URL contains this (case-insensitive)
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = HarvesterConfig::load()?;
    init_subscriber(&config.log_level, config.log_format)?;

    let fetcher = ReqwestFetcher::new(&config.user_agent, config.http_timeout)?;
    let client = fetcher.client().clone();
    let fetcher: Arc<dyn HttpFetcher> = Arc::new(fetcher);
    let orchestrator = Arc::new(config.orchestrator(fetcher));
    let exporter = Exporter::new(config.graph_scheme.clone());
    let store = config
        .graph_store
        .clone()
        .map(|store| Arc::new(GraphStore::new(client, store, exporter.clone())));

    match cli.command {
        Command::Serve { bind } => {
            let state = AppState {
                orchestrator,
                exporter,
                store,
            };
            run_server(bind.unwrap_or(config.bind_addr), state).await?;
        }
        Command::Harvest {
            url,
            fairsharing_id,
            re3data_id,
        } => {
            let target = HarvestTarget::new(url)
                .with_fairsharing_id(fairsharing_id)
                .with_re3data_id(re3data_id);
            let result = orchestrator.harvest_with_hints(target).await;
            let document = exporter.export(&result.record);
            println!("{}", serde_json::to_string_pretty(&document)?);
            if let Some(store) = store {
                store.spawn_persist(result).await?;
            }
        }
        Command::Batch {
            csv,
            limit,
            filter,
            dry_run,
            output_dir,
        } => {
            let options = BatchOptions {
                limit,
                filter,
                dry_run,
                output_dir,
            };
            let entries = select(load_entries(&csv)?, &options);
            if entries.is_empty() {
                println!("No repositories to harvest.");
                return Ok(());
            }

            if options.dry_run {
                for (i, entry) in entries.iter().enumerate() {
                    println!("{:3}. {}", i + 1, entry.name);
                    println!("     URL: {}", entry.url);
                    if !entry.remarks.is_empty() {
                        println!("     Note: {}", entry.remarks);
                    }
                }
                println!("\nTotal: {} repositories", entries.len());
                return Ok(());
            }

            let executor = Arc::new(HarvestExecutor::new(orchestrator, config.batch_concurrency));
            let summary = BatchRunner::new(executor, exporter)
                .with_store(store)
                .run(entries, &options.output_dir)
                .await?;
            println!(
                "Success: {}  Incomplete: {}  Failed: {}  ({:.1}s)",
                summary.success_count,
                summary.incomplete_count,
                summary.failed_count,
                summary.duration_seconds
            );
        }
    }

    Ok(())
}
