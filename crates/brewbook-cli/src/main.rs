use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use brewbook_sync::{SeedConfig, SeedOptions, SeedPipeline, SeedRunSummary};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "brewbook")]
#[command(about = "Brewbook content pipeline: Storyblok stories into the search index")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, normalize and index every relevant story.
    Seed {
        /// Clear the index before writing.
        #[arg(long)]
        replace_all: bool,
        /// Fetch and normalize without touching the index.
        #[arg(long)]
        dry_run: bool,
        /// Read stories from a fixture file instead of the CMS.
        #[arg(long)]
        fixture: Option<PathBuf>,
        #[arg(long)]
        skip_synonyms: bool,
    },
    /// Apply index settings and synonyms only.
    ConfigureIndex {
        #[arg(long)]
        skip_synonyms: bool,
    },
    /// Print the records a fixture file normalizes into.
    Normalize {
        #[arg(long)]
        fixture: PathBuf,
    },
    /// Run the webhook and search service.
    Serve,
    /// Re-run the seed on the configured cron until Ctrl-C.
    Schedule,
    /// Summarize recent seed runs.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
        /// Defaults to BREWBOOK_REPORTS_DIR, then ./reports.
        #[arg(long)]
        reports_dir: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("brewbook=info"));
    let json = std::env::var("BREWBOOK_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

fn print_summary(summary: &SeedRunSummary) {
    println!("seed complete: run_id={}", summary.run_id);
    println!("  cafes:    {}", summary.record_stats.cafe_count);
    println!("  events:   {}", summary.record_stats.event_count);
    println!("  indexed:  {}", summary.indexing.indexed);
    println!("  skipped:  {}", summary.indexing.skipped);
    println!(
        "  status:   {}",
        if summary.is_valid { "SUCCESS" } else { "INCOMPLETE" }
    );
    println!("  message:  {}", summary.message);
    println!("  duration: {} ms", summary.duration_ms);
    println!("  report:   {}", summary.report_dir);
}

async fn run(command: Commands) -> Result<bool> {
    match command {
        Commands::Seed {
            replace_all,
            dry_run,
            fixture,
            skip_synonyms,
        } => {
            let options = SeedOptions {
                replace_all,
                dry_run,
                skip_synonyms,
            };
            let summary = brewbook_sync::run_seed_from_env(&options, fixture).await?;
            print_summary(&summary);
            Ok(summary.is_valid)
        }
        Commands::ConfigureIndex { skip_synonyms } => {
            let config = SeedConfig::from_env()?;
            let pipeline = SeedPipeline::from_config(&config, None)?;
            pipeline.configure_index(skip_synonyms).await?;
            println!("index {} configured", pipeline.index().index_name());
            Ok(true)
        }
        Commands::Normalize { fixture } => {
            let batch = brewbook_sync::normalize_fixture(&fixture)?;
            println!("{}", serde_json::to_string_pretty(&batch.records)?);
            eprintln!(
                "processed={} skipped={} errors={}",
                batch.stats.processed, batch.stats.skipped, batch.stats.errors
            );
            Ok(true)
        }
        Commands::Serve => {
            let config = SeedConfig::from_env()?;
            let state = brewbook_web::AppState::from_config(&config)?;
            let pipeline = Arc::new(SeedPipeline::from_config(&config, None)?);
            let scheduler = brewbook_sync::maybe_build_scheduler(&config, pipeline).await?;
            if let Some(scheduler) = &scheduler {
                scheduler.start().await.context("starting scheduler")?;
                info!(cron = %config.seed_cron, "seed scheduler started");
            }
            brewbook_web::serve(state, config.web_port).await?;
            Ok(true)
        }
        Commands::Schedule => {
            let config = SeedConfig::from_env()?;
            let pipeline = Arc::new(SeedPipeline::from_config(&config, None)?);
            let mut scheduler =
                brewbook_sync::build_scheduler(pipeline, &config.seed_cron, SeedOptions::default()).await?;
            scheduler.start().await.context("starting scheduler")?;
            info!(cron = %config.seed_cron, "seed scheduler started; Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            scheduler.shutdown().await.context("stopping scheduler")?;
            Ok(true)
        }
        Commands::Report { runs, reports_dir } => {
            let reports_dir = reports_dir.unwrap_or_else(SeedConfig::reports_dir_from_env);
            println!("{}", brewbook_sync::report_markdown(&reports_dir, runs)?);
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli.command.unwrap_or(Commands::Seed {
        replace_all: false,
        dry_run: false,
        fixture: None,
        skip_synonyms: false,
    }))
    .await
    {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = ?err, "command failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
