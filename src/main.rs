use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sciabaca::config::{Config, ConfigProvider, FileConfigProvider, StaticConfigProvider};
use sciabaca::metrics;
use sciabaca::orchestrator::{
    ApiBinding, CrawlOrchestrator, CycleOutcome, PlaceBinding, ScraperBinding,
};
use sciabaca::storage::{EventStore, SharedEventStore, SqliteEventStore};

#[derive(Parser)]
#[command(
    name = "sciabaca",
    version,
    about = "Crawls social-network events, tags them by nearest city and keeps a reconciled event store",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (re-read before every crawl cycle)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the configured one
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl at startup, then every configured interval until Ctrl-C
    Run,

    /// Run a single crawl cycle and print its report
    Crawl,

    /// List upcoming stored events
    Upcoming {
        /// Only events near these places (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        places: Option<Vec<String>>,
    },

    /// Count upcoming stored events per nearest place
    Places,

    /// Run a single crawl cycle and print Prometheus metrics
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing/logging
    let format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(format, &config.logging.level, cli.verbose)?;

    tracing::info!(sources = config.sources.len(), "sciabaca starting");

    match cli.command {
        Commands::Run => {
            tracing::info!(interval_secs = config.crawler.interval_secs, "Starting run command");
            run(cli.config, config).await?;
        }

        Commands::Crawl => {
            tracing::info!("Starting crawl command");
            let report = crawl_once(cli.config, config).await?;
            println!("{report}");
        }

        Commands::Upcoming { places } => {
            tracing::info!(places = ?places, "Starting upcoming command");
            upcoming(&config, places)?;
        }

        Commands::Places => {
            tracing::info!("Starting places command");
            places(&config)?;
        }

        Commands::Metrics => {
            tracing::info!("Starting metrics command");
            if let Err(e) = metrics::init_metrics() {
                tracing::warn!(error = %e, "Metrics initialization failed");
            }
            let report = crawl_once(cli.config, config).await?;
            tracing::info!("{report}");
            let text = metrics::gather().map_err(|e| anyhow::anyhow!("{e}"))?;
            print!("{text}");
        }
    }

    tracing::info!("sciabaca completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("sciabaca=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .or_else(|_| tracing_subscriber::EnvFilter::try_new(format!("sciabaca={level},warn")))
            .context("Invalid log level")?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<SharedEventStore> {
    let store = SqliteEventStore::open(&config.database.sqlite_path).with_context(|| {
        format!(
            "Failed to open event store: {}",
            config.database.sqlite_path.display()
        )
    })?;
    Ok(Arc::new(store))
}

fn build_orchestrator(path: Option<PathBuf>, config: Config) -> Result<Arc<CrawlOrchestrator>> {
    let provider: Arc<dyn ConfigProvider> = match path {
        Some(path) => Arc::new(FileConfigProvider::new(path)),
        None => Arc::new(StaticConfigProvider::new(config.clone())),
    };

    // scraper, API client and places follow each cycle's snapshot
    Ok(Arc::new(CrawlOrchestrator::new(
        provider,
        ScraperBinding::PerCycle,
        ApiBinding::PerCycle,
        open_store(&config)?,
        PlaceBinding::from_config(),
    )))
}

async fn run(path: Option<PathBuf>, config: Config) -> Result<()> {
    let interval = config.interval();
    let orchestrator = build_orchestrator(path, config)?;

    let stopper = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        stopper.stop();
    });

    orchestrator.run_forever(interval).await;
    Ok(())
}

async fn crawl_once(path: Option<PathBuf>, config: Config) -> Result<String> {
    let orchestrator = build_orchestrator(path, config)?;

    let summary = match orchestrator.trigger().await? {
        CycleOutcome::Completed(report) => format!(
            "{}\nduration: {:.1}s",
            serde_json::to_string_pretty(&report)?,
            report.duration.as_secs_f64()
        ),
        CycleOutcome::Skipped(reason) => format!("Cycle skipped: {reason:?}"),
    };
    Ok(summary)
}

fn upcoming(config: &Config, places: Option<Vec<String>>) -> Result<()> {
    let store = open_store(config)?;
    let events = store.upcoming(Utc::now(), places.as_deref())?;

    if events.is_empty() {
        println!("No upcoming events");
        return Ok(());
    }

    for event in events {
        println!(
            "{}  {:<20}  {}  {}",
            event.start_time.format("%Y-%m-%d %H:%M"),
            event.nearest_place.as_deref().unwrap_or("-"),
            event.name,
            event.url
        );
    }
    Ok(())
}

fn places(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    for count in store.count_by_place(Utc::now())? {
        println!(
            "{:<24} {}",
            count.nearest_place.as_deref().unwrap_or("(untagged)"),
            count.events
        );
    }
    Ok(())
}
