//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use newscrawl_core::{Pipeline, ProgressReporter, RunState};
use newscrawl_crawler::{ParserRegistry, SourceParser};
use newscrawl_shared::{
    AppConfig, NewsCrawlError, PipelineConfig, RunSummary, SourceConfig, init_config,
    load_config, load_config_from,
};
use newscrawl_storage::Storage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// newscrawl: crawl news sources into a deduplicated article store.
#[derive(Parser)]
#[command(
    name = "newscrawl",
    version,
    about = "Crawl configured news sources into a deduplicated article store.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.newscrawl/newscrawl.toml).
    #[arg(long, global = true, env = "NEWSCRAWL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl sources and persist new articles.
    Run {
        /// Source name(s) to run (repeatable). Defaults to all configured sources.
        #[arg(short, long)]
        source: Vec<String>,

        /// Override the fetch worker pool size.
        #[arg(long)]
        max_workers: Option<usize>,

        /// Cancel each source run after this many seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Print run summaries as JSON on stdout.
        #[arg(long)]
        json: bool,
    },

    /// List configured sources and their parsers.
    Sources,

    /// Show stored article counts and recent runs.
    Stats {
        /// Only show runs for this collection.
        #[arg(short, long)]
        collection: Option<String>,

        /// Number of recent runs to list.
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Config & tracing setup
// ---------------------------------------------------------------------------

/// Load config from `--config` or the default location.
pub(crate) fn load_app_config(cli: &Cli) -> Result<AppConfig> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Log file name prefix; files rotate daily as `newscrawl.<date>.log`.
const LOG_FILE_PREFIX: &str = "newscrawl";

/// Rotated log files kept on disk.
const LOG_FILES_KEPT: usize = 5;

/// Filter directive applying `level` to the newscrawl crates only.
fn crate_filter(level: &str) -> String {
    format!(
        "warn,newscrawl_cli={level},newscrawl_shared={level},newscrawl_crawler={level},\
         newscrawl_storage={level},newscrawl_core={level}"
    )
}

/// Initialize tracing: a stderr layer (CLI flags, `RUST_LOG`, `[logging] level`)
/// and a daily rolling file layer (`[logging] file_level`, `logdir`).
///
/// The returned guard flushes the file writer and must live until exit.
pub(crate) fn init_tracing(cli: &Cli, config: &AppConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

    let logging = &config.logging;

    let console = if cli.verbose == 0 && !logging.console_enabled() {
        None
    } else {
        let level = match cli.verbose {
            0 => logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(crate_filter(level)));
        let layer = match cli.log_format {
            LogFormat::Text => fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .boxed(),
            LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        };
        Some(layer.with_filter(filter))
    };

    let mut guard = None;
    let file = if logging.file_enabled() {
        let dir = logging.log_dir()?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .max_log_files(LOG_FILES_KEPT)
            .build(&dir);

        match appender {
            Ok(appender) => {
                let (writer, file_guard) = tracing_appender::non_blocking(appender);
                guard = Some(file_guard);
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer)
                        .with_filter(EnvFilter::new(crate_filter(&logging.file_level))),
                )
            }
            Err(e) => {
                // No subscriber yet; stderr is all there is.
                eprintln!("cannot write log files to {}: {e}", dir.display());
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| eyre!("failed to initialize logging: {e}"))?;

    Ok(guard)
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command {
        Command::Run {
            source,
            max_workers,
            deadline_secs,
            json,
        } => cmd_run(&config, &source, max_workers, deadline_secs, json).await,
        Command::Sources => cmd_sources(&config),
        Command::Stats { collection, limit } => {
            cmd_stats(&config, collection.as_deref(), limit).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: &AppConfig,
    only: &[String],
    max_workers: Option<usize>,
    deadline_secs: Option<u64>,
    json: bool,
) -> Result<()> {
    config.validate()?;

    // Resolve everything up front: an unknown source or parser is fatal
    // before any network traffic.
    let registry = ParserRegistry::new();
    let selected: Vec<&SourceConfig> = if only.is_empty() {
        config.sources.iter().collect()
    } else {
        only.iter()
            .map(|name| {
                config
                    .source(name)
                    .ok_or_else(|| eyre!("unknown source '{name}'"))
            })
            .collect::<Result<_>>()?
    };
    let jobs: Vec<(&SourceConfig, Arc<dyn SourceParser>)> = selected
        .into_iter()
        .map(|source| Ok((source, registry.get(&source.parser)?)))
        .collect::<Result<_>>()?;

    let mut pipeline_config = PipelineConfig::from(config);
    if let Some(workers) = max_workers {
        if workers == 0 {
            return Err(eyre!("--max-workers must be at least 1"));
        }
        pipeline_config.max_workers = workers;
    }
    if let Some(secs) = deadline_secs {
        pipeline_config.deadline = (secs > 0).then(|| Duration::from_secs(secs));
    }

    let db_path = config.database_path()?;
    let storage = Arc::new(Storage::open(&db_path).await?);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let pipeline = Pipeline::new(pipeline_config, storage.clone())?.with_cancellation(cancel.clone());

    info!(
        sources = jobs.len(),
        database = %db_path.display(),
        "starting crawl"
    );

    let mut summaries = Vec::new();
    for (source, parser) in jobs {
        if cancel.is_cancelled() {
            break;
        }

        let started_at = Utc::now();
        let reporter = CliProgress::new(&source.name, !json);
        let outcome = pipeline.run_source(source, parser.as_ref(), &reporter).await;

        match outcome {
            Ok(summary) => {
                if let Err(e) = storage.record_run(&summary, started_at).await {
                    warn!(source = %source.name, error = %e, "failed to record run history");
                }
                summaries.push(summary);
            }
            Err(NewsCrawlError::Aborted { summary, source: cause }) => {
                // The store is gone; history is best-effort.
                if let Err(e) = storage.record_run(&summary, started_at).await {
                    debug!(source = %source.name, error = %e, "run history not recorded");
                }
                error!(source = %source.name, error = %cause, "run aborted");
                summaries.push(*summary);
                print_summaries(&summaries, json)?;
                return Err(eyre!(
                    "source '{}' aborted: {cause}; remaining sources skipped",
                    source.name
                ));
            }
            Err(e) => return Err(e.into()),
        }
    }

    print_summaries(&summaries, json)
}

fn print_summaries(summaries: &[RunSummary], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summaries)?);
        return Ok(());
    }

    for s in summaries {
        println!();
        println!("  {} → {}", s.source, s.collection);
        println!("  Discovered:  {}", s.discovered);
        println!("  Fetched:     {}", s.fetched);
        println!("  Persisted:   {}", s.persisted);
        println!("  Duplicates:  {} ({} filtered before fetch)", s.skipped_duplicate, s.filtered);
        println!(
            "  Failed:      {} (fetch {}, parse {})",
            s.failed, s.failed_fetch, s.failed_parse
        );
        if s.incomplete > 0 || s.cancelled {
            println!("  Incomplete:  {}{}", s.incomplete, if s.cancelled { " (cancelled)" } else { "" });
        }
        println!("  Time:        {:.1}s", s.duration_ms as f64 / 1000.0);
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    source: String,
    spinner: ProgressBar,
}

impl CliProgress {
    fn new(source: &str, visible: bool) -> Self {
        let spinner = if visible {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self {
            source: source.to_string(),
            spinner,
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, state: RunState) {
        self.spinner.set_message(format!("{}: {state}", self.source));
    }

    fn item_done(&self, url: &str, completed: usize, total: usize) {
        self.spinner
            .set_message(format!("{}: [{completed}/{total}] {url}", self.source));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// sources / stats / config
// ---------------------------------------------------------------------------

fn cmd_sources(config: &AppConfig) -> Result<()> {
    if config.sources.is_empty() {
        println!("No sources configured. Run `newscrawl config init` to create an example.");
        return Ok(());
    }

    let registry = ParserRegistry::new();
    for source in &config.sources {
        let parser_state = match registry.get(&source.parser) {
            Ok(_) => "",
            Err(_) => " (unknown parser)",
        };
        println!(
            "  {:<16} parser={}{parser_state} collection={} {}",
            source.name,
            source.parser,
            source.collection_name(),
            source.base_url
        );
    }
    Ok(())
}

async fn cmd_stats(config: &AppConfig, collection: Option<&str>, limit: u32) -> Result<()> {
    let db_path = config.database_path()?;
    let storage = Storage::open_readonly(&db_path).await?;

    println!();
    println!("  Database: {}", db_path.display());
    for (name, count) in storage.list_collections().await? {
        println!("  {name:<16} {count} articles");
    }

    let runs = storage.list_runs(collection, limit).await?;
    if !runs.is_empty() {
        println!();
        println!("  Recent runs:");
    }
    for run in runs {
        let s = &run.summary;
        println!(
            "  {}  {:<12} persisted={} duplicates={} failed={} incomplete={}{}",
            run.started_at,
            s.collection,
            s.persisted,
            s.skipped_duplicate,
            s.failed,
            s.incomplete,
            if s.cancelled { " cancelled" } else { "" }
        );
    }
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
