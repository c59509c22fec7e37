//! CLI command definitions, routing, and tracing setup.

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use triagesync_backends::{AnyBot, build_bot};
use triagesync_core::{
    ExecutionReport, ProgressReporter, ReconcileMode, SyncOptions, SyncOutcome, run_sync,
};
use triagesync_hierarchy::ResolveDiagnostic;
use triagesync_shared::{
    AppConfig, RetryPolicy, TicketKey, db_path, find_bot, init_config, load_config,
    validate_tracker,
};
use triagesync_store::Store;
use triagesync_tracker::{TrackerClient, token_from_env};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// triagesync — keep a knowledge base in step with a ticket hierarchy.
#[derive(Parser)]
#[command(
    name = "triagesync",
    version,
    about = "Synchronize a remote knowledge base with the top duplicate-hierarchy parents of an issue tracker.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Summarizer bot name (defaults to the config's `defaults.summarizer`).
    #[arg(long, global = true)]
    pub summarizer: Option<String>,

    /// Publisher bot name (defaults to the config's `defaults.publisher`).
    #[arg(long, global = true)]
    pub publisher: Option<String>,

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
    /// Start over: retire everything published, then publish the top N.
    Init {
        /// How many ultimate parents to publish (defaults to config).
        #[arg(short, long)]
        size: Option<usize>,
    },

    /// Converge on the top-N, refreshing entries whose hierarchy changed.
    Update {
        /// Expand or shrink to this size; otherwise hold the current count.
        #[arg(short, long)]
        size: Option<usize>,
    },

    /// Resize the published set to exactly N tickets.
    Resize {
        /// Target size.
        #[arg(short, long)]
        size: usize,
    },

    /// Re-summarize and re-publish every published entry unconditionally.
    Refresh,

    /// Diagnostic run restricted to a single ticket, bypassing ranking.
    TestTicket {
        /// Ticket key (e.g. FEED-123).
        key: String,
    },

    /// Show the current published count and the last run's report.
    Status,

    /// List configured bots.
    Bots,

    /// Launch the interactive menu.
    Interactive,

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
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "triagesync=info",
        1 => "triagesync=debug",
        _ => "triagesync=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Init { size } => {
            let config = load_config()?;
            let size = size.unwrap_or(config.defaults.target_size);
            cmd_sync(&cli, config, ReconcileMode::Init, Some(size)).await
        }
        Command::Update { size } => {
            let config = load_config()?;
            cmd_sync(&cli, config, ReconcileMode::Update, *size).await
        }
        Command::Resize { size } => {
            let config = load_config()?;
            cmd_sync(&cli, config, ReconcileMode::Resize, Some(*size)).await
        }
        Command::Refresh => {
            let config = load_config()?;
            cmd_sync(&cli, config, ReconcileMode::ForceRefresh, None).await
        }
        Command::TestTicket { key } => {
            let config = load_config()?;
            let mode = ReconcileMode::TestUpdate(TicketKey::from(key.as_str()));
            cmd_sync(&cli, config, mode, None).await
        }
        Command::Status => cmd_status().await,
        Command::Bots => cmd_bots(),
        Command::Interactive => interactive_entry(&cli).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

async fn interactive_entry(cli: &Cli) -> Result<()> {
    crate::interactive::run_interactive(cli.summarizer.as_deref(), cli.publisher.as_deref()).await
}

// ---------------------------------------------------------------------------
// Sync runs
// ---------------------------------------------------------------------------

/// Wire up tracker, bots, and store from config, then run one reconciliation.
pub(crate) async fn cmd_sync(
    cli: &Cli,
    config: AppConfig,
    mode: ReconcileMode,
    target_size: Option<usize>,
) -> Result<()> {
    run_mode(
        &config,
        cli.summarizer.as_deref(),
        cli.publisher.as_deref(),
        mode,
        target_size,
    )
    .await
}

/// Shared entry point for the flag-driven CLI and the interactive menu.
pub(crate) async fn run_mode(
    config: &AppConfig,
    summarizer_override: Option<&str>,
    publisher_override: Option<&str>,
    mode: ReconcileMode,
    target_size: Option<usize>,
) -> Result<()> {
    validate_tracker(config)?;
    let retry = RetryPolicy::from(config);

    let token = token_from_env(&config.tracker)?;
    let tracker = TrackerClient::new(&config.tracker, token, retry)?;

    let (summarizer, publisher) =
        build_bots(config, summarizer_override, publisher_override, retry)?;

    let db = db_path(config)?;
    let store = Store::open(&db).await?;

    info!(
        mode = mode.name(),
        target_size,
        db = %db.display(),
        "starting reconciliation run"
    );

    let reporter = CliProgress::new();
    let options = SyncOptions { mode, target_size };
    let outcome = run_sync(
        &options,
        &tracker,
        &summarizer,
        &publisher,
        &store,
        &reporter,
    )
    .await?;

    print_outcome(&options, &outcome);
    Ok(())
}

/// Resolve the summarizer and publisher bots from overrides + config.
fn build_bots(
    config: &AppConfig,
    summarizer_override: Option<&str>,
    publisher_override: Option<&str>,
    retry: RetryPolicy,
) -> Result<(AnyBot, AnyBot)> {
    let summarizer_name =
        summarizer_override.unwrap_or(config.defaults.summarizer.as_str());
    let publisher_name = publisher_override.unwrap_or(config.defaults.publisher.as_str());

    let summarizer = build_bot(
        find_bot(config, summarizer_name)?,
        &config.tracker.base_url,
        retry,
    )?;
    let publisher = build_bot(
        find_bot(config, publisher_name)?,
        &config.tracker.base_url,
        retry,
    )?;
    Ok((summarizer, publisher))
}

fn print_outcome(options: &SyncOptions, outcome: &SyncOutcome) {
    println!();
    println!("  Reconciliation complete ({})", options.mode.name());
    println!("  Candidates ranked: {}", outcome.total_candidates);
    println!("  Added:             {}", outcome.report.added);
    println!("  Refreshed:         {}", outcome.report.refreshed);
    println!("  Retired:           {}", outcome.report.retired);
    println!("  Unchanged:         {}", outcome.report.unchanged);
    println!("  Failed:            {}", outcome.report.failed_count());
    println!("  Time:              {:.1}s", outcome.elapsed.as_secs_f64());

    if !outcome.report.failures.is_empty() {
        println!();
        println!("  Failures:");
        for failure in &outcome.report.failures {
            println!(
                "    {} ({}): {}",
                failure.ticket_key,
                failure.action.as_str(),
                failure.reason
            );
        }
    }

    if !outcome.diagnostics.is_empty() {
        println!();
        println!("  Data-integrity diagnostics:");
        for diagnostic in &outcome.diagnostics {
            match diagnostic {
                ResolveDiagnostic::CycleDetected {
                    candidate,
                    participants,
                } => {
                    println!(
                        "    duplicate cycle under {candidate}: {}",
                        join_keys(participants)
                    );
                }
                ResolveDiagnostic::UnresolvedCluster { tickets } => {
                    println!(
                        "    tickets with no ultimate parent: {}",
                        join_keys(tickets)
                    );
                }
            }
        }
    }
    println!();
}

fn join_keys(keys: &[TicketKey]) -> String {
    keys.iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn ticket_expanded(&self, key: &str, current: usize) {
        self.spinner
            .set_message(format!("Expanding links [{current}] {key}"));
    }

    fn entry_processed(&self, action: &str, key: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("{action} [{current}/{total}] {key}"));
    }

    fn done(&self, _report: &ExecutionReport) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Status / bots / config commands
// ---------------------------------------------------------------------------

pub(crate) async fn cmd_status() -> Result<()> {
    let config = load_config()?;
    let db = db_path(&config)?;
    if !db.exists() {
        println!("No tracking database at {} — run `triagesync init` first.", db.display());
        return Ok(());
    }

    let store = Store::open_readonly(&db).await?;
    let published = store.published_count().await?;
    let records = store.list_records().await?;
    let failed = records.len() - published.min(records.len());

    println!();
    println!("  Published entries: {published}");
    if failed > 0 {
        println!("  Non-published rows: {failed}");
    }

    match store.last_run().await? {
        Some(run) => {
            println!("  Last run:          {} ({})", run.mode, run.started_at.to_rfc3339());
            match (&run.finished_at, &run.report) {
                (Some(_), Some(report)) => {
                    println!(
                        "  Last report:       {}",
                        serde_json::to_string(report).unwrap_or_else(|_| "<unreadable>".into())
                    );
                }
                _ => println!("  Last run did not record a report (interrupted?)"),
            }
        }
        None => println!("  No runs recorded yet."),
    }
    println!();
    Ok(())
}

pub(crate) fn cmd_bots() -> Result<()> {
    let config = load_config()?;
    if config.bots.is_empty() {
        println!("No bots configured. Add [[bots]] entries to your config file.");
        println!("Run `triagesync config init` to create one.");
        return Ok(());
    }

    println!();
    println!("  Configured bots:");
    for bot in &config.bots {
        let valid = match bot.validate() {
            Ok(()) => "ready",
            Err(_) => "incomplete",
        };
        println!("    {} ({}) — {} [{valid}]", bot.name, bot.kind.as_str(), bot.url);
    }
    println!();
    println!(
        "  Defaults: summarizer = {}, publisher = {}",
        config.defaults.summarizer, config.defaults.publisher
    );
    println!();
    Ok(())
}

pub(crate) fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

pub(crate) fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

/// Test the tracker connection (interactive menu helper).
pub(crate) async fn cmd_test_connection(config: &AppConfig) -> Result<()> {
    validate_tracker(config)?;
    let token = token_from_env(&config.tracker)?;
    let tracker = TrackerClient::new(&config.tracker, token, RetryPolicy::from(config))?;
    let user = tracker.test_connection().await?;
    println!("Connected to {} as {user}", config.tracker.base_url);
    Ok(())
}
