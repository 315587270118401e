//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use dumpsift_core::{
    BalanceEnricher, IngestOutcome, IngestReport, IntakeLoop, IntakeProgress, IntakeStage,
};
use dumpsift_providers::ProviderSet;
use dumpsift_shared::{
    AppConfig, EnrichmentConfig, Heartbeat, IntakeConfig, Shutdown, config_file_path,
    expand_home, init_config, init_config_at, load_config, load_config_from, shutdown_channel,
};
use dumpsift_storage::{CommitOutcome, Storage};
use dumpsift_supervisor::{
    STATUS_FILE_NAME, Supervisor, SupervisorConfig, default_units, heartbeat_file,
    listen_signals, listen_stdin, read_status_file,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// dumpsift: stealer-log ingestion and wallet enrichment.
#[derive(Parser)]
#[command(
    name = "dumpsift",
    version,
    about = "Ingest stealer-log archives into a searchable store and value recovered wallets.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.dumpsift/dumpsift.toml).
    #[arg(long, global = true, env = "DUMPSIFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
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
    /// Run and supervise the intake, enrichment and API units.
    Supervise,

    /// Watch the intake directory and ingest archives as they arrive.
    Intake {
        /// Run as a supervised unit: stop on stdin shutdown, write a heartbeat file.
        #[arg(long)]
        supervised: bool,
    },

    /// Check wallet balances against the configured providers.
    Enrich {
        /// Run as a supervised unit: stop on stdin shutdown, write a heartbeat file.
        #[arg(long)]
        supervised: bool,

        /// Run a single cycle and exit.
        #[arg(long, conflicts_with = "supervised")]
        once: bool,
    },

    /// Ingest one archive now, leaving the file in place.
    Ingest {
        /// Archive to ingest (.zip, .tar, .tar.gz, .gz, .7z, .rar).
        archive: PathBuf,
    },

    /// Show supervised unit states and recent uploads.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show store-wide counters.
    Stats {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
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
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "dumpsift=info",
        1 => "dumpsift=debug",
        _ => "dumpsift=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // stdout belongs to command output; logs go to stderr.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Supervise => cmd_supervise(config_path).await,
        Command::Intake { supervised } => cmd_intake(config_path, supervised).await,
        Command::Enrich { supervised, once } => cmd_enrich(config_path, supervised, once).await,
        Command::Ingest { archive } => cmd_ingest(config_path, &archive).await,
        Command::Status { json } => cmd_status(config_path, json).await,
        Command::Stats { json } => cmd_stats(config_path, json).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path).await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let config = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

fn database_path(config: &AppConfig) -> PathBuf {
    expand_home(&config.storage.database_path)
}

fn state_dir(config: &AppConfig) -> Result<PathBuf> {
    let dir = expand_home(&config.storage.state_dir);
    std::fs::create_dir_all(&dir)
        .map_err(|e| eyre!("cannot create state directory {}: {e}", dir.display()))?;
    Ok(dir)
}

/// Shutdown signal and heartbeat for a long-running loop.
///
/// Every unit stops on SIGINT/SIGTERM. Supervised units also stop when the
/// supervisor writes a shutdown line (or closes stdin) and mirror their
/// heartbeat to a file the supervisor reads.
fn unit_lifecycle(
    config: &AppConfig,
    unit: &str,
    supervised: bool,
) -> Result<(Shutdown, Heartbeat)> {
    let (trigger, shutdown) = shutdown_channel();
    if supervised {
        listen_stdin(trigger.clone());
        listen_signals(trigger);
        let beat = heartbeat_file(&state_dir(config)?, unit);
        Ok((shutdown, Heartbeat::with_file(beat)))
    } else {
        listen_signals(trigger);
        Ok((shutdown, Heartbeat::new()))
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_supervise(config_path: Option<&Path>) -> Result<()> {
    let config = load(config_path)?;
    state_dir(&config)?;
    let sup_config = SupervisorConfig::from(&config);

    let exe = std::env::current_exe().map_err(|e| eyre!("cannot locate own executable: {e}"))?;
    let config_arg = match config_path {
        Some(p) => Some(std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())),
        None => None,
    };

    let mut supervisor = Supervisor::new(sup_config.clone());
    for (name, launcher) in default_units(&config, &sup_config, &exe, config_arg.as_deref()) {
        supervisor.add_unit(name, launcher);
    }
    if supervisor.unit_names().is_empty() {
        return Err(eyre!("no units enabled in [supervisor]"));
    }
    info!(units = ?supervisor.unit_names(), "starting supervisor");

    let (trigger, shutdown) = shutdown_channel();
    listen_signals(trigger);
    let (_handle, task) = supervisor.spawn(shutdown);
    task.await.map_err(|e| eyre!("supervisor task failed: {e}"))?;

    info!("supervisor stopped");
    Ok(())
}

async fn cmd_intake(config_path: Option<&Path>, supervised: bool) -> Result<()> {
    let config = load(config_path)?;
    let storage = Arc::new(Storage::open(&database_path(&config)).await?);
    let (shutdown, heartbeat) = unit_lifecycle(&config, "intake", supervised)?;

    let intake = IntakeLoop::new(IntakeConfig::from(&config), storage);
    intake.run(shutdown, heartbeat).await?;
    Ok(())
}

async fn cmd_enrich(config_path: Option<&Path>, supervised: bool, once: bool) -> Result<()> {
    let config = load(config_path)?;
    let enrich_config = EnrichmentConfig::from(&config);
    let providers = ProviderSet::from_config(&config.providers, enrich_config.request_timeout)?;
    let storage = Arc::new(Storage::open(&database_path(&config)).await?);
    let mut enricher = BalanceEnricher::new(enrich_config, storage, providers);

    if once {
        let (trigger, shutdown) = shutdown_channel();
        listen_signals(trigger);
        let report = enricher.run_cycle(&shutdown, &Heartbeat::new()).await?;
        println!();
        println!("  Selected:   {}", report.selected);
        println!("  Resolved:   {}", report.resolved);
        println!("  Funded:     {}", report.funded);
        println!("  Failed:     {}", report.failed);
        println!("  Cache hits: {}", report.cache_hits);
        if report.lost_races > 0 {
            println!("  Lost races: {}", report.lost_races);
        }
        println!();
        return Ok(());
    }

    let (shutdown, heartbeat) = unit_lifecycle(&config, "enrichment", supervised)?;
    enricher.run(shutdown, heartbeat).await?;
    Ok(())
}

async fn cmd_ingest(config_path: Option<&Path>, archive: &Path) -> Result<()> {
    let config = load(config_path)?;
    let storage = Arc::new(Storage::open(&database_path(&config)).await?);
    let intake = IntakeLoop::new(IntakeConfig::from(&config), storage);

    info!(archive = %archive.display(), "ingesting archive");
    let reporter = CliProgress::new();
    let report = intake.ingest(archive, &reporter).await?;

    println!();
    match &report.outcome {
        IngestOutcome::Completed => println!("  Archive ingested."),
        IngestOutcome::Rejected(reason) => println!("  Archive rejected: {reason}"),
        IngestOutcome::Failed { error, .. } => println!("  Ingest failed: {error}"),
        IngestOutcome::Interrupted => println!("  Ingest interrupted."),
    }
    println!("  Upload:      {}", report.upload_id);
    println!("  Devices:     {}", report.counts.devices);
    println!("  Skipped:     {}", report.counts.skipped_devices);
    println!("  Credentials: {}", report.counts.credentials);
    println!("  Wallets:     {}", report.counts.wallets);
    println!("  Cards:       {}", report.counts.cards);
    println!("  Time:        {:.1}s", report.elapsed.as_secs_f64());
    println!();

    match report.outcome {
        IngestOutcome::Completed => Ok(()),
        _ => Err(eyre!("archive was not ingested")),
    }
}

async fn cmd_status(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = load(config_path)?;
    let status_path = expand_home(&config.storage.state_dir).join(STATUS_FILE_NAME);
    let report = if status_path.exists() {
        Some(read_status_file(&status_path)?)
    } else {
        None
    };

    let db = database_path(&config);
    let uploads = if db.exists() {
        Storage::open_readonly(&db).await?.recent_uploads(10).await?
    } else {
        Vec::new()
    };

    if json {
        let value = serde_json::json!({
            "supervisor": report,
            "uploads": uploads,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!();
    match &report {
        Some(report) => {
            let age = chrono::Utc::now() - report.updated_at;
            let stale = age.num_seconds() > 3 * config.supervisor.health_check_interval_secs as i64;
            println!(
                "  Supervisor pid {} (updated {}s ago{})",
                report.supervisor_pid,
                age.num_seconds().max(0),
                if stale { ", stale" } else { "" }
            );
            println!();
            println!(
                "  {:<12} {:<20} {:>8} {:>9} {:>9}  LAST ERROR",
                "UNIT", "STATE", "PID", "RESTARTS", "UPTIME"
            );
            for unit in &report.units {
                println!(
                    "  {:<12} {:<20} {:>8} {:>9} {:>9}  {}",
                    unit.name,
                    unit.state.as_str(),
                    unit.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                    unit.restarts,
                    unit.uptime_secs
                        .map(|s| format!("{s}s"))
                        .unwrap_or_else(|| "-".into()),
                    unit.last_error.as_deref().unwrap_or("")
                );
            }
        }
        None => println!("  Supervisor not running (no {}).", status_path.display()),
    }

    println!();
    if uploads.is_empty() {
        println!("  No uploads yet.");
    } else {
        println!(
            "  {:<40} {:<11} {:>8} {:>8}  UPDATED",
            "ARCHIVE", "STATUS", "ATTEMPTS", "DEVICES"
        );
        for upload in &uploads {
            println!(
                "  {:<40} {:<11} {:>8} {:>8}  {}",
                upload.archive_name,
                upload.status,
                upload.attempts,
                upload.device_count,
                upload.updated_at
            );
            if let Some(error) = &upload.last_error {
                println!("    └ {error}");
            }
        }
    }
    println!();
    Ok(())
}

async fn cmd_stats(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = load(config_path)?;
    let db = database_path(&config);
    if !db.exists() {
        return Err(eyre!("no database at {}; nothing ingested yet", db.display()));
    }
    let stats = Storage::open_readonly(&db).await?.stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!();
    println!("  Uploads:              {}", stats.uploads);
    println!("  Devices:              {}", stats.devices);
    println!(
        "  Credentials:          {} ({} duplicates)",
        stats.credentials, stats.duplicate_credentials
    );
    println!("  Wallets:              {}", stats.wallets);
    println!("  Wallets checked:      {}", stats.wallets_checked);
    println!("  Wallets with balance: {}", stats.wallets_with_balance);
    println!("  Total balance (USD):  {:.2}", stats.total_balance_usd);
    println!("  Cards:                {}", stats.cards);
    println!("  Software entries:     {}", stats.software);
    println!();
    Ok(())
}

async fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(path) => {
            init_config_at(path)?;
            path.to_path_buf()
        }
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config: AppConfig = load(config_path)?;
    let source = match config_path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    let toml_str = toml::to_string_pretty(&config)?;
    println!("# {}", source.display());
    println!("{toml_str}");
    Ok(())
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
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl IntakeProgress for CliProgress {
    fn stage(&self, archive: &str, stage: IntakeStage) {
        let label = match stage {
            IntakeStage::Idle => return,
            IntakeStage::Extracting => "Extracting",
            IntakeStage::Classifying => "Classifying",
            IntakeStage::Parsing => "Parsing",
            IntakeStage::Persisting => "Persisting",
            IntakeStage::Cleanup => "Cleaning up",
        };
        self.spinner.set_message(format!("{label} {archive}"));
    }

    fn devices_found(&self, total: usize) {
        self.spinner.set_length(total as u64);
        self.spinner.set_position(0);
    }

    fn device_done(&self, name: &str, outcome: CommitOutcome) {
        self.spinner.inc(1);
        let verb = match outcome {
            CommitOutcome::Inserted => "Stored",
            CommitOutcome::Skipped => "Already stored",
        };
        self.spinner.set_message(format!(
            "{verb} [{}/{}] {name}",
            self.spinner.position(),
            self.spinner.length().unwrap_or(0)
        ));
    }

    fn done(&self, _report: &IngestReport) {
        self.spinner.finish_and_clear();
    }
}
