//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use linkintel_core::{ProgressReporter, RunContext, run_enrichment};
use linkintel_sheet::JsonSheet;
use linkintel_shared::{
    AppConfig, DiscoveryMode, EnrichConfig, RowRange, RunStatus, RunSummary, default_db_path,
    init_config, load_config, load_config_from,
};
use linkintel_storage::Storage;
use tokio::sync::watch;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// LinkIntel: idempotent lead enrichment for spreadsheet rows.
#[derive(Parser)]
#[command(
    name = "linkintel",
    version,
    about = "Enrich spreadsheet rows with summaries and lead scores from the links they contain.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.linkintel/linkintel.toml.
    #[arg(long, global = true, env = "LINKINTEL_CONFIG")]
    pub config: Option<PathBuf>,

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
    /// Enrich the rows of a JSON sheet in place.
    Run(RunArgs),

    /// Fetch cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// List recent runs.
    Runs {
        /// Number of runs to show.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags for `run`. Each one overrides the config file.
#[derive(Args)]
pub(crate) struct RunArgs {
    /// Sheet file: `{ "header": [...], "rows": [[...], ...] }`.
    sheet: PathBuf,

    /// Sheet rows to process, e.g. `2-40`, `10-` or `7` (row 1 is the header).
    #[arg(long)]
    rows: Option<RowRange>,

    /// Number of per-link summary columns.
    #[arg(long)]
    slots: Option<usize>,

    /// Prefix for managed columns.
    #[arg(long)]
    namespace: Option<String>,

    /// Comma-separated input columns to scan for URLs (disables auto-detection).
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,

    /// Compute everything but write nothing.
    #[arg(long)]
    dry_run: bool,

    /// Skip rows that already have a combined report.
    #[arg(long)]
    only_unprocessed: bool,

    /// Ignore cached responses (fresh results are still cached).
    #[arg(long)]
    no_cache: bool,

    /// Keep only links on this domain (repeatable).
    #[arg(long = "only-domain")]
    only_domains: Vec<String>,

    /// Requests per second per domain.
    #[arg(long)]
    rps: Option<f64>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Rows processed at the same time.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Stop starting new rows after this many seconds.
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Delete every cached response.
    Clear,
    /// Delete cached responses older than the configured TTL.
    Prune,
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
        0 => "linkintel=info",
        1 => "linkintel=debug",
        _ => "linkintel=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Run(args) => cmd_run(&config, args).await,
        Command::Cache { action } => match action {
            CacheAction::Clear => cmd_cache_clear(&config).await,
            CacheAction::Prune => cmd_cache_prune(&config).await,
        },
        Command::Runs { limit } => cmd_runs(&config, limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

fn enrich_config(config: &AppConfig, args: &RunArgs) -> EnrichConfig {
    let mut enrich = EnrichConfig::from(config);
    if let Some(slots) = args.slots {
        enrich.link_slots = slots;
    }
    if let Some(namespace) = &args.namespace {
        enrich.namespace = namespace.clone();
    }
    if !args.columns.is_empty() {
        enrich.discovery_mode = DiscoveryMode::Explicit;
        enrich.columns = args.columns.clone();
    }
    if let Some(rps) = args.rps {
        enrich.per_domain_rps = rps;
    }
    if let Some(timeout) = args.timeout {
        enrich.timeout = Duration::from_secs(timeout);
    }
    if let Some(concurrency) = args.concurrency {
        enrich.row_concurrency = concurrency;
    }
    enrich.rows = args.rows;
    enrich.dry_run = args.dry_run;
    enrich.only_unprocessed = args.only_unprocessed;
    enrich.only_domains = args.only_domains.clone();
    enrich.deadline = args.deadline_secs.map(Duration::from_secs);
    if args.no_cache {
        enrich.use_cache = false;
    }
    enrich
}

async fn cmd_run(config: &AppConfig, args: RunArgs) -> Result<()> {
    let enrich = enrich_config(config, &args);
    enrich.validate()?;

    let sheet = Arc::new(JsonSheet::open(&args.sheet).await?);
    let storage = open_storage(config).await;
    let ctx = Arc::new(RunContext::new(&enrich, storage.clone())?);

    let run_id = match (&storage, enrich.dry_run) {
        (Some(storage), false) => match storage.insert_run(&args.sheet.display().to_string()).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "could not record run");
                None
            }
        },
        _ => None,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing rows in flight");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(sheet = %args.sheet.display(), dry_run = enrich.dry_run, "starting run");
    let reporter = CliProgress::new();
    let report = run_enrichment(sheet, ctx, &enrich, &reporter, shutdown_rx).await?;

    if let (Some(storage), Some(id)) = (&storage, &run_id) {
        let stats = serde_json::to_string(&report.summary)?;
        if let Err(e) = storage.finish_run(id, &stats).await {
            warn!(error = %e, "could not record run result");
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.summary)?);
    } else {
        print_summary(&report.summary, enrich.dry_run, report.planned.len());
    }
    Ok(())
}

/// Open the cache database. A broken cache only costs speed, so failures
/// are logged and the run continues without one.
async fn open_storage(config: &AppConfig) -> Option<Arc<Storage>> {
    let path = match default_db_path(config) {
        Ok(path) => path,
        Err(e) => {
            warn!(error = %e, "no cache location, running without cache");
            return None;
        }
    };
    match Storage::open(&path).await {
        Ok(storage) => Some(Arc::new(storage)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache unavailable, running without cache");
            None
        }
    }
}

async fn require_storage(config: &AppConfig) -> Result<Storage> {
    let path = default_db_path(config)?;
    Ok(Storage::open(&path).await?)
}

fn print_summary(summary: &RunSummary, dry_run: bool, planned: usize) {
    println!();
    if dry_run {
        println!("  Dry run: {planned} row(s) would be written");
    } else {
        println!("  Run complete");
    }
    println!("  OK:           {}", summary.ok);
    println!("  Skipped TOS:  {}", summary.skipped_tos);
    println!("  No links:     {}", summary.no_links);
    println!("  Errors:       {}", summary.errors);
    println!("  Written:      {}", summary.written);
    println!("  Unchanged:    {}", summary.unchanged);
    if summary.skipped_existing > 0 {
        println!("  Already done: {}", summary.skipped_existing);
    }
    if summary.positional_keys > 0 {
        println!(
            "  Positional:   {} (rows without email, profile or name; moving them breaks matching)",
            summary.positional_keys
        );
    }
    if summary.cancelled > 0 {
        println!("  Cancelled:    {}", summary.cancelled);
    }
    println!();
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
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn row_started(&self, sheet_row: usize, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Enriching [{current}/{total}] row {sheet_row}"));
    }

    fn row_finished(&self, sheet_row: usize, status: RunStatus) {
        if status == RunStatus::Error {
            self.spinner.println(format!("  row {sheet_row}: {status}"));
        }
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// cache / runs / config
// ---------------------------------------------------------------------------

async fn cmd_cache_clear(config: &AppConfig) -> Result<()> {
    let storage = require_storage(config).await?;
    let removed = storage.clear_fetch_cache().await?;
    println!("Removed {removed} cached response(s)");
    Ok(())
}

async fn cmd_cache_prune(config: &AppConfig) -> Result<()> {
    let storage = require_storage(config).await?;
    let ttl = Duration::from_secs(config.fetch.cache_ttl_secs);
    let removed = storage.prune_fetch_cache(ttl).await?;
    println!("Pruned {removed} expired response(s)");
    Ok(())
}

async fn cmd_runs(config: &AppConfig, limit: usize) -> Result<()> {
    let storage = require_storage(config).await?;
    let runs = storage.list_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded yet");
        return Ok(());
    }

    for run in runs {
        let outcome = match run.stats_json.as_deref() {
            Some(json) => match serde_json::from_str::<RunSummary>(json) {
                Ok(s) => format!(
                    "ok={} skipped={} no_links={} errors={} written={}",
                    s.ok, s.skipped_tos, s.no_links, s.errors, s.written
                ),
                Err(_) => json.to_string(),
            },
            None => "unfinished".to_string(),
        };
        println!("{}  {}  {}  {outcome}", run.started_at, run.id, run.sheet);
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config).map_err(|e| eyre!("cannot render config: {e}"))?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(args).expect("parse");
        match cli.command {
            Command::Run(args) => args,
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_flags_override_config() {
        let args = parse(&[
            "linkintel",
            "run",
            "leads.json",
            "--rows",
            "2-40",
            "--slots",
            "5",
            "--columns",
            "Website,Socials",
            "--only-domain",
            "github.com",
            "--only-domain",
            "acme.io",
            "--no-cache",
            "--deadline-secs",
            "60",
        ]);
        let enrich = enrich_config(&AppConfig::default(), &args);

        assert_eq!(enrich.link_slots, 5);
        assert_eq!(enrich.discovery_mode, DiscoveryMode::Explicit);
        assert_eq!(enrich.columns, vec!["Website", "Socials"]);
        assert_eq!(enrich.only_domains, vec!["github.com", "acme.io"]);
        assert_eq!(enrich.rows, Some(RowRange { start: 2, end: Some(40) }));
        assert!(!enrich.use_cache);
        assert_eq!(enrich.deadline, Some(Duration::from_secs(60)));
        assert!(enrich.validate().is_ok());
    }

    #[test]
    fn defaults_come_from_config() {
        let args = parse(&["linkintel", "run", "leads.json"]);
        let enrich = enrich_config(&AppConfig::default(), &args);
        assert_eq!(enrich.link_slots, 3);
        assert_eq!(enrich.discovery_mode, DiscoveryMode::Auto);
        assert!(enrich.use_cache);
        assert!(enrich.rows.is_none());
    }

    #[test]
    fn bad_row_range_is_rejected() {
        assert!(Cli::try_parse_from(["linkintel", "run", "leads.json", "--rows", "1-3"]).is_err());
    }
}
