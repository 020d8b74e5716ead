//! Application configuration for LinkIntel.
//!
//! User config lives at `~/.linkintel/linkintel.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LinkIntelError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "linkintel.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".linkintel";

/// Default fetch cache database file name (inside the config dir).
const CACHE_DB_NAME: &str = "cache.db";

/// Smallest character budget accepted for summaries and reports.
const MIN_BUDGET_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Config structs (matching linkintel.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Managed column naming.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Input column selection.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// HTTP fetch behavior.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Deny/allow lists and robots handling.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Output size budgets.
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Run-level knobs.
    #[serde(default)]
    pub run: RunConfig,
}

/// `[schema]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Prefix carried by every managed column header.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Number of per-URL summary columns.
    #[serde(default = "default_link_slots")]
    pub link_slots: usize,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            link_slots: default_link_slots(),
        }
    }
}

fn default_namespace() -> String {
    "ENRICH_".into()
}
fn default_link_slots() -> usize {
    3
}

/// How URL-bearing input columns are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Header patterns plus URL-shaped cell sampling.
    #[default]
    Auto,
    /// Only the columns listed in `discovery.columns`.
    Explicit,
}

impl FromStr for DiscoveryMode {
    type Err = LinkIntelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "explicit" => Ok(Self::Explicit),
            other => Err(LinkIntelError::config(format!(
                "unknown discovery mode '{other}' (expected auto or explicit)"
            ))),
        }
    }
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Column selection mode.
    #[serde(default)]
    pub mode: DiscoveryMode,

    /// Column names used in explicit mode.
    #[serde(default)]
    pub columns: Vec<String>,

    /// Number of non-empty cells sampled per column in auto mode.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::Auto,
            columns: Vec::new(),
            sample_rows: default_sample_rows(),
        }
    }
}

fn default_sample_rows() -> usize {
    10
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Request budget per domain, in requests per second.
    #[serde(default = "default_rps")]
    pub per_domain_rps: f64,

    /// Hard wall-clock timeout per attempt, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first attempt on 429/5xx/timeout.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds; doubles on every retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound for a single backoff delay in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Response bodies beyond this size are truncated and marked partial.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Cache freshness window in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Serve fresh cached responses instead of fetching.
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            per_domain_rps: default_rps(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_body_bytes: default_max_body_bytes(),
            cache_ttl_secs: default_cache_ttl_secs(),
            use_cache: true,
        }
    }
}

fn default_rps() -> f64 {
    0.5
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    8_000
}
fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}
fn default_cache_ttl_secs() -> u64 {
    86_400
}
fn default_true() -> bool {
    true
}

/// `[policy]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Extra domains that are never fetched (on top of the built-in list).
    #[serde(default)]
    pub deny_domains: Vec<String>,

    /// Domains exempt from the deny-list. robots.txt still applies.
    #[serde(default)]
    pub allow_domains: Vec<String>,

    /// Whether to consult robots.txt before fetching.
    #[serde(default = "default_true")]
    pub respect_robots_txt: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            deny_domains: Vec::new(),
            allow_domains: Vec::new(),
            respect_robots_txt: true,
        }
    }
}

/// `[budget]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Character budget of one per-URL summary cell.
    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: usize,

    /// Character budget of the combined report cell.
    #[serde(default = "default_max_report_chars")]
    pub max_report_chars: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_summary_chars: default_max_summary_chars(),
            max_report_chars: default_max_report_chars(),
        }
    }
}

fn default_max_summary_chars() -> usize {
    4_000
}
fn default_max_report_chars() -> usize {
    5_000
}

/// `[run]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Rows processed concurrently. 1 means strictly sequential.
    #[serde(default = "default_row_concurrency")]
    pub row_concurrency: usize,

    /// Row batches buffered before a flush to the sheet.
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,

    /// Cache database path. Defaults to `~/.linkintel/cache.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            row_concurrency: default_row_concurrency(),
            write_batch_size: default_write_batch_size(),
            db_path: None,
        }
    }
}

fn default_row_concurrency() -> usize {
    1
}
fn default_write_batch_size() -> usize {
    10
}

// ---------------------------------------------------------------------------
// Row range selector
// ---------------------------------------------------------------------------

/// Inclusive range of sheet row numbers. The header is row 1, so data starts at row 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub start: usize,
    pub end: Option<usize>,
}

impl RowRange {
    /// Whether the data row at zero-based `index` falls inside the range.
    pub fn contains_data_index(&self, index: usize) -> bool {
        let sheet_row = index + 2;
        sheet_row >= self.start && self.end.is_none_or(|end| sheet_row <= end)
    }
}

impl FromStr for RowRange {
    type Err = LinkIntelError;

    /// Accepts `"5"`, `"2-40"` and `"10-"`.
    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| -> Result<usize> {
            part.trim()
                .parse::<usize>()
                .map_err(|_| LinkIntelError::validation(format!("invalid row number '{part}'")))
        };

        let range = match s.split_once('-') {
            Some((start, "")) => Self {
                start: parse(start)?,
                end: None,
            },
            Some((start, end)) => Self {
                start: parse(start)?,
                end: Some(parse(end)?),
            },
            None => {
                let row = parse(s)?;
                Self {
                    start: row,
                    end: Some(row),
                }
            }
        };

        if range.start < 2 {
            return Err(LinkIntelError::validation(
                "row ranges start at 2 (row 1 is the header)",
            ));
        }
        if range.end.is_some_and(|end| end < range.start) {
            return Err(LinkIntelError::validation(format!(
                "row range '{s}' ends before it starts"
            )));
        }
        Ok(range)
    }
}

// ---------------------------------------------------------------------------
// Enrich config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime enrichment configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct EnrichConfig {
    pub namespace: String,
    pub link_slots: usize,
    pub discovery_mode: DiscoveryMode,
    pub columns: Vec<String>,
    pub sample_rows: usize,
    pub per_domain_rps: f64,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_body_bytes: usize,
    pub cache_ttl: Duration,
    pub use_cache: bool,
    pub deny_domains: Vec<String>,
    pub allow_domains: Vec<String>,
    pub respect_robots_txt: bool,
    pub max_summary_chars: usize,
    pub max_report_chars: usize,
    pub row_concurrency: usize,
    pub write_batch_size: usize,
    /// Restrict processing to these sheet rows.
    pub rows: Option<RowRange>,
    /// Compute everything, write nothing.
    pub dry_run: bool,
    /// Skip rows whose status cell is already filled.
    pub only_unprocessed: bool,
    /// Keep only candidates on these domains.
    pub only_domains: Vec<String>,
    /// Stop starting new rows once this much time has elapsed.
    pub deadline: Option<Duration>,
}

impl From<&AppConfig> for EnrichConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            namespace: config.schema.namespace.clone(),
            link_slots: config.schema.link_slots,
            discovery_mode: config.discovery.mode,
            columns: config.discovery.columns.clone(),
            sample_rows: config.discovery.sample_rows,
            per_domain_rps: config.fetch.per_domain_rps,
            timeout: Duration::from_secs(config.fetch.timeout_secs),
            max_retries: config.fetch.max_retries,
            backoff_base: Duration::from_millis(config.fetch.backoff_base_ms),
            backoff_max: Duration::from_millis(config.fetch.backoff_max_ms),
            max_body_bytes: config.fetch.max_body_bytes,
            cache_ttl: Duration::from_secs(config.fetch.cache_ttl_secs),
            use_cache: config.fetch.use_cache,
            deny_domains: config.policy.deny_domains.clone(),
            allow_domains: config.policy.allow_domains.clone(),
            respect_robots_txt: config.policy.respect_robots_txt,
            max_summary_chars: config.budget.max_summary_chars,
            max_report_chars: config.budget.max_report_chars,
            row_concurrency: config.run.row_concurrency,
            write_batch_size: config.run.write_batch_size,
            rows: None,
            dry_run: false,
            only_unprocessed: false,
            only_domains: Vec::new(),
            deadline: None,
        }
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl EnrichConfig {
    /// Reject settings the pipeline cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(LinkIntelError::config("namespace must not be empty"));
        }
        let well_formed = self
            .namespace
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
            && self.namespace.ends_with('_');
        if !well_formed {
            return Err(LinkIntelError::config(format!(
                "namespace '{}' must be upper-case alphanumerics ending in '_'",
                self.namespace
            )));
        }
        if self.link_slots == 0 {
            return Err(LinkIntelError::config("link_slots must be at least 1"));
        }
        if !(self.per_domain_rps.is_finite() && self.per_domain_rps > 0.0) {
            return Err(LinkIntelError::config("per_domain_rps must be positive"));
        }
        if self.timeout.is_zero() {
            return Err(LinkIntelError::config("timeout must be non-zero"));
        }
        if self.max_summary_chars < MIN_BUDGET_CHARS || self.max_report_chars < MIN_BUDGET_CHARS {
            return Err(LinkIntelError::config(format!(
                "character budgets must be at least {MIN_BUDGET_CHARS}"
            )));
        }
        if self.discovery_mode == DiscoveryMode::Explicit && self.columns.is_empty() {
            return Err(LinkIntelError::config(
                "explicit discovery mode needs at least one column",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.linkintel/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LinkIntelError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.linkintel/linkintel.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the cache database path, honoring `run.db_path` when set.
pub fn default_db_path(config: &AppConfig) -> Result<PathBuf> {
    match &config.run.db_path {
        Some(path) => Ok(PathBuf::from(path)),
        None => Ok(config_dir()?.join(CACHE_DB_NAME)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LinkIntelError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LinkIntelError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LinkIntelError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LinkIntelError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LinkIntelError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("namespace = \"ENRICH_\""));
        assert!(toml_str.contains("per_domain_rps"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.schema.link_slots, 3);
        assert_eq!(parsed.fetch.max_retries, 2);
        assert!(parsed.policy.respect_robots_txt);
    }

    #[test]
    fn partial_config_uses_field_defaults() {
        let toml_str = r#"
[schema]
link_slots = 5

[discovery]
mode = "explicit"
columns = ["Website", "Socials"]

[policy]
deny_domains = ["facebook.com"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.schema.link_slots, 5);
        assert_eq!(config.schema.namespace, "ENRICH_");
        assert_eq!(config.discovery.mode, DiscoveryMode::Explicit);
        assert_eq!(config.fetch.timeout_secs, 20);
        assert_eq!(config.policy.deny_domains, vec!["facebook.com"]);
    }

    #[test]
    fn enrich_config_from_app_config() {
        let app = AppConfig::default();
        let enrich = EnrichConfig::from(&app);
        assert_eq!(enrich.link_slots, 3);
        assert_eq!(enrich.timeout, Duration::from_secs(20));
        assert_eq!(enrich.cache_ttl, Duration::from_secs(86_400));
        assert!(enrich.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let mut config = EnrichConfig::default();
        config.namespace = "enrich".into();
        assert!(config.validate().is_err());

        let mut config = EnrichConfig::default();
        config.per_domain_rps = 0.0;
        assert!(config.validate().is_err());

        let mut config = EnrichConfig::default();
        config.link_slots = 0;
        assert!(config.validate().is_err());

        let mut config = EnrichConfig::default();
        config.discovery_mode = DiscoveryMode::Explicit;
        assert!(config.validate().is_err());
    }

    #[test]
    fn row_range_parsing() {
        let range: RowRange = "2-40".parse().expect("range");
        assert_eq!(range, RowRange { start: 2, end: Some(40) });
        assert!(range.contains_data_index(0));
        assert!(range.contains_data_index(38));
        assert!(!range.contains_data_index(39));

        let open: RowRange = "10-".parse().expect("open range");
        assert!(!open.contains_data_index(7));
        assert!(open.contains_data_index(8));
        assert!(open.contains_data_index(10_000));

        let single: RowRange = "5".parse().expect("single row");
        assert!(single.contains_data_index(3));
        assert!(!single.contains_data_index(4));

        assert!("1-4".parse::<RowRange>().is_err());
        assert!("9-3".parse::<RowRange>().is_err());
        assert!("a-b".parse::<RowRange>().is_err());
    }
}
