//! Core domain types shared by discovery, fetching, scoring and writing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

// ---------------------------------------------------------------------------
// RowKey
// ---------------------------------------------------------------------------

/// Which field a [`RowKey`] was derived from, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Profile,
    Email,
    Name,
    /// Positional fallback. Not stable if rows move between runs.
    Position,
}

/// Stable identity of a row across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub value: String,
    pub source: KeySource,
}

impl RowKey {
    pub fn new(source: KeySource, value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            source,
        }
    }

    /// Whether this key came from the positional fallback.
    pub fn is_positional(&self) -> bool {
        self.source == KeySource::Position
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

// ---------------------------------------------------------------------------
// Managed columns
// ---------------------------------------------------------------------------

/// Whether header `name` belongs to the managed block of `namespace`.
///
/// Matching ignores surrounding whitespace and ASCII case, so `enrich_status`
/// is managed under the `ENRICH_` namespace everywhere it is checked.
pub fn is_managed_column(name: &str, namespace: &str) -> bool {
    let name = name.trim();
    !namespace.is_empty()
        && name.len() >= namespace.len()
        && name.is_char_boundary(namespace.len())
        && name[..namespace.len()].eq_ignore_ascii_case(namespace)
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Outcome recorded in the status column, once per row per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Ok,
    /// Every candidate URL was excluded by policy.
    SkippedTos,
    NoLinks,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::SkippedTos => "SKIPPED_TOS",
            Self::NoLinks => "NO_LINKS",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ok: usize,
    pub skipped_tos: usize,
    pub no_links: usize,
    pub errors: usize,
    /// Rows whose managed cells already matched and were left alone.
    pub unchanged: usize,
    /// Rows handed to the sheet transport.
    pub written: usize,
    /// Rows skipped by `only_unprocessed`.
    pub skipped_existing: usize,
    /// Rows identified only by position.
    pub positional_keys: usize,
    /// Rows never started because the run was cancelled.
    pub cancelled: usize,
}

impl RunSummary {
    pub fn record(&mut self, status: RunStatus) {
        match status {
            RunStatus::Ok => self.ok += 1,
            RunStatus::SkippedTos => self.skipped_tos += 1,
            RunStatus::NoLinks => self.no_links += 1,
            RunStatus::Error => self.errors += 1,
        }
    }

    /// Rows that reached a final status.
    pub fn processed(&self) -> usize {
        self.ok + self.skipped_tos + self.no_links + self.errors
    }
}

// ---------------------------------------------------------------------------
// UrlCandidate
// ---------------------------------------------------------------------------

/// A normalized URL found in a row, with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlCandidate {
    pub url: Url,
    /// The token as it appeared in the cell.
    pub raw: String,
    /// Header of the originating column.
    pub column: String,
}

impl UrlCandidate {
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// FetchResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Success,
    /// Body exceeded the size cap and was truncated.
    Partial,
    Empty,
    PolicySkip,
    Error,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Empty => "empty",
            Self::PolicySkip => "policy_skip",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "empty" => Some(Self::Empty),
            "policy_skip" => Some(Self::PolicySkip),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether the result carries content worth classifying.
    pub fn has_content(&self) -> bool {
        matches!(self, Self::Success | Self::Partial)
    }
}

/// Outcome of fetching one URL (after cache lookup and retries).
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: Url,
    pub status: FetchStatus,
    pub content: Option<String>,
    pub http_status: Option<u16>,
    pub fetched_at: DateTime<Utc>,
    /// Host that served the response.
    pub domain: String,
    pub from_cache: bool,
    /// Network attempts made (0 for cache hits).
    pub attempts: u32,
    /// Short reason when `status` is `Error` or `PolicySkip`.
    pub error: Option<String>,
}

impl FetchResult {
    /// An error result that never touched the network.
    pub fn failed(url: &Url, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            url: url.clone(),
            status: FetchStatus::Error,
            content: None,
            http_status: None,
            fetched_at: Utc::now(),
            domain: url.host_str().unwrap_or_default().to_string(),
            from_cache: false,
            attempts,
            error: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// LinkSummary
// ---------------------------------------------------------------------------

/// Content platform a URL was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    GenericPage,
    CodeHost,
    VideoPlatform,
    Microblog,
    NewsArticle,
}

impl Platform {
    /// Label used in summary cells.
    pub fn label(&self) -> &'static str {
        match self {
            Self::GenericPage => "Website",
            Self::CodeHost => "Code Host",
            Self::VideoPlatform => "Video",
            Self::Microblog => "Microblog",
            Self::NewsArticle => "News",
        }
    }
}

/// Numeric signals pulled out of a page for scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMetrics {
    pub followers: Option<u64>,
    pub stars: Option<u64>,
    /// Most recent year mentioned as a publish/update date.
    pub latest_year: Option<i32>,
}

/// Short structured summary of one fetched URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSummary {
    pub platform: Platform,
    pub domain: String,
    pub url: String,
    pub key_points: Vec<String>,
    pub signals: Vec<String>,
    pub last_checked: DateTime<Utc>,
    #[serde(default)]
    pub metrics: SignalMetrics,
}

// ---------------------------------------------------------------------------
// Score
// ---------------------------------------------------------------------------

/// Weighted lead score with the notes that explain it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub value: u8,
    pub rationale: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_strings() {
        assert_eq!(RunStatus::SkippedTos.to_string(), "SKIPPED_TOS");
        assert_eq!(RunStatus::NoLinks.as_str(), "NO_LINKS");
        let json = serde_json::to_string(&RunStatus::Ok).expect("serialize");
        assert_eq!(json, "\"OK\"");
    }

    #[test]
    fn fetch_status_parse_matches_as_str() {
        for status in [
            FetchStatus::Success,
            FetchStatus::Partial,
            FetchStatus::Empty,
            FetchStatus::PolicySkip,
            FetchStatus::Error,
        ] {
            assert_eq!(FetchStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(FetchStatus::parse("bogus"), None);
    }

    #[test]
    fn run_summary_counts() {
        let mut summary = RunSummary::default();
        summary.record(RunStatus::Ok);
        summary.record(RunStatus::Ok);
        summary.record(RunStatus::NoLinks);
        summary.record(RunStatus::Error);
        assert_eq!(summary.ok, 2);
        assert_eq!(summary.processed(), 4);
    }

    #[test]
    fn managed_column_match_ignores_case_and_padding() {
        assert!(is_managed_column("ENRICH_STATUS", "ENRICH_"));
        assert!(is_managed_column(" enrich_status ", "ENRICH_"));
        assert!(!is_managed_column("ENRICHMENT", "ENRICH_"));
        assert!(!is_managed_column("status", "ENRICH_"));
        assert!(!is_managed_column("é", "ENRICH_"));
    }
}
