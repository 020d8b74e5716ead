//! URL discovery: find URL-bearing columns and extract candidates from a row.
//!
//! Columns are either named explicitly or auto-detected from header patterns
//! and URL-shaped cell samples. Cells are split on common separators, each
//! token is normalized, and candidates are deduplicated by `(host, path)`
//! keeping the first-seen raw form.

mod normalize;

use std::collections::HashSet;
use std::sync::LazyLock;

use linkintel_shared::{DiscoveryMode, EnrichConfig, UrlCandidate, is_managed_column};
use regex::Regex;
use tracing::{debug, info};

pub use normalize::{dedup_key, normalize_url};

/// Header substrings that mark a column as URL-bearing in auto mode.
const HEADER_PATTERNS: &[&str] = &[
    "link",
    "url",
    "website",
    "site",
    "social",
    "profile",
    "portfolio",
    "company",
    "twitter",
    "x.com",
    "youtube",
    "github",
    "linkedin",
];

/// Cell separators for multi-URL cells (whitespace is handled separately).
const SEPARATORS: &[char] = &[',', '|', ';'];

/// A cell value that is unmistakably a URL (used when sampling columns).
static URL_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(https?://[^\s,|;]+|www\.[a-z0-9-]+\.[a-z]{2,}\S*)")
        .expect("URL_SHAPE is a valid pattern")
});

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Column selection settings, usually derived from [`EnrichConfig`].
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub mode: DiscoveryMode,
    /// Column names used in explicit mode (case-insensitive).
    pub columns: Vec<String>,
    /// Non-empty cells sampled per column in auto mode.
    pub sample_rows: usize,
    /// Managed-column prefix; such columns are never inputs.
    pub namespace: String,
}

impl From<&EnrichConfig> for DiscoveryOptions {
    fn from(config: &EnrichConfig) -> Self {
        Self {
            mode: config.discovery_mode,
            columns: config.columns.clone(),
            sample_rows: config.sample_rows,
            namespace: config.namespace.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Column selection
// ---------------------------------------------------------------------------

/// Pick the input columns to scan for URLs, as indexes into `header`.
pub fn select_columns(
    header: &[String],
    rows: &[Vec<String>],
    opts: &DiscoveryOptions,
) -> Vec<usize> {
    let is_managed = |name: &str| is_managed_column(name, &opts.namespace);

    let selected: Vec<usize> = match opts.mode {
        DiscoveryMode::Explicit => {
            let wanted: Vec<String> = opts
                .columns
                .iter()
                .map(|c| c.trim().to_ascii_lowercase())
                .collect();
            header
                .iter()
                .enumerate()
                .filter(|(_, name)| !is_managed(name))
                .filter(|(_, name)| wanted.contains(&name.trim().to_ascii_lowercase()))
                .map(|(i, _)| i)
                .collect()
        }
        DiscoveryMode::Auto => header
            .iter()
            .enumerate()
            .filter(|(_, name)| !is_managed(name))
            .filter(|(i, name)| {
                header_matches(name) || samples_look_like_urls(rows, *i, opts.sample_rows)
            })
            .map(|(i, _)| i)
            .collect(),
    };

    info!(
        mode = ?opts.mode,
        columns = ?selected.iter().map(|&i| header[i].as_str()).collect::<Vec<_>>(),
        "selected URL columns"
    );
    selected
}

fn header_matches(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HEADER_PATTERNS.iter().any(|p| lower.contains(p))
}

fn samples_look_like_urls(rows: &[Vec<String>], column: usize, sample_rows: usize) -> bool {
    rows.iter()
        .filter_map(|row| row.get(column))
        .filter(|cell| !cell.trim().is_empty())
        .take(sample_rows)
        .any(|cell| URL_SHAPE.is_match(cell))
}

// ---------------------------------------------------------------------------
// Row extraction
// ---------------------------------------------------------------------------

/// Split a cell on commas, pipes, semicolons, whitespace and newlines.
pub fn split_cell(cell: &str) -> impl Iterator<Item = &str> {
    cell.split(|c: char| c.is_whitespace() || SEPARATORS.contains(&c))
        .filter(|t| !t.is_empty())
}

/// Extract normalized, deduplicated URL candidates from one row.
///
/// Order follows the selected columns, then token position within each cell.
pub fn discover_row(header: &[String], row: &[String], columns: &[usize]) -> Vec<UrlCandidate> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut candidates = Vec::new();

    for &column in columns {
        let Some(cell) = row.get(column) else {
            continue;
        };
        for token in split_cell(cell) {
            let Some(url) = normalize_url(token) else {
                continue;
            };
            if !seen.insert(dedup_key(&url)) {
                debug!(raw = token, "duplicate candidate collapsed");
                continue;
            }
            candidates.push(UrlCandidate {
                url,
                raw: token.to_string(),
                column: header.get(column).cloned().unwrap_or_default(),
            });
        }
    }

    candidates
}

/// Keep only candidates whose host contains one of `domains`.
/// An empty filter keeps everything.
pub fn retain_domains(candidates: &mut Vec<UrlCandidate>, domains: &[String]) {
    if domains.is_empty() {
        return;
    }
    let domains: Vec<String> = domains.iter().map(|d| d.to_ascii_lowercase()).collect();
    candidates.retain(|c| domains.iter().any(|d| c.host().contains(d.as_str())));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn auto_opts() -> DiscoveryOptions {
        DiscoveryOptions {
            mode: DiscoveryMode::Auto,
            columns: Vec::new(),
            sample_rows: 10,
            namespace: "ENRICH_".into(),
        }
    }

    #[test]
    fn dedup_collapses_query_variants() {
        let header = strings(&["Links"]);
        let row = strings(&["http://a.com/x, http://a.com/x?utm=1 http://b.com/y"]);
        let found = discover_row(&header, &row, &[0]);

        let keys: Vec<String> = found
            .iter()
            .map(|c| format!("{}{}", c.host(), c.url.path()))
            .collect();
        assert_eq!(keys, vec!["a.com/x", "b.com/y"]);
        assert_eq!(found[0].raw, "http://a.com/x");
        assert_eq!(found[0].column, "Links");
    }

    #[test]
    fn splits_on_all_separators() {
        let tokens: Vec<&str> = split_cell("a.com|b.com;c.com\nd.com  e.com,f.com").collect();
        assert_eq!(tokens, vec!["a.com", "b.com", "c.com", "d.com", "e.com", "f.com"]);
    }

    #[test]
    fn auto_mode_uses_headers_and_samples() {
        let header = strings(&["Name", "Website", "Notes", "Email", "ENRICH_LINK_1_SUMMARY"]);
        let rows = vec![
            strings(&["Jane", "acme.io", "", "jane@acme.io", "URL: https://acme.io/"]),
            strings(&["Bo", "", "see https://bo.dev", "bo@bo.dev", ""]),
        ];
        let cols = select_columns(&header, &rows, &auto_opts());
        assert_eq!(cols, vec![1, 2]);
    }

    #[test]
    fn explicit_mode_is_case_insensitive() {
        let header = strings(&["Name", "Socials", "Website"]);
        let opts = DiscoveryOptions {
            mode: DiscoveryMode::Explicit,
            columns: vec!["socials".into()],
            ..auto_opts()
        };
        assert_eq!(select_columns(&header, &[], &opts), vec![1]);
    }

    #[test]
    fn order_is_preserved_across_columns() {
        let header = strings(&["Website", "Social"]);
        let row = strings(&["https://acme.io", "https://github.com/acme https://acme.io/"]);
        let found = discover_row(&header, &row, &[0, 1]);
        let urls: Vec<String> = found.iter().map(|c| c.url.to_string()).collect();
        assert_eq!(urls, vec!["https://acme.io/", "https://github.com/acme"]);
    }

    #[test]
    fn row_without_urls_yields_nothing() {
        let header = strings(&["Company"]);
        let row = strings(&["Acme Inc, est. 1999"]);
        assert!(discover_row(&header, &row, &[0]).is_empty());
    }

    #[test]
    fn retain_domains_filters_hosts() {
        let header = strings(&["Links"]);
        let row = strings(&["https://twitter.com/acme https://acme.io"]);
        let mut found = discover_row(&header, &row, &[0]);
        retain_domains(&mut found, &["twitter.com".to_string()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].host(), "twitter.com");
    }
}
