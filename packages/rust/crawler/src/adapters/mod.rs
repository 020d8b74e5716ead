//! Classifiers: turn a fetched page into a per-URL [`LinkSummary`].
//!
//! Each supported platform has a [`PlatformClassifier`]. The
//! [`ClassifierRegistry`] picks one by URL pattern (specific platforms first,
//! the generic page classifier last) and implements the run-facing
//! [`Classifier`] trait.

mod codehost;
mod generic;
mod microblog;
mod news;
mod page;
mod video;

use linkintel_shared::{FetchResult, LinkIntelError, LinkSummary, Platform, Result, SignalMetrics};
use tracing::debug;
use url::Url;

pub use codehost::CodeHostClassifier;
pub use generic::GenericClassifier;
pub use microblog::MicroblogClassifier;
pub use news::NewsClassifier;
pub use page::{PageFacts, format_count, parse_count, truncate_text};
pub use video::VideoClassifier;

/// Key points kept per summary.
pub const MAX_KEY_POINTS: usize = 6;
/// Outreach signals kept per summary.
pub const MAX_SIGNALS: usize = 4;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// What a platform classifier found on one page.
#[derive(Debug, Clone, Default)]
pub struct Digest {
    pub key_points: Vec<String>,
    pub signals: Vec<String>,
    pub metrics: SignalMetrics,
}

/// Platform-specific summarizer.
///
/// Classifiers are tried in priority order; `GenericClassifier` is the always-last fallback.
pub trait PlatformClassifier: Send + Sync {
    fn platform(&self) -> Platform;

    /// Whether this classifier should handle the URL.
    fn matches(&self, url: &Url) -> bool;

    /// Build key points, signals and metrics from the page facts.
    fn summarize(&self, url: &Url, facts: &PageFacts) -> Digest;

    /// Human-readable classifier name for tracing.
    fn name(&self) -> &str;
}

/// Classify-and-summarize collaborator used by the enrichment pipeline.
pub trait Classifier: Send + Sync {
    fn classify(&self, url: &Url, fetched: &FetchResult) -> Result<LinkSummary>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered classifiers in priority order.
pub struct ClassifierRegistry {
    classifiers: Vec<Box<dyn PlatformClassifier>>,
}

impl ClassifierRegistry {
    /// Create a registry with all built-in classifiers (platform-specific first, generic last).
    pub fn new() -> Self {
        Self {
            classifiers: vec![
                Box::new(CodeHostClassifier),
                Box::new(VideoClassifier),
                Box::new(MicroblogClassifier),
                Box::new(NewsClassifier),
                Box::new(GenericClassifier),
            ],
        }
    }

    /// Select the classifier for `url`. Always returns one (generic is the fallback).
    pub fn select(&self, url: &Url) -> &dyn PlatformClassifier {
        self.classifiers
            .iter()
            .find(|c| c.matches(url))
            .map(|c| c.as_ref())
            .unwrap_or(&GenericClassifier)
    }
}

impl Default for ClassifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for ClassifierRegistry {
    fn classify(&self, url: &Url, fetched: &FetchResult) -> Result<LinkSummary> {
        let content = fetched
            .content
            .as_deref()
            .filter(|_| fetched.status.has_content())
            .ok_or_else(|| LinkIntelError::Classification(format!("no content for {url}")))?;

        let classifier = self.select(url);
        debug!(classifier = classifier.name(), %url, "classifying");

        let facts = PageFacts::parse(content);
        let mut digest = classifier.summarize(url, &facts);
        if digest.key_points.is_empty() && digest.signals.is_empty() {
            return Err(LinkIntelError::Classification(format!(
                "nothing extractable from {url}"
            )));
        }

        digest.key_points.truncate(MAX_KEY_POINTS);
        dedup_in_order(&mut digest.signals);
        digest.signals.truncate(MAX_SIGNALS);
        if digest.metrics.latest_year.is_none() {
            digest.metrics.latest_year = facts.latest_year();
        }

        let domain = if fetched.domain.is_empty() {
            url.host_str().unwrap_or_default().to_string()
        } else {
            fetched.domain.clone()
        };

        Ok(LinkSummary {
            platform: classifier.platform(),
            domain: domain.trim_start_matches("www.").to_string(),
            url: url.to_string(),
            key_points: digest.key_points,
            signals: digest.signals,
            last_checked: fetched.fetched_at,
            metrics: digest.metrics,
        })
    }
}

fn dedup_in_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|s| seen.insert(s.clone()));
}

/// Host without a leading `www.`, lowercased.
pub(crate) fn bare_host(url: &Url) -> String {
    url.host_str()
        .unwrap_or_default()
        .trim_start_matches("www.")
        .to_ascii_lowercase()
}

/// Non-empty path segments of `url`.
pub(crate) fn path_segments(url: &Url) -> Vec<&str> {
    url.path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}
