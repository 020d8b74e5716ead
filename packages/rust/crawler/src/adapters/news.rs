//! News and article classifier.
//!
//! Matches known publications by domain, or any site whose path looks like an
//! article (`/news/`, `/blog/`, `/press/` ...).

use linkintel_shared::Platform;
use url::Url;

use super::{Digest, PageFacts, PlatformClassifier, bare_host, path_segments, truncate_text};

const NEWS_DOMAINS: &[&str] = &[
    "techcrunch.com",
    "venturebeat.com",
    "techradar.com",
    "engadget.com",
    "theverge.com",
    "wired.com",
    "arstechnica.com",
    "reuters.com",
    "bloomberg.com",
    "wsj.com",
    "nytimes.com",
    "washingtonpost.com",
    "forbes.com",
    "businessinsider.com",
    "cnbc.com",
    "cnn.com",
    "bbc.com",
    "bbc.co.uk",
    "theguardian.com",
];

const PATH_KEYWORDS: &[&str] = &[
    "news",
    "article",
    "articles",
    "story",
    "blog",
    "post",
    "posts",
    "press",
    "press-release",
    "announcement",
    "update",
    "release",
];

const BUSINESS_EVENTS: &[&str] = &[
    "funding",
    "acquisition",
    "ipo",
    "partnership",
    "launch",
    "expansion",
    "hiring",
];

pub struct NewsClassifier;

impl NewsClassifier {
    fn is_publication(url: &Url) -> bool {
        let host = bare_host(url);
        NEWS_DOMAINS
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    }
}

impl PlatformClassifier for NewsClassifier {
    fn platform(&self) -> Platform {
        Platform::NewsArticle
    }

    fn matches(&self, url: &Url) -> bool {
        Self::is_publication(url)
            || path_segments(url)
                .iter()
                .any(|s| PATH_KEYWORDS.contains(&s.to_ascii_lowercase().as_str()))
    }

    fn summarize(&self, url: &Url, facts: &PageFacts) -> Digest {
        let mut key_points = Vec::new();
        let mut signals = Vec::new();

        if let Some(title) = facts.display_title() {
            key_points.push(format!("Title: {}", truncate_text(title, 100)));
        }
        if let Some(published) = &facts.published {
            // Keep the date part of ISO timestamps.
            let date = published.split('T').next().unwrap_or(published);
            key_points.push(format!("Published: {date}"));
        }
        if let Some(author) = &facts.author {
            key_points.push(format!("Author: {}", truncate_text(author, 60)));
        }
        if let Some(summary) = &facts.description {
            key_points.push(format!("Summary: {}", truncate_text(summary, 150)));
        }

        let events: Vec<&str> = BUSINESS_EVENTS
            .iter()
            .copied()
            .filter(|e| facts.mentions(e))
            .take(3)
            .collect();
        if !events.is_empty() {
            signals.push(format!("Business news: {}", events.join(", ")));
        }
        if Self::is_publication(url) {
            signals.push("Business/tech publication".to_string());
        }

        Digest {
            key_points,
            signals,
            ..Digest::default()
        }
    }

    fn name(&self) -> &str {
        "news"
    }
}
