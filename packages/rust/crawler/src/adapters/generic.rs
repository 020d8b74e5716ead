//! Generic (fallback) classifier for company and personal websites.
//!
//! Always matches. Key points come from the title, meta description and top
//! headings; signals come from keyword scans of the visible text.

use linkintel_shared::Platform;
use url::Url;

use super::{Digest, PageFacts, PlatformClassifier, truncate_text};

const PRICING_KEYWORDS: &[&str] = &[
    "pricing",
    "plans",
    "subscribe",
    "contact sales",
    "get started",
    "free trial",
    "demo",
    "quote",
    "buy now",
    "purchase",
];

pub(crate) const HIRING_KEYWORDS: &[&str] = &[
    "we're hiring",
    "we are hiring",
    "join our team",
    "careers",
    "job openings",
    "open positions",
    "work with us",
];

const TECH_KEYWORDS: &[&str] = &[
    "api",
    "integration",
    "developer",
    "technical",
    "saas",
    "platform",
    "software",
    "solution",
    "automation",
];

const CONTACT_KEYWORDS: &[&str] = &["contact", "get in touch", "reach out"];

pub struct GenericClassifier;

impl PlatformClassifier for GenericClassifier {
    fn platform(&self) -> Platform {
        Platform::GenericPage
    }

    fn matches(&self, _url: &Url) -> bool {
        true
    }

    fn summarize(&self, _url: &Url, facts: &PageFacts) -> Digest {
        let mut key_points = Vec::new();
        if let Some(title) = &facts.title {
            key_points.push(format!("Title: {}", truncate_text(title, 100)));
        }
        if let Some(description) = &facts.description {
            key_points.push(format!("Description: {}", truncate_text(description, 150)));
        }
        for heading in facts
            .headings
            .iter()
            .filter(|h| Some(*h) != facts.title.as_ref())
            .take(3)
        {
            key_points.push(format!("Section: {}", truncate_text(heading, 80)));
        }
        for item in facts.recent.iter().take(2) {
            key_points.push(format!("Recent: {}", truncate_text(item, 60)));
        }

        Digest {
            key_points,
            signals: business_signals(facts),
            ..Digest::default()
        }
    }

    fn name(&self) -> &str {
        "generic"
    }
}

/// Outreach signals found in ordinary page text.
pub(crate) fn business_signals(facts: &PageFacts) -> Vec<String> {
    let mut signals = Vec::new();

    if let Some(keyword) = PRICING_KEYWORDS.iter().find(|k| facts.mentions(k)) {
        signals.push(format!("Has {} content", title_case(keyword)));
    }
    if HIRING_KEYWORDS.iter().any(|k| facts.mentions(k)) {
        signals.push("Currently hiring".to_string());
    }
    if TECH_KEYWORDS.iter().filter(|k| facts.mentions(k)).count() >= 3 {
        signals.push("Technology-focused company".to_string());
    }
    if CONTACT_KEYWORDS.iter().any(|k| facts.mentions(k)) {
        signals.push("Easy to contact".to_string());
    }

    signals
}

fn title_case(phrase: &str) -> String {
    phrase
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
