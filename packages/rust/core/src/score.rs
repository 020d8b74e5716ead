//! Deterministic lead scoring.
//!
//! Five graded categories (0-100 each) are combined with fixed weights:
//! relevance 30, purchase intent 25, authority 20, recency 15, data quality 10.
//! Scoring only looks at the summaries, the attempt count and the reference
//! year, so identical inputs always produce identical output.

use std::collections::HashSet;

use linkintel_shared::{LinkSummary, Score};

const WEIGHTS: Weights = Weights {
    relevance: 30,
    intent: 25,
    authority: 20,
    recency: 15,
    data_quality: 10,
};

const RELEVANCE_HIGH: &[&str] = &[
    "saas",
    "software",
    "technology",
    "digital",
    "automation",
    "platform",
    "api",
    "integration",
    "cloud",
    "data",
    "analytics",
    "marketing",
    "sales",
    "crm",
    "lead generation",
];
const RELEVANCE_MEDIUM: &[&str] = &[
    "business",
    "service",
    "solution",
    "consulting",
    "agency",
    "startup",
    "company",
    "organization",
];

const INTENT_HIGH: &[&str] = &[
    "pricing",
    "plans",
    "contact sales",
    "get started",
    "free trial",
    "demo",
    "quote",
    "buy now",
    "purchase",
    "subscription",
    "upgrade",
    "enterprise",
];
const INTENT_MEDIUM: &[&str] = &[
    "solution",
    "service",
    "product",
    "offering",
    "hire",
    "hiring",
    "looking for",
    "need help",
];
const PRICING: &[&str] = &["pricing", "plans", "cost"];
const CONTACT_SALES: &[&str] = &["contact sales", "sales team"];
const TRIAL: &[&str] = &["free trial", "trial", "demo"];
const HIRING: &[&str] = &["hiring", "careers"];

const ENTERPRISE: &[&str] = &["enterprise", "corporation", "inc.", "ltd.", "llc"];
const TEAM: &[&str] = &["team of", "employees", "staff", "founded"];

const RECENT_WORDS: &[&str] = &["recent", "recently", "latest", "new"];
const ACTIVE_WORDS: &[&str] = &["updated", "active", "actively"];
const CONTENT_WORDS: &[&str] = &["blog", "news", "post", "posts", "published"];

const MAX_NOTES: usize = 5;

struct Weights {
    relevance: u32,
    intent: u32,
    authority: u32,
    recency: u32,
    data_quality: u32,
}

/// Per-category grades, each 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakdown {
    pub relevance: u32,
    pub intent: u32,
    pub authority: u32,
    pub recency: u32,
    pub data_quality: u32,
}

impl Breakdown {
    /// Weighted total, rounded and clamped to 0..=100.
    pub fn total(&self) -> u8 {
        let weighted = self.relevance * WEIGHTS.relevance
            + self.intent * WEIGHTS.intent
            + self.authority * WEIGHTS.authority
            + self.recency * WEIGHTS.recency
            + self.data_quality * WEIGHTS.data_quality;
        (f64::from(weighted) / 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// Lowercased text of all key points and signals, plus its word set.
struct Corpus {
    text: String,
    words: HashSet<String>,
}

impl Corpus {
    fn new(summaries: &[LinkSummary]) -> Self {
        let text = summaries
            .iter()
            .flat_map(|s| s.key_points.iter().chain(s.signals.iter()))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let words = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        Self { text, words }
    }

    fn count(&self, keywords: &[&str]) -> usize {
        keywords.iter().filter(|k| self.text.contains(*k)).count()
    }

    fn any(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.text.contains(*k))
    }

    fn any_word(&self, words: &[&str]) -> bool {
        words.iter().any(|w| self.words.contains(*w))
    }
}

/// Score a row from its successful summaries.
///
/// `attempted` counts URLs that were allowed by policy and fetched (or tried);
/// `reference_year` is the run's start year.
pub fn score(summaries: &[LinkSummary], attempted: usize, reference_year: i32) -> Score {
    if summaries.is_empty() {
        return Score {
            value: 0,
            rationale: "No successful data collection".to_string(),
        };
    }

    let corpus = Corpus::new(summaries);
    let breakdown = breakdown(&corpus, summaries, attempted, reference_year);

    Score {
        value: breakdown.total(),
        rationale: notes(&corpus, &breakdown, summaries),
    }
}

fn breakdown(
    corpus: &Corpus,
    summaries: &[LinkSummary],
    attempted: usize,
    reference_year: i32,
) -> Breakdown {
    Breakdown {
        relevance: relevance(corpus),
        intent: intent(corpus),
        authority: authority(corpus, summaries),
        recency: recency(corpus, summaries, reference_year),
        data_quality: data_quality(summaries, attempted),
    }
}

fn relevance(corpus: &Corpus) -> u32 {
    match (corpus.count(RELEVANCE_HIGH), corpus.count(RELEVANCE_MEDIUM)) {
        (3.., _) => 90,
        (2, _) => 75,
        (1, _) => 60,
        (0, 2..) => 40,
        (0, 1) => 25,
        _ => 10,
    }
}

fn intent(corpus: &Corpus) -> u32 {
    if corpus.any(CONTACT_SALES) || corpus.any(PRICING) {
        return 90;
    }
    if corpus.any(TRIAL) {
        return 75;
    }
    match corpus.count(INTENT_HIGH) {
        2.. => return 65,
        1 => return 50,
        _ => {}
    }
    if corpus.any(HIRING) {
        return 45;
    }
    match corpus.count(INTENT_MEDIUM) {
        2.. => 35,
        1 => 20,
        _ => 5,
    }
}

fn max_followers(summaries: &[LinkSummary]) -> Option<u64> {
    summaries.iter().filter_map(|s| s.metrics.followers).max()
}

fn max_stars(summaries: &[LinkSummary]) -> Option<u64> {
    summaries.iter().filter_map(|s| s.metrics.stars).max()
}

fn authority(corpus: &Corpus, summaries: &[LinkSummary]) -> u32 {
    let followers = match max_followers(summaries) {
        Some(10_000..) => 85,
        Some(1_000..) => 70,
        Some(100..) => 55,
        _ => 0,
    };
    let stars = match max_stars(summaries) {
        Some(1_000..) => 80,
        Some(100..) => 65,
        Some(10..) => 50,
        _ => 0,
    };
    let size = if corpus.any(ENTERPRISE) {
        60
    } else if corpus.any(TEAM) {
        45
    } else {
        0
    };

    match followers.max(stars).max(size) {
        0 => 25,
        grade => grade,
    }
}

fn recency(corpus: &Corpus, summaries: &[LinkSummary], reference_year: i32) -> u32 {
    let recent_years = [reference_year.to_string(), (reference_year - 1).to_string()];
    let mentions_recent_year = recent_years.iter().any(|y| corpus.words.contains(y));
    let fresh_metrics = summaries
        .iter()
        .filter_map(|s| s.metrics.latest_year)
        .any(|y| y >= reference_year - 1);

    if mentions_recent_year || fresh_metrics || corpus.any_word(RECENT_WORDS) {
        85
    } else if corpus.any_word(ACTIVE_WORDS) {
        65
    } else if corpus.any_word(CONTENT_WORDS) {
        50
    } else {
        30
    }
}

fn data_quality(summaries: &[LinkSummary], attempted: usize) -> u32 {
    let successes = summaries.len();
    let success_rate = successes as f64 / attempted.max(successes).max(1) as f64;

    let sources_pts = match successes {
        3.. => 30.0,
        2 => 20.0,
        1 => 10.0,
        _ => 0.0,
    };

    let key_points: usize = summaries.iter().map(|s| s.key_points.len()).sum();
    let avg_points = key_points as f64 / successes.max(1) as f64;
    let points_pts = if avg_points >= 4.0 {
        30.0
    } else if avg_points >= 3.0 {
        25.0
    } else if avg_points >= 2.0 {
        20.0
    } else if avg_points >= 1.0 {
        15.0
    } else {
        5.0
    };

    ((success_rate * 40.0 + sources_pts + points_pts).round() as u32).min(100)
}

fn notes(corpus: &Corpus, breakdown: &Breakdown, summaries: &[LinkSummary]) -> String {
    let mut notes = Vec::new();

    if breakdown.relevance >= 75 {
        notes.push("High service relevance".to_string());
    } else if breakdown.relevance >= 50 {
        notes.push("Moderate service relevance".to_string());
    }

    if corpus.any(&["pricing", "plans"]) {
        notes.push("Pricing page found".to_string());
    }
    if corpus.any(&["contact sales"]) {
        notes.push("Sales contact available".to_string());
    }
    if corpus.any(&["hiring"]) {
        notes.push("Currently hiring".to_string());
    }

    match max_followers(summaries) {
        Some(n @ 10_000..) => notes.push(format!("Large following ({})", group_thousands(n))),
        Some(n @ 1_000..) => notes.push(format!("Good following ({})", group_thousands(n))),
        _ => {}
    }
    if let Some(stars @ 100..) = max_stars(summaries) {
        notes.push(format!("Popular projects ({}+ stars)", group_thousands(stars)));
    }

    if breakdown.recency >= 85 {
        notes.push("Recent activity detected".to_string());
    }
    if summaries.len() >= 3 {
        notes.push(format!("Multiple data sources ({})", summaries.len()));
    }

    if notes.is_empty() {
        return "Basic lead profile".to_string();
    }
    notes.truncate(MAX_NOTES);
    notes.join("; ")
}

/// `12345` → `12,345`.
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
