//! Cell rendering: per-URL summaries and the combined report.
//!
//! Both are bounded by a character budget. Sections are cut at bullet
//! boundaries with a `(+k more)` marker, and a final hard guard keeps the
//! output within budget no matter what the inputs look like.

use std::collections::HashSet;

use linkintel_shared::{LinkSummary, Platform};

const BULLET: &str = "• ";
const SECTION_SEP: &str = "\n\n";

/// Key points taken from each source for the snapshot.
const SNAPSHOT_PER_SOURCE: usize = 2;
const SNAPSHOT_MAX: usize = 4;
const SIGNALS_MAX: usize = 6;

/// Everything the combined report is built from.
#[derive(Debug, Clone, Copy)]
pub struct ReportInput<'a> {
    pub summaries: &'a [LinkSummary],
    /// Candidate URLs found for the row (before the slot limit).
    pub total_links: usize,
    /// Per-URL summary slots in the sheet.
    pub link_slots: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Render one summary into its `LINK_i_SUMMARY` cell.
pub fn render_summary_cell(summary: &LinkSummary, max_chars: usize) -> String {
    let head = format!(
        "Source: {} ({})\nURL: {}",
        summary.platform.label(),
        summary.domain,
        summary.url
    );
    let foot = format!("Last Checked: {}", summary.last_checked.format("%Y-%m-%d"));

    let mut remaining = max_chars.saturating_sub(char_len(&head) + char_len(&foot) + 1);
    let mut parts = vec![head];
    for (title, bullets) in [
        ("Key Points:", &summary.key_points),
        ("Signals for Outreach:", &summary.signals),
    ] {
        if let Some(text) = fit_section(title, bullets, remaining.saturating_sub(1)) {
            remaining = remaining.saturating_sub(char_len(&text) + 1);
            parts.push(text);
        }
    }
    parts.push(foot);

    truncate_chars(&parts.join("\n"), max_chars)
}

/// Build the combined report. The data-sources section is reserved first so
/// it survives any budget.
pub fn build_report(input: &ReportInput<'_>, max_chars: usize) -> String {
    let sources = truncate_chars(&sources_section(input), max_chars);
    let mut remaining = max_chars.saturating_sub(char_len(&sources));

    let signals = collect_signals(input.summaries);
    let mut sections = Vec::new();
    for (title, bullets) in [
        ("Profile Snapshot:", snapshot_points(input.summaries)),
        ("Pain / Opportunity Signals:", signals.clone()),
        ("Suggested Angle & CTA:", suggested_actions(input.summaries, &signals)),
    ] {
        let budget = remaining.saturating_sub(SECTION_SEP.len());
        if let Some(text) = fit_section(title, &bullets, budget) {
            remaining = remaining.saturating_sub(char_len(&text) + SECTION_SEP.len());
            sections.push(text);
        }
    }
    sections.push(sources);

    truncate_chars(&sections.join(SECTION_SEP), max_chars)
}

/// Report for a row where every link was excluded by policy.
pub fn skipped_report(skipped: usize) -> String {
    format!("Skipped (policy): {skipped}")
}

fn snapshot_points(summaries: &[LinkSummary]) -> Vec<String> {
    summaries
        .iter()
        .flat_map(|s| {
            s.key_points
                .iter()
                .filter(|p| p.trim().chars().count() > 10)
                .take(SNAPSHOT_PER_SOURCE)
        })
        .take(SNAPSHOT_MAX)
        .cloned()
        .collect()
}

fn collect_signals(summaries: &[LinkSummary]) -> Vec<String> {
    let mut seen = HashSet::new();
    summaries
        .iter()
        .flat_map(|s| s.signals.iter())
        .filter(|signal| seen.insert(signal.as_str()))
        .take(SIGNALS_MAX)
        .cloned()
        .collect()
}

fn suggested_actions(summaries: &[LinkSummary], signals: &[String]) -> Vec<String> {
    if summaries.is_empty() {
        return Vec::new();
    }
    let text = signals.join(" ").to_lowercase();
    let mut actions = vec!["Personalized outreach based on recent activity".to_string()];

    if text.contains("pricing") || text.contains("contact") || text.contains("demo") {
        actions.push("Sales-qualified lead: ready for direct outreach".to_string());
    }
    if text.contains("hiring") {
        actions.push("Growth phase: offer help scaling the team".to_string());
    }
    if text.contains("business news") {
        actions.push("Open by referencing their recent news".to_string());
    }
    if summaries.iter().any(|s| s.platform == Platform::CodeHost) {
        actions.push("Reference their open-source projects".to_string());
    } else {
        actions.push("Reference specific content mentioned on their pages".to_string());
    }
    actions
}

fn sources_section(input: &ReportInput<'_>) -> String {
    let mut seen = HashSet::new();
    let domains: Vec<&str> = input
        .summaries
        .iter()
        .map(|s| s.domain.as_str())
        .filter(|d| seen.insert(*d))
        .collect();

    let mut lines = vec!["Data Sources:".to_string()];
    let mut listing = domains.join(", ");
    if input.total_links > input.link_slots {
        let extra = input.total_links - input.link_slots;
        if !listing.is_empty() {
            listing.push(' ');
        }
        listing.push_str(&format!("(+{extra} more links not detailed)"));
    }
    if !listing.is_empty() {
        lines.push(listing);
    }
    if input.skipped > 0 {
        lines.push(format!("Skipped (policy): {}", input.skipped));
    }
    if input.failed > 0 {
        lines.push(format!("Failed: {}", input.failed));
    }
    lines.join("\n")
}

/// `title` plus as many bullets as fit in `budget` characters. When bullets
/// are dropped a `(+k more)` line replaces them. `None` if nothing fits.
fn fit_section(title: &str, bullets: &[String], budget: usize) -> Option<String> {
    if bullets.is_empty() {
        return None;
    }
    let lines: Vec<String> = bullets.iter().map(|b| format!("{BULLET}{b}")).collect();

    let mut kept = lines.len();
    loop {
        let dropped = lines.len() - kept;
        let mut parts = Vec::with_capacity(kept + 2);
        parts.push(title.to_string());
        parts.extend(lines[..kept].iter().cloned());
        if dropped > 0 {
            parts.push(format!("(+{dropped} more)"));
        }
        let text = parts.join("\n");
        if char_len(&text) <= budget {
            return Some(text);
        }
        if kept == 0 {
            return None;
        }
        kept -= 1;
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Hard guard: at most `max` characters, marking a cut with "...".
pub fn truncate_chars(s: &str, max: usize) -> String {
    if char_len(s) <= max {
        return s.to_string();
    }
    if max < 3 {
        return s.chars().take(max).collect();
    }
    let mut out: String = s.chars().take(max - 3).collect();
    out.push_str("...");
    out
}
