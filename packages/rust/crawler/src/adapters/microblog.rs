//! Microblog classifier (X/Twitter, Mastodon, Threads).

use std::sync::LazyLock;

use linkintel_shared::{Platform, SignalMetrics};
use regex::Regex;
use url::Url;

use super::{Digest, PageFacts, PlatformClassifier, bare_host, format_count, parse_count, path_segments, truncate_text};

static FOLLOWERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d[\d,.]*\s?[km]?)\s+followers\b").expect("followers regex")
});

/// Topics worth calling out when a profile mentions them.
const TOPICS: &[&str] = &["hiring", "launch", "funding", "pricing", "product", "partnership"];

pub struct MicroblogClassifier;

impl PlatformClassifier for MicroblogClassifier {
    fn platform(&self) -> Platform {
        Platform::Microblog
    }

    fn matches(&self, url: &Url) -> bool {
        let host = bare_host(url);
        matches!(host.as_str(), "twitter.com" | "x.com" | "threads.net" | "mobile.twitter.com")
            || host.starts_with("mastodon.")
            || host.contains(".mastodon.")
    }

    fn summarize(&self, url: &Url, facts: &PageFacts) -> Digest {
        let mut key_points = Vec::new();
        let mut signals = Vec::new();

        let handle = path_segments(url)
            .first()
            .map(|s| s.trim_start_matches('@').to_string());
        match (facts.display_title(), &handle) {
            (Some(name), Some(handle)) => {
                key_points.push(format!("Name: {} (@{handle})", truncate_text(name, 80)))
            }
            (Some(name), None) => key_points.push(format!("Name: {}", truncate_text(name, 80))),
            (None, Some(handle)) => key_points.push(format!("Handle: @{handle}")),
            (None, None) => {}
        }
        if let Some(bio) = &facts.description {
            key_points.push(format!("Bio: {}", truncate_text(bio, 120)));
        }

        let followers = FOLLOWERS
            .captures(&facts.text)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_count(m.as_str()));
        if let Some(followers) = followers {
            key_points.push(format!("Metrics: {} followers", format_count(followers)));
            if followers >= 10_000 {
                signals.push("High follower count (10k+)".to_string());
            } else if followers >= 1_000 {
                signals.push("Good follower count (1k+)".to_string());
            }
        }

        if let Some(topic) = TOPICS.iter().find(|t| facts.mentions(t)) {
            signals.push(format!("Recent posts mention {topic}"));
        }

        Digest {
            key_points,
            signals,
            metrics: SignalMetrics {
                followers,
                ..SignalMetrics::default()
            },
        }
    }

    fn name(&self) -> &str {
        "microblog"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_digest() {
        let facts = PageFacts::parse(
            r#"<html><head><meta property="og:title" content="Acme Inc">
            <meta name="description" content="We build automation"></head>
            <body><span>12.5K Followers</span><p>Big product launch next week</p></body></html>"#,
        );
        let url = Url::parse("https://x.com/acmeinc").unwrap();
        let digest = MicroblogClassifier.summarize(&url, &facts);

        assert_eq!(
            digest.key_points,
            vec![
                "Name: Acme Inc (@acmeinc)",
                "Bio: We build automation",
                "Metrics: 12.5K followers",
            ]
        );
        assert_eq!(
            digest.signals,
            vec!["High follower count (10k+)", "Recent posts mention launch"]
        );
        assert_eq!(digest.metrics.followers, Some(12_500));
    }

    #[test]
    fn matches_hosts() {
        for raw in ["https://twitter.com/a", "https://x.com/a", "https://mastodon.social/@a"] {
            assert!(MicroblogClassifier.matches(&Url::parse(raw).unwrap()), "{raw}");
        }
        assert!(!MicroblogClassifier.matches(&Url::parse("https://notx.com/a").unwrap()));
    }
}
