//! Code hosting classifier (GitHub, GitLab, Bitbucket).

use std::sync::LazyLock;

use linkintel_shared::{Platform, SignalMetrics};
use regex::Regex;
use url::Url;

use super::{Digest, PageFacts, PlatformClassifier, bare_host, format_count, parse_count, path_segments, truncate_text};

const HOSTS: &[&str] = &["github.com", "gitlab.com", "bitbucket.org"];

static STARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d[\d,.]*\s?[km]?)\s+stars?\b").expect("stars regex")
});
static FOLLOWERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d[\d,.]*\s?[km]?)\s+followers?\b").expect("followers regex")
});
static LANGUAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(rust|python|typescript|javascript|go|java|kotlin|swift|ruby|php|c\+\+|c#)\s+\d{1,3}(\.\d)?%")
        .expect("language regex")
});

pub struct CodeHostClassifier;

impl PlatformClassifier for CodeHostClassifier {
    fn platform(&self) -> Platform {
        Platform::CodeHost
    }

    fn matches(&self, url: &Url) -> bool {
        HOSTS.contains(&bare_host(url).as_str())
    }

    fn summarize(&self, url: &Url, facts: &PageFacts) -> Digest {
        let segments = path_segments(url);
        let mut key_points = Vec::new();
        let mut signals = Vec::new();

        match segments.as_slice() {
            [owner, repo, ..] => key_points.push(format!("Repository: {owner}/{repo}")),
            [owner] => key_points.push(format!("Profile: {owner}")),
            [] => {}
        }

        if let Some(description) = facts.description.as_deref().filter(|d| !is_boilerplate(d)) {
            key_points.push(format!("Description: {}", truncate_text(description, 120)));
        }

        if let Some(language) = LANGUAGE.captures(&facts.text).and_then(|c| c.get(1)) {
            key_points.push(format!("Primary language: {}", language.as_str()));
        }

        let stars = capture_count(&STARS, &facts.text);
        let followers = capture_count(&FOLLOWERS, &facts.text);

        if let Some(stars) = stars {
            key_points.push(format!("Stars: {}", format_count(stars)));
            if stars >= 1000 {
                signals.push("Popular project (1000+ stars)".to_string());
            } else if stars >= 100 {
                signals.push("Notable project (100+ stars)".to_string());
            }
        }
        if let Some(followers) = followers {
            key_points.push(format!("Followers: {}", format_count(followers)));
            if followers >= 100 {
                signals.push("Popular developer (100+ followers)".to_string());
            }
        }
        if facts.mentions("updated") || facts.mentions("commits") {
            signals.push("Actively maintained".to_string());
        }

        Digest {
            key_points,
            signals,
            metrics: SignalMetrics {
                followers,
                stars,
                latest_year: None,
            },
        }
    }

    fn name(&self) -> &str {
        "code_host"
    }
}

fn capture_count(re: &Regex, text: &str) -> Option<u64> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| parse_count(m.as_str()))
        .max()
}

/// GitHub's default description carries no information about the project.
fn is_boilerplate(description: &str) -> bool {
    description.starts_with("Contribute to ") && description.ends_with("on GitHub.")
}
