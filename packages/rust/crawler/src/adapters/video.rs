//! Video platform classifier (YouTube, Vimeo).

use std::sync::LazyLock;

use linkintel_shared::{Platform, SignalMetrics};
use regex::Regex;
use url::Url;

use super::{Digest, PageFacts, PlatformClassifier, bare_host, format_count, parse_count, path_segments, truncate_text};

static SUBSCRIBERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d[\d,.]*\s?[kmb]?)\s+(?:subscribers|followers)\b").expect("subscribers regex")
});
static VIDEOS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d[\d,.]*\s?[km]?)\s+videos\b").expect("videos regex"));

pub struct VideoClassifier;

impl PlatformClassifier for VideoClassifier {
    fn platform(&self) -> Platform {
        Platform::VideoPlatform
    }

    fn matches(&self, url: &Url) -> bool {
        let host = bare_host(url);
        host == "youtu.be"
            || host == "vimeo.com"
            || host == "youtube.com"
            || host.ends_with(".youtube.com")
    }

    fn summarize(&self, url: &Url, facts: &PageFacts) -> Digest {
        let mut key_points = Vec::new();
        let mut signals = Vec::new();

        if let Some(title) = facts.display_title() {
            key_points.push(format!("Channel: {}", truncate_text(title, 100)));
        }
        if let Some(handle) = path_segments(url).into_iter().find(|s| s.starts_with('@')) {
            key_points.push(format!("Handle: {handle}"));
        }
        if let Some(description) = &facts.description {
            key_points.push(format!("About: {}", truncate_text(description, 100)));
        }

        let subscribers = SUBSCRIBERS
            .captures(&facts.text)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_count(m.as_str()));
        if let Some(subscribers) = subscribers {
            key_points.push(format!("Subscribers: {}", format_count(subscribers)));
            match subscribers {
                100_000.. => signals.push("Large channel (100k+ subscribers)".to_string()),
                10_000.. => signals.push("Medium channel (10k+ subscribers)".to_string()),
                1_000.. => signals.push("Growing channel (1k+ subscribers)".to_string()),
                _ => {}
            }
        }

        let videos = VIDEOS
            .captures(&facts.text)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_count(m.as_str()));
        if let Some(videos) = videos {
            key_points.push(format!("Videos: {}", format_count(videos)));
            if videos >= 50 {
                signals.push("Active content creator (50+ videos)".to_string());
            }
        }

        Digest {
            key_points,
            signals,
            metrics: SignalMetrics {
                followers: subscribers,
                ..SignalMetrics::default()
            },
        }
    }

    fn name(&self) -> &str {
        "video"
    }
}
