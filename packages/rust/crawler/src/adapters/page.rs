//! Facts pulled out of a fetched HTML page, shared by every classifier.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

static TITLE: LazyLock<Selector> = LazyLock::new(|| sel("title"));
static META_DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| {
    sel(r#"meta[name="description"], meta[property="og:description"], meta[name="twitter:description"]"#)
});
static OG_TITLE: LazyLock<Selector> = LazyLock::new(|| sel(r#"meta[property="og:title"]"#));
static HEADINGS: LazyLock<Selector> = LazyLock::new(|| sel("h1, h2"));
static RECENT: LazyLock<Selector> = LazyLock::new(|| {
    sel("article h2, article h3, .blog-post h2, .blog-post h3, .news h2, .news h3, .post-title, .article-title")
});
static PUBLISHED: LazyLock<Selector> = LazyLock::new(|| {
    sel(r#"meta[property="article:published_time"], meta[name="date"], meta[name="pubdate"], meta[itemprop="datePublished"]"#)
});
static TIME: LazyLock<Selector> = LazyLock::new(|| sel("time[datetime]"));
static AUTHOR: LazyLock<Selector> = LazyLock::new(|| {
    sel(r#"meta[name="author"], meta[property="article:author"]"#)
});

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19[89]\d|20\d{2})\b").expect("year regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Everything the classifiers look at, extracted once per page.
#[derive(Debug, Clone, Default)]
pub struct PageFacts {
    pub title: Option<String>,
    /// `og:title` when present, often cleaner than `<title>` on social sites.
    pub og_title: Option<String>,
    pub description: Option<String>,
    /// `h1`/`h2` texts longer than three characters, in document order.
    pub headings: Vec<String>,
    /// Titles of article/blog/news items on the page.
    pub recent: Vec<String>,
    pub published: Option<String>,
    pub author: Option<String>,
    /// Visible text, whitespace-collapsed and lowercased.
    pub text: String,
}

impl PageFacts {
    pub fn parse(html: &str) -> Self {
        let doc = Html::parse_document(html);

        let title = doc
            .select(&TITLE)
            .next()
            .map(|el| clean(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty());

        let headings = doc
            .select(&HEADINGS)
            .map(|el| clean(&el.text().collect::<String>()))
            .filter(|t| t.chars().count() > 3)
            .take(6)
            .collect();

        let recent = doc
            .select(&RECENT)
            .map(|el| clean(&el.text().collect::<String>()))
            .filter(|t| t.chars().count() > 10)
            .take(3)
            .collect();

        let published = meta_content(&doc, &PUBLISHED).or_else(|| {
            doc.select(&TIME)
                .next()
                .and_then(|el| el.value().attr("datetime"))
                .map(clean)
                .filter(|t| !t.is_empty())
        });

        Self {
            title,
            og_title: meta_content(&doc, &OG_TITLE),
            description: meta_content(&doc, &META_DESCRIPTION),
            headings,
            recent,
            published,
            author: meta_content(&doc, &AUTHOR),
            text: visible_text(&doc),
        }
    }

    /// Best display title: `og:title`, then `<title>`, then the first heading.
    pub fn display_title(&self) -> Option<&str> {
        self.og_title
            .as_deref()
            .or(self.title.as_deref())
            .or(self.headings.first().map(String::as_str))
    }

    pub fn mentions(&self, needle: &str) -> bool {
        self.text.contains(needle)
    }

    /// Most recent plausible year mentioned in the text or publish date.
    pub fn latest_year(&self) -> Option<i32> {
        let published = self.published.as_deref().unwrap_or_default();
        YEAR.find_iter(&self.text)
            .chain(YEAR.find_iter(published))
            .filter_map(|m| m.as_str().parse::<i32>().ok())
            .max()
    }
}

fn meta_content(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .filter_map(|el| el.value().attr("content"))
        .map(clean)
        .find(|c| !c.is_empty())
}

/// Text nodes outside script/style/noscript/template.
fn visible_text(doc: &Html) -> String {
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name()))
            .is_some_and(|name| matches!(name, "script" | "style" | "noscript" | "template"));
        if hidden {
            continue;
        }
        out.push_str(text);
        out.push(' ');
    }
    clean(&out).to_lowercase()
}

fn clean(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").into_owned()
}

/// Cut `s` to at most `max` characters, marking the cut with "...".
pub fn truncate_text(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}

/// Parse human counts such as `1,234`, `1.2k` or `3M`.
pub fn parse_count(raw: &str) -> Option<u64> {
    let s = raw.trim().to_ascii_lowercase().replace([',', ' '], "");
    let (number, multiplier) = match s.chars().last()? {
        'k' => (&s[..s.len() - 1], 1_000.0),
        'm' => (&s[..s.len() - 1], 1_000_000.0),
        'b' => (&s[..s.len() - 1], 1_000_000_000.0),
        _ => (s.as_str(), 1.0),
    };
    let value: f64 = number.parse().ok()?;
    (value.is_finite() && value >= 0.0).then(|| (value * multiplier).round() as u64)
}

/// `12345` → `12.3K`, for key-point display.
pub fn format_count(n: u64) -> String {
    match n {
        0..=999 => n.to_string(),
        1_000..=999_999 => format!("{:.1}K", n as f64 / 1_000.0),
        _ => format!("{:.1}M", n as f64 / 1_000_000.0),
    }
}
