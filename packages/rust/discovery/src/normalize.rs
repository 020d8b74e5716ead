//! URL normalization: canonical form used for fetching, caching and deduplication.

use url::{Host, Url};

/// Query parameters that only carry attribution and never change page content.
const TRACKING_PARAMS: &[&str] = &[
    "gclid",
    "fbclid",
    "msclkid",
    "ref",
    "referrer",
    "source",
    "_ga",
    "_gid",
    "mc_cid",
    "mc_eid",
    "ck_subscriber_id",
];

/// Characters stripped from both ends of a raw token before parsing.
const WRAPPING_CHARS: &[char] = &['<', '>', '"', '\'', '(', ')', '[', ']', '{', '}', '`'];

/// Punctuation that commonly trails a URL in prose.
const TRAILING_PUNCT: &[char] = &['.', ',', ';', ':', '!', '?'];

/// Normalize a raw token into a canonical http(s) URL.
///
/// - lower-cases scheme and host (done by [`Url::parse`])
/// - drops default ports and the fragment
/// - strips tracking query parameters (`utm_*`, `gclid`, ...)
/// - collapses repeated and trailing slashes in the path
///
/// Returns `None` for anything that is not an absolute http(s) URL with a host.
pub fn normalize_url(raw: &str) -> Option<Url> {
    let token = clean_token(raw);
    if token.is_empty() {
        return None;
    }

    let lower = token.to_ascii_lowercase();
    let bare = !(lower.starts_with("http://") || lower.starts_with("https://"));
    if bare && (lower.contains("://") || token.contains('@')) {
        return None;
    }
    let with_scheme = if bare {
        format!("https://{token}")
    } else {
        token.to_string()
    };

    let mut url = Url::parse(&with_scheme).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    match url.host()? {
        // Bare tokens need a dotted domain name; "1999" would otherwise parse as an IPv4 host.
        Host::Domain(domain) if bare && !domain.contains('.') => return None,
        Host::Ipv4(_) | Host::Ipv6(_) if bare => return None,
        _ => {}
    }

    url.set_fragment(None);
    strip_tracking_params(&mut url);

    let path = collapse_path(url.path());
    url.set_path(&path);

    Some(url)
}

/// `(authority, path)` pair two URLs must share to count as the same candidate.
///
/// Query and fragment never participate; a non-default port does.
pub fn dedup_key(url: &Url) -> (String, String) {
    let host = url.host_str().unwrap_or_default();
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    (authority, url.path().to_string())
}

/// Whether a query parameter name only carries attribution.
fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

fn strip_tracking_params(url: &mut Url) {
    if url.query().is_none() {
        return;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
}

fn collapse_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn clean_token(raw: &str) -> &str {
    raw.trim()
        .trim_matches(WRAPPING_CHARS)
        .trim_end_matches(TRAILING_PUNCT)
        .trim_matches(WRAPPING_CHARS)
}
