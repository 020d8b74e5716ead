//! Stable row identity derived from row content.
//!
//! Priority: profile URL, then email, then company + person name, then the
//! row's position. Only the last one changes when rows move.

use linkintel_discovery::normalize_url;
use linkintel_shared::{KeySource, RowKey, is_managed_column};

const PROFILE_FIELDS: &[&str] = &[
    "linkedin",
    "linkedin_url",
    "profile",
    "profile_url",
    "linkedin_profile",
];
const EMAIL_FIELDS: &[&str] = &["email", "email_address", "work_email"];
const COMPANY_FIELDS: &[&str] = &["company", "company_name", "organization"];
const NAME_FIELDS: &[&str] = &["name", "full_name", "contact_name"];

/// `"Work Email"` → `"work_email"`.
pub fn normalize_header(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Resolve the key for data row `index` (sheet row `index + 2`).
///
/// Columns whose header starts with `namespace` are never consulted.
pub fn resolve_row_key(header: &[String], row: &[String], index: usize, namespace: &str) -> RowKey {
    let fields = Fields::new(header, row, namespace);

    if let Some(url) = fields.first(PROFILE_FIELDS).and_then(normalize_url) {
        return RowKey::new(KeySource::Profile, format!("profile:{url}"));
    }

    if let Some(email) = fields
        .first(EMAIL_FIELDS)
        .map(|e| e.trim().to_lowercase())
        .filter(|e| e.contains('@'))
    {
        return RowKey::new(KeySource::Email, format!("email:{email}"));
    }

    let company = fields.first(COMPANY_FIELDS).map(collapse).unwrap_or_default();
    let person = fields
        .first(NAME_FIELDS)
        .map(collapse)
        .or_else(|| {
            let first = fields.first(&["first_name"]).map(collapse).unwrap_or_default();
            let last = fields.first(&["last_name"]).map(collapse).unwrap_or_default();
            let joined = format!("{first} {last}").trim().to_string();
            (!joined.is_empty()).then_some(joined)
        })
        .unwrap_or_default();
    if !company.is_empty() || !person.is_empty() {
        return RowKey::new(KeySource::Name, format!("name:{company}|{person}"));
    }

    RowKey::new(KeySource::Position, format!("row:{}", index + 2))
}

/// Header-normalized view over one row.
struct Fields<'a> {
    cells: Vec<(String, &'a str)>,
}

impl<'a> Fields<'a> {
    fn new(header: &[String], row: &'a [String], namespace: &str) -> Self {
        let cells = header
            .iter()
            .zip(row.iter())
            .filter(|(name, _)| !is_managed_column(name, namespace))
            .map(|(name, value)| (normalize_header(name), value.as_str()))
            .collect();
        Self { cells }
    }

    /// First non-empty value among `names`, in the order given.
    fn first(&self, names: &[&str]) -> Option<&'a str> {
        names.iter().find_map(|wanted| {
            self.cells
                .iter()
                .find(|(name, value)| name == wanted && !value.trim().is_empty())
                .map(|(_, value)| *value)
        })
    }
}

/// Lowercase and collapse internal whitespace.
fn collapse(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
