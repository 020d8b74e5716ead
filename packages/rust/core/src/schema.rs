//! Managed output columns: detect, reuse, and append what is missing.

use std::collections::HashMap;

use linkintel_sheet::SheetTransport;
use linkintel_shared::{LinkIntelError, Result, is_managed_column};
use tracing::{info, instrument, warn};

/// Names of the managed column block for a namespace and slot count.
#[derive(Debug, Clone)]
pub struct ManagedColumns {
    pub namespace: String,
    pub link_slots: usize,
}

impl ManagedColumns {
    pub fn new(namespace: impl Into<String>, link_slots: usize) -> Self {
        Self {
            namespace: namespace.into(),
            link_slots,
        }
    }

    pub fn row_key(&self) -> String {
        format!("{}ROW_KEY", self.namespace)
    }

    pub fn link_summary(&self, slot: usize) -> String {
        format!("{}LINK_{slot}_SUMMARY", self.namespace)
    }

    fn meta(&self, name: &str) -> String {
        format!("{}{name}", self.namespace)
    }

    /// Required names in block order.
    pub fn required(&self) -> Vec<String> {
        let mut names = vec![self.row_key()];
        names.extend((1..=self.link_slots).map(|slot| self.link_summary(slot)));
        names.extend(
            [
                "COMBINED_REPORT",
                "LEAD_SCORE",
                "LEAD_SCORE_NOTES",
                "STATUS",
                "ERROR",
                "LAST_RUN",
            ]
            .iter()
            .map(|n| self.meta(n)),
        );
        names
    }
}

/// Column index of every managed field, valid after [`ensure_schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    pub row_key: usize,
    pub link_summaries: Vec<usize>,
    pub combined_report: usize,
    pub lead_score: usize,
    pub lead_score_notes: usize,
    pub status: usize,
    pub error: usize,
    pub last_run: usize,
}

impl ColumnLayout {
    /// Every managed column except `LAST_RUN`, in block order.
    pub fn content_columns(&self) -> Vec<usize> {
        let mut columns = vec![self.row_key];
        columns.extend(&self.link_summaries);
        columns.extend([
            self.combined_report,
            self.lead_score,
            self.lead_score_notes,
            self.status,
            self.error,
        ]);
        columns
    }
}

/// Reconcile the sheet header with the managed block for `columns`.
///
/// Existing managed columns are reused in place. Missing ones are inserted
/// contiguously after the rightmost managed column (or after the last
/// non-empty header). Nothing is renamed, reordered or removed.
#[instrument(skip_all, fields(namespace = %columns.namespace, slots = columns.link_slots))]
pub async fn ensure_schema(
    transport: &dyn SheetTransport,
    columns: &ManagedColumns,
) -> Result<ColumnLayout> {
    let header = transport
        .read_header()
        .await
        .map_err(|e| LinkIntelError::Schema(format!("failed to read header: {e}")))?;

    let mut existing: HashMap<String, usize> = HashMap::new();
    for (index, name) in header.iter().enumerate() {
        if !is_managed_column(name, &columns.namespace) {
            continue;
        }
        let id = column_id(name);
        if let Some(first) = existing.get(&id) {
            warn!(column = %name, first = *first, duplicate = index, "duplicate managed column, using first");
            continue;
        }
        existing.insert(id, index);
    }

    let required = columns.required();
    let missing: Vec<String> = required
        .iter()
        .filter(|name| !existing.contains_key(&column_id(name)))
        .cloned()
        .collect();

    let stale = existing
        .keys()
        .filter(|id| !required.iter().any(|r| column_id(r) == **id))
        .count();
    if stale > 0 {
        info!("retaining {stale} stale managed column(s)");
    }

    let insert_at = match existing.values().max() {
        Some(rightmost) => rightmost + 1,
        None => header
            .iter()
            .rposition(|name| !name.trim().is_empty())
            .map_or(0, |last| last + 1),
    };

    let mut positions = existing;

    if !missing.is_empty() {
        transport
            .insert_columns(insert_at, &missing)
            .await
            .map_err(|e| LinkIntelError::Schema(format!("failed to insert columns: {e}")))?;
        info!(
            created = missing.len(),
            reused = required.len() - missing.len(),
            at = insert_at,
            "managed columns created"
        );
        for (offset, name) in missing.iter().enumerate() {
            positions.insert(column_id(name), insert_at + offset);
        }
    } else {
        info!(reused = required.len(), "managed columns up to date");
    }

    let index_of = |name: String| -> Result<usize> {
        positions
            .get(&column_id(&name))
            .copied()
            .ok_or_else(|| LinkIntelError::Schema(format!("column {name} missing after reconcile")))
    };

    Ok(ColumnLayout {
        row_key: index_of(columns.row_key())?,
        link_summaries: (1..=columns.link_slots)
            .map(|slot| index_of(columns.link_summary(slot)))
            .collect::<Result<_>>()?,
        combined_report: index_of(columns.meta("COMBINED_REPORT"))?,
        lead_score: index_of(columns.meta("LEAD_SCORE"))?,
        lead_score_notes: index_of(columns.meta("LEAD_SCORE_NOTES"))?,
        status: index_of(columns.meta("STATUS"))?,
        error: index_of(columns.meta("ERROR"))?,
        last_run: index_of(columns.meta("LAST_RUN"))?,
    })
}

/// Header identity used for matching: trimmed, ASCII uppercase.
fn column_id(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}
