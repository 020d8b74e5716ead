//! Row writer: the only path from the pipeline to the sheet.
//!
//! Updates are queued and flushed in batches. Each flush re-reads the sheet,
//! confirms every update still targets the row it was computed for (moving it
//! when the key is found elsewhere), and drops updates whose content cells
//! already hold the new values. All of this happens under one async mutex, so
//! writes never interleave.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use linkintel_sheet::{RowUpdate, SheetData, SheetTransport};
use linkintel_shared::{EnrichConfig, Result, RunStatus, Score};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::aggregate::truncate_chars;
use crate::row_key::resolve_row_key;
use crate::schema::ColumnLayout;

/// Longest message stored in the `ERROR` column.
pub const MAX_ERROR_CHARS: usize = 500;

/// Rationale written when every link was excluded by policy.
pub const ALL_SKIPPED_NOTE: &str = "All links skipped by policy";

/// Computed values for one row, before they are mapped to columns.
#[derive(Debug, Clone)]
pub struct RowCells {
    pub key: String,
    pub status: RunStatus,
    /// Rendered `LINK_i_SUMMARY` cells, at most one per slot.
    pub summaries: Vec<String>,
    pub report: String,
    pub score: Option<Score>,
    pub error: Option<String>,
}

/// Counters accumulated across flushes.
#[derive(Debug, Clone, Default)]
pub struct WriteStats {
    pub written: usize,
    pub unchanged: usize,
    pub relocated: usize,
    /// Statuses of rows whose key could not be found at write time.
    pub lost: Vec<RunStatus>,
    /// Statuses of rows the transport refused, or whose batch could not be re-read.
    pub failed: Vec<RunStatus>,
}

/// Final writer output: counters plus, in dry-run mode, the updates that
/// would have been written.
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    pub stats: WriteStats,
    pub planned: Vec<RowUpdate>,
}

#[derive(Debug)]
struct Pending {
    update: RowUpdate,
    status: RunStatus,
}

#[derive(Debug, Default)]
struct WriterState {
    pending: Vec<Pending>,
    stats: WriteStats,
    planned: Vec<RowUpdate>,
}

pub struct RowWriter {
    transport: Arc<dyn SheetTransport>,
    layout: ColumnLayout,
    namespace: String,
    dry_run: bool,
    batch_size: usize,
    state: Mutex<WriterState>,
}

impl RowWriter {
    pub fn new(transport: Arc<dyn SheetTransport>, layout: ColumnLayout, config: &EnrichConfig) -> Self {
        Self {
            transport,
            layout,
            namespace: config.namespace.clone(),
            dry_run: config.dry_run,
            batch_size: config.write_batch_size.max(1),
            state: Mutex::new(WriterState::default()),
        }
    }

    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    /// Map computed values onto managed columns for data row `row`.
    pub fn build_update(&self, row: usize, cells: &RowCells, now: DateTime<Utc>) -> RowUpdate {
        let layout = &self.layout;
        let last_run = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut out: Vec<(usize, String)> = vec![(layout.row_key, cells.key.clone())];

        match cells.status {
            RunStatus::Error => {
                let message = cells.error.as_deref().unwrap_or("unknown error");
                out.push((layout.status, cells.status.to_string()));
                out.push((layout.error, truncate_chars(message, MAX_ERROR_CHARS)));
            }
            RunStatus::NoLinks | RunStatus::SkippedTos | RunStatus::Ok => {
                for (slot, column) in layout.link_summaries.iter().enumerate() {
                    let value = cells.summaries.get(slot).cloned().unwrap_or_default();
                    out.push((*column, value));
                }
                let (score, notes) = match (&cells.status, &cells.score) {
                    (RunStatus::NoLinks, _) => (String::new(), String::new()),
                    (RunStatus::SkippedTos, _) => ("0".to_string(), ALL_SKIPPED_NOTE.to_string()),
                    (_, Some(score)) => (score.value.to_string(), score.rationale.clone()),
                    (_, None) => (String::new(), String::new()),
                };
                let report = if cells.status == RunStatus::NoLinks {
                    String::new()
                } else {
                    cells.report.clone()
                };
                out.push((layout.combined_report, report));
                out.push((layout.lead_score, score));
                out.push((layout.lead_score_notes, notes));
                out.push((layout.status, cells.status.to_string()));
                out.push((layout.error, String::new()));
            }
        }
        out.push((layout.last_run, last_run));

        RowUpdate {
            row,
            expected_key: cells.key.clone(),
            cells: out,
        }
    }

    /// Queue an update, flushing when the batch is full.
    pub async fn submit(&self, update: RowUpdate, status: RunStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        state.pending.push(Pending { update, status });
        if state.pending.len() >= self.batch_size {
            self.flush_locked(&mut state).await?;
        }
        Ok(())
    }

    /// Flush whatever is queued.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    /// Flush and return the accumulated report.
    pub async fn finish(&self) -> Result<WriteReport> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await?;
        Ok(WriteReport {
            stats: std::mem::take(&mut state.stats),
            planned: std::mem::take(&mut state.planned),
        })
    }

    async fn flush_locked(&self, state: &mut WriterState) -> Result<()> {
        if state.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut state.pending);
        let sheet = match self.transport.read_rows().await {
            Ok(sheet) => sheet,
            Err(e) => {
                warn!(error = %e, rows = pending.len(), "could not re-read sheet before writing, dropping batch");
                state.stats.failed.extend(pending.iter().map(|p| p.status));
                return Ok(());
            }
        };

        let mut batch: Vec<RowUpdate> = Vec::with_capacity(pending.len());
        let mut statuses: Vec<RunStatus> = Vec::with_capacity(pending.len());

        for Pending { mut update, status } in pending {
            let Some(row) = self.locate(&sheet, &update) else {
                warn!(
                    row = update.row + 2,
                    key = %update.expected_key,
                    "row key not found at write time, skipping"
                );
                state.stats.lost.push(status);
                continue;
            };
            if row != update.row {
                info!(from = update.row + 2, to = row + 2, key = %update.expected_key, "row moved, relocating write");
                state.stats.relocated += 1;
                update.row = row;
            }

            if self.is_unchanged(&sheet, &update) {
                debug!(row = row + 2, "row unchanged, skipping write");
                state.stats.unchanged += 1;
                continue;
            }
            batch.push(update);
            statuses.push(status);
        }

        if batch.is_empty() {
            return Ok(());
        }

        if self.dry_run {
            for update in &batch {
                info!(row = update.row + 2, cells = update.cells.len(), "dry run: would write");
            }
            state.planned.extend(batch);
            return Ok(());
        }

        match self.transport.write_rows(&batch).await {
            Ok(()) => {
                state.stats.written += batch.len();
                debug!(rows = batch.len(), "batch written");
            }
            Err(e) => {
                warn!(error = %e, rows = batch.len(), "batch write failed, retrying rows one by one");
                for (update, status) in batch.iter().zip(statuses) {
                    match self.transport.write_row(update).await {
                        Ok(()) => state.stats.written += 1,
                        Err(e) => {
                            warn!(row = update.row + 2, error = %e, "row write failed");
                            state.stats.failed.push(status);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Current data index of the row `update` was computed for.
    fn locate(&self, sheet: &SheetData, update: &RowUpdate) -> Option<usize> {
        if self.key_at(sheet, update.row).as_deref() == Some(update.expected_key.as_str()) {
            return Some(update.row);
        }
        let by_column = (0..sheet.rows.len())
            .find(|&i| sheet.cell(i, self.layout.row_key) == update.expected_key);
        by_column.or_else(|| {
            (0..sheet.rows.len())
                .find(|&i| self.key_at(sheet, i).as_deref() == Some(update.expected_key.as_str()))
        })
    }

    fn key_at(&self, sheet: &SheetData, row: usize) -> Option<String> {
        let cells = sheet.rows.get(row)?;
        Some(resolve_row_key(&sheet.header, cells, row, &self.namespace).value)
    }

    /// Every written cell except `LAST_RUN` already holds the new value.
    fn is_unchanged(&self, sheet: &SheetData, update: &RowUpdate) -> bool {
        update
            .cells
            .iter()
            .filter(|(column, _)| *column != self.layout.last_run)
            .all(|(column, value)| sheet.cell(update.row, *column) == value)
    }
}
