//! Enrichment orchestration for LinkIntel.
//!
//! This crate ties row identity, column management, discovery, fetching,
//! classification, reporting, scoring and writing into one idempotent run
//! (`run_enrichment`).

pub mod aggregate;
pub mod context;
pub mod pipeline;
pub mod row_key;
pub mod schema;
pub mod score;
pub mod writer;

pub use context::RunContext;
pub use pipeline::{ProgressReporter, RunReport, SilentProgress, run_enrichment};
pub use row_key::resolve_row_key;
pub use schema::{ColumnLayout, ManagedColumns, ensure_schema};
pub use score::score;
pub use writer::{RowCells, RowWriter, WriteReport, WriteStats};
