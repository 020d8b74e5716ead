//! Shared types, error model, and configuration for LinkIntel.
//!
//! This crate is the foundation depended on by all other LinkIntel crates.
//! It provides:
//! - [`LinkIntelError`], the unified error type
//! - Domain types ([`LinkSummary`], [`FetchResult`], [`RowKey`], [`RunStatus`], ...)
//! - Configuration ([`AppConfig`], [`EnrichConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BudgetConfig, DiscoveryConfig, DiscoveryMode, EnrichConfig, FetchConfig,
    PolicyConfig, RowRange, RunConfig, SchemaConfig, config_dir, config_file_path,
    default_db_path, init_config, load_config, load_config_from,
};
pub use error::{LinkIntelError, Result};
pub use types::{
    FetchResult, FetchStatus, KeySource, LinkSummary, Platform, RowKey, RunStatus, RunSummary,
    Score, SignalMetrics, UrlCandidate, is_managed_column,
};
