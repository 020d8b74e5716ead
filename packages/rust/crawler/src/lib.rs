//! Fetching, policy and classification for LinkIntel.
//!
//! This crate provides:
//! - [`limiter`]: Per-domain concurrency and rate limiting
//! - [`policy`]: Deny-list and robots.txt gate
//! - [`engine`]: Cached, retrying fetch engine
//! - [`adapters`]: Platform classifiers producing per-URL summaries

pub mod adapters;
pub mod engine;
pub mod limiter;
pub mod policy;

pub use adapters::{
    Classifier, ClassifierRegistry, CodeHostClassifier, Digest, GenericClassifier,
    MicroblogClassifier, NewsClassifier, PageFacts, PlatformClassifier, VideoClassifier,
};
pub use engine::{FetchEngine, FetchOptions, USER_AGENT, build_client, compute_hash};
pub use limiter::{DomainLimiter, DomainPermit};
pub use policy::{PolicyDecision, PolicyGate};
