//! Per-run shared state.

use std::sync::Arc;

use linkintel_crawler::{Classifier, ClassifierRegistry, DomainLimiter, FetchEngine, PolicyGate};
use linkintel_shared::{EnrichConfig, Result};
use linkintel_storage::Storage;

/// Everything rows share during one run: the per-domain limiter, the fetch
/// engine, the optional cache, the policy gate and the classifier.
///
/// Built once per run and dropped when it ends, so robots memos and limiter
/// state never leak between runs.
pub struct RunContext {
    limiter: Arc<DomainLimiter>,
    engine: FetchEngine,
    storage: Option<Arc<Storage>>,
    policy: PolicyGate,
    classifier: Arc<dyn Classifier>,
}

impl RunContext {
    pub fn new(config: &EnrichConfig, storage: Option<Arc<Storage>>) -> Result<Self> {
        let limiter = Arc::new(DomainLimiter::new(config.per_domain_rps));
        let engine = FetchEngine::new(config, limiter.clone(), storage.clone())?;
        let policy = PolicyGate::new(
            config,
            engine.client().clone(),
            limiter.clone(),
            storage.clone(),
        );

        Ok(Self {
            limiter,
            engine,
            storage,
            policy,
            classifier: Arc::new(ClassifierRegistry::new()),
        })
    }

    /// Replace the built-in classifier registry.
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Let the policy gate and fetch engine reach localhost (for tests against
    /// mock servers).
    pub fn allow_localhost(self) -> Self {
        Self {
            engine: self.engine.allow_localhost(),
            policy: self.policy.allow_localhost(),
            ..self
        }
    }

    pub fn limiter(&self) -> &Arc<DomainLimiter> {
        &self.limiter
    }

    pub fn engine(&self) -> &FetchEngine {
        &self.engine
    }

    pub fn storage(&self) -> Option<&Arc<Storage>> {
        self.storage.as_ref()
    }

    pub fn policy(&self) -> &PolicyGate {
        &self.policy
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }
}
