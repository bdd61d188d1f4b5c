//! Classifier registry with ordered fallback ladders.
//!
//! Each policy kind maps to an ordered candidate list; resolution walks the
//! ladder and serves the first available classifier. Unavailability is a
//! first-class observable state: the availability gauge is refreshed on
//! every registration and resolution.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use accelshare_metrics::{LabelSet, MetricsSink};

use crate::classifier::{Classifier, ClassifierKind};

/// Registry of classifier candidates keyed by kind.
pub struct ClassifierRegistry {
    candidates: RwLock<HashMap<ClassifierKind, Vec<Arc<dyn Classifier>>>>,
    metrics: Arc<dyn MetricsSink>,
}

impl ClassifierRegistry {
    /// Empty registry.
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            candidates: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Appends a candidate to its kind's ladder. Candidates are consulted in
    /// registration order.
    pub fn register(&self, classifier: Arc<dyn Classifier>) {
        let kind = classifier.kind();
        info!(
            %kind,
            name = classifier.name(),
            available = classifier.available(),
            "registered classifier"
        );
        self.candidates
            .write()
            .entry(kind)
            .or_default()
            .push(classifier);
        self.refresh_gauge(kind);
    }

    /// First available candidate for a kind, if any.
    pub fn resolve(&self, kind: ClassifierKind) -> Option<Arc<dyn Classifier>> {
        let candidates = self.candidates.read();
        let ladder = candidates.get(&kind)?;
        let chosen = ladder.iter().find(|c| c.available()).cloned();
        if chosen.is_none() && !ladder.is_empty() {
            debug!(%kind, "all candidates unavailable");
        }
        drop(candidates);
        self.refresh_gauge(kind);
        chosen
    }

    /// Whether any candidate for the kind is available.
    pub fn available(&self, kind: ClassifierKind) -> bool {
        self.candidates
            .read()
            .get(&kind)
            .map(|ladder| ladder.iter().any(|c| c.available()))
            .unwrap_or(false)
    }

    /// Registered kinds with (candidate count, availability).
    pub fn summary(&self) -> Vec<(ClassifierKind, usize, bool)> {
        self.candidates
            .read()
            .iter()
            .map(|(kind, ladder)| {
                (
                    *kind,
                    ladder.len(),
                    ladder.iter().any(|c| c.available()),
                )
            })
            .collect()
    }

    fn refresh_gauge(&self, kind: ClassifierKind) {
        let available = self.available(kind);
        self.metrics
            .gauge(
                "classifier_available",
                &LabelSet::new(&[("kind", kind.as_str())]),
            )
            .set(if available { 1.0 } else { 0.0 });
    }
}
