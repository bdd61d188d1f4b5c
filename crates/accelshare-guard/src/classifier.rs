//! The uniform classifier contract and the model-backed variant.
//!
//! Classifiers are variants over a fixed capability set: rule-backed ones
//! run in-process, model-backed ones call an external inference backend.
//! Either way the contract is `check(content, threshold) -> result`, and a
//! classifier whose backing model is gone answers open (passed, confidence
//! zero, "unavailable") so the pipeline keeps its liveness; the gateway
//! surfaces the degradation through the availability gauge.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::GuardResult;

/// The fixed set of classifier capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Toxic or harmful language.
    Toxicity,
    /// Personally identifiable information.
    Pii,
    /// Prompt injection attempts.
    Injection,
    /// API keys, tokens, private keys.
    Secrets,
    /// Organization policy compliance (response side only).
    Policy,
    /// All-in-one safety judge.
    Omnibus,
}

impl ClassifierKind {
    /// Lowercase name used in metrics labels and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifierKind::Toxicity => "toxicity",
            ClassifierKind::Pii => "pii",
            ClassifierKind::Injection => "injection",
            ClassifierKind::Secrets => "secrets",
            ClassifierKind::Policy => "policy",
            ClassifierKind::Omnibus => "omnibus",
        }
    }

    /// Parses a lowercase kind name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "toxicity" => Some(ClassifierKind::Toxicity),
            "pii" => Some(ClassifierKind::Pii),
            "injection" => Some(ClassifierKind::Injection),
            "secrets" => Some(ClassifierKind::Secrets),
            "policy" => Some(ClassifierKind::Policy),
            "omnibus" => Some(ClassifierKind::Omnibus),
            _ => None,
        }
    }

    /// Every kind, in pipeline order.
    pub fn all() -> [ClassifierKind; 6] {
        [
            ClassifierKind::Toxicity,
            ClassifierKind::Pii,
            ClassifierKind::Injection,
            ClassifierKind::Secrets,
            ClassifierKind::Policy,
            ClassifierKind::Omnibus,
        ]
    }
}

impl std::fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one classifier invocation. Pure value type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierResult {
    /// Whether the content passed the check at the given threshold.
    pub passed: bool,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    /// Human-readable explanation.
    pub message: String,
    /// Per-entity detail map (entity type to matched fragments).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Vec<String>>,
    /// Rewritten content with detections replaced by typed placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted_content: Option<String>,
}

impl ClassifierResult {
    /// A clean pass with no findings.
    pub fn pass(message: &str) -> Self {
        Self {
            passed: true,
            confidence: 0.0,
            message: message.to_string(),
            details: BTreeMap::new(),
            redacted_content: None,
        }
    }

    /// The open-by-default answer for an unavailable classifier.
    pub fn unavailable() -> Self {
        Self {
            passed: true,
            confidence: 0.0,
            message: "unavailable".to_string(),
            details: BTreeMap::new(),
            redacted_content: None,
        }
    }
}

/// Uniform content-check contract.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Implementation name (e.g. "keyword-toxicity").
    fn name(&self) -> &str;

    /// Capability this classifier provides.
    fn kind(&self) -> ClassifierKind;

    /// Backing model reference used for latency estimation.
    fn model_ref(&self) -> &str;

    /// Whether the backing model loaded and the classifier can answer.
    fn available(&self) -> bool {
        true
    }

    /// Checks content against the threshold.
    async fn check(&self, content: &str, threshold: f64) -> ClassifierResult;
}

/// Raw score from an external inference backend.
#[derive(Debug, Clone)]
pub struct BackendScore {
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    /// Explanation from the model.
    pub message: String,
    /// Detected entities, if the model extracts them.
    pub entities: BTreeMap<String, Vec<String>>,
    /// Rewritten content, if the model redacts.
    pub redacted_content: Option<String>,
}

/// External inference seam for model-backed classifiers. The actual models
/// live outside this crate; implementations wrap whatever serves them.
#[async_trait]
pub trait ClassifierBackend: Send + Sync {
    /// Scores one piece of content.
    async fn classify(&self, content: &str) -> GuardResult<BackendScore>;
}

/// Classifier backed by an external model. Construction records whether the
/// backend loaded; a missing or failing backend answers open.
pub struct ModelClassifier {
    name: String,
    kind: ClassifierKind,
    model_ref: String,
    backend: Option<Arc<dyn ClassifierBackend>>,
}

impl ModelClassifier {
    /// Wraps a loaded backend.
    pub fn new(
        kind: ClassifierKind,
        name: &str,
        model_ref: &str,
        backend: Arc<dyn ClassifierBackend>,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            model_ref: model_ref.to_string(),
            backend: Some(backend),
        }
    }

    /// A classifier whose backing model failed to load.
    pub fn unavailable(kind: ClassifierKind, name: &str, model_ref: &str) -> Self {
        warn!(%kind, name, model_ref, "classifier backend failed to load");
        Self {
            name: name.to_string(),
            kind,
            model_ref: model_ref.to_string(),
            backend: None,
        }
    }
}

#[async_trait]
impl Classifier for ModelClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ClassifierKind {
        self.kind
    }

    fn model_ref(&self) -> &str {
        &self.model_ref
    }

    fn available(&self) -> bool {
        self.backend.is_some()
    }

    async fn check(&self, content: &str, threshold: f64) -> ClassifierResult {
        let Some(backend) = &self.backend else {
            return ClassifierResult::unavailable();
        };
        match backend.classify(content).await {
            Ok(score) => ClassifierResult {
                passed: score.confidence < threshold,
                confidence: score.confidence,
                message: score.message,
                details: score.entities,
                redacted_content: score.redacted_content,
            },
            Err(err) => {
                warn!(name = %self.name, %err, "classifier backend error, answering open");
                ClassifierResult::unavailable()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend(f64);

    #[async_trait]
    impl ClassifierBackend for FixedBackend {
        async fn classify(&self, _content: &str) -> GuardResult<BackendScore> {
            Ok(BackendScore {
                confidence: self.0,
                message: "scored".to_string(),
                entities: BTreeMap::new(),
                redacted_content: None,
            })
        }
    }

    #[tokio::test]
    async fn test_model_classifier_thresholds() {
        let c = ModelClassifier::new(
            ClassifierKind::Toxicity,
            "stub",
            "stub-model",
            Arc::new(FixedBackend(0.9)),
        );
        assert!(c.available());
        assert!(!c.check("x", 0.7).await.passed);
        assert!(c.check("x", 0.95).await.passed);
    }

    #[tokio::test]
    async fn test_unavailable_answers_open() {
        let c = ModelClassifier::unavailable(ClassifierKind::Omnibus, "judge", "big-judge");
        assert!(!c.available());
        let result = c.check("anything", 0.0).await;
        assert!(result.passed);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.message, "unavailable");
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in ClassifierKind::all() {
            assert_eq!(ClassifierKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ClassifierKind::parse("nope"), None);
    }
}
