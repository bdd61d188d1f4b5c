//! Declarative configuration for the guard subsystem and the wiring that
//! turns it into a running gateway.
//!
//! The document mirrors the deployment schema: one section per classifier
//! kind (model ladder, direction flags, threshold, action), traffic limits,
//! latency budget overrides, and the QoS saturation cap. Parsing files is a
//! caller concern; these are plain serde structs built programmatically.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use accelshare_metrics::MetricsSink;

use crate::budget::{LatencyBudgets, UseCase};
use crate::checkers::{
    KeywordToxicityClassifier, PatternInjectionClassifier, PatternPiiClassifier,
    RulePolicyClassifier, SecretScanClassifier,
};
use crate::classifier::{Classifier, ClassifierBackend, ClassifierKind, ModelClassifier};
use crate::gateway::SafetyGateway;
use crate::policy::{Policy, PolicyAction};
use crate::registry::ClassifierRegistry;
use crate::traffic::TrafficConfig;

/// Wiring and policy for one classifier kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailSetting {
    /// Primary backing model reference.
    pub model: String,
    /// Fallback model reference, consulted when the primary cannot load.
    #[serde(default)]
    pub fallback: Option<String>,
    /// Run on requests.
    pub pre_filter: bool,
    /// Run on responses.
    pub post_filter: bool,
    /// Confidence threshold.
    pub threshold: f64,
    /// Action on failure.
    pub action: PolicyAction,
    /// Whether the policy participates.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Deny when no candidate is available.
    #[serde(default)]
    pub fail_closed: bool,
}

fn default_true() -> bool {
    true
}

/// QoS section of the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosSection {
    /// Maximum pending requests before admission rejects.
    pub saturation_cap: usize,
}

impl Default for QosSection {
    fn default() -> Self {
        Self { saturation_cap: 100 }
    }
}

/// The full guard configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Per-kind classifier wiring, keyed by kind name.
    pub guardrails: BTreeMap<String, GuardrailSetting>,
    /// Traffic limiter settings.
    #[serde(default)]
    pub traffic: TrafficConfig,
    /// Guardrail budget overrides in milliseconds, keyed by use-case name.
    #[serde(default)]
    pub latency_budgets: BTreeMap<String, u64>,
    /// QoS settings.
    #[serde(default)]
    pub qos: QosSection,
    /// Stop the pipeline at the first blocking failure.
    #[serde(default)]
    pub fast_fail: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        let mut guardrails = BTreeMap::new();
        guardrails.insert(
            "pii".to_string(),
            GuardrailSetting {
                model: "piiranha".to_string(),
                fallback: Some("pattern".to_string()),
                pre_filter: true,
                post_filter: true,
                threshold: 0.8,
                action: PolicyAction::Redact,
                enabled: true,
                fail_closed: false,
            },
        );
        guardrails.insert(
            "secrets".to_string(),
            GuardrailSetting {
                model: "secret-scanner".to_string(),
                fallback: None,
                pre_filter: true,
                post_filter: true,
                threshold: 0.7,
                action: PolicyAction::Redact,
                enabled: true,
                fail_closed: false,
            },
        );
        guardrails.insert(
            "toxicity".to_string(),
            GuardrailSetting {
                model: "roberta-toxicity".to_string(),
                fallback: Some("pattern".to_string()),
                pre_filter: true,
                post_filter: true,
                threshold: 0.7,
                action: PolicyAction::Block,
                enabled: true,
                fail_closed: false,
            },
        );
        guardrails.insert(
            "injection".to_string(),
            GuardrailSetting {
                model: "deberta-injection".to_string(),
                fallback: Some("pattern".to_string()),
                pre_filter: true,
                post_filter: false,
                threshold: 0.75,
                action: PolicyAction::Block,
                enabled: true,
                fail_closed: false,
            },
        );
        guardrails.insert(
            "policy".to_string(),
            GuardrailSetting {
                model: "policy-llm".to_string(),
                fallback: Some("pattern".to_string()),
                pre_filter: false,
                post_filter: true,
                threshold: 0.6,
                action: PolicyAction::Warn,
                enabled: true,
                fail_closed: false,
            },
        );
        guardrails.insert(
            "omnibus".to_string(),
            GuardrailSetting {
                model: "llama-guard".to_string(),
                fallback: None,
                pre_filter: true,
                post_filter: true,
                threshold: 0.8,
                action: PolicyAction::Block,
                enabled: false,
                fail_closed: false,
            },
        );

        Self {
            guardrails,
            traffic: TrafficConfig::default(),
            latency_budgets: BTreeMap::new(),
            qos: QosSection::default(),
            fast_fail: false,
        }
    }
}

/// Loader seam for ML-backed classifiers. The models themselves are
/// external; a provider returns a backend handle when the referenced model
/// is reachable.
pub trait BackendProvider: Send + Sync {
    /// Loads the backend for a model reference, if it is available.
    fn load(&self, kind: ClassifierKind, model_ref: &str) -> Option<Arc<dyn ClassifierBackend>>;
}

/// Provider for deployments without any external model serving; every
/// ML-backed candidate registers as unavailable and ladders fall through to
/// rule-backed implementations.
pub struct NullBackendProvider;

impl BackendProvider for NullBackendProvider {
    fn load(&self, _kind: ClassifierKind, _model_ref: &str) -> Option<Arc<dyn ClassifierBackend>> {
        None
    }
}

fn rule_backed(kind: ClassifierKind) -> Arc<dyn Classifier> {
    match kind {
        ClassifierKind::Toxicity => Arc::new(KeywordToxicityClassifier::new()),
        ClassifierKind::Pii => Arc::new(PatternPiiClassifier::new()),
        ClassifierKind::Injection => Arc::new(PatternInjectionClassifier::new()),
        ClassifierKind::Secrets => Arc::new(SecretScanClassifier::new()),
        ClassifierKind::Policy | ClassifierKind::Omnibus => Arc::new(RulePolicyClassifier::new()),
    }
}

fn build_candidate(
    kind: ClassifierKind,
    model_ref: &str,
    provider: &dyn BackendProvider,
) -> Arc<dyn Classifier> {
    match model_ref {
        "pattern" | "secret-scanner" => rule_backed(kind),
        other => match provider.load(kind, other) {
            Some(backend) => Arc::new(ModelClassifier::new(
                kind,
                &format!("{}-{}", other, kind.as_str()),
                other,
                backend,
            )),
            None => Arc::new(ModelClassifier::unavailable(
                kind,
                &format!("{}-{}", other, kind.as_str()),
                other,
            )),
        },
    }
}

/// Builds the classifier registry, policies, and budgets from a config
/// document, then assembles the gateway.
pub fn build_gateway(
    config: &GuardConfig,
    provider: &dyn BackendProvider,
    metrics: Arc<dyn MetricsSink>,
) -> SafetyGateway {
    let registry = Arc::new(ClassifierRegistry::new(metrics.clone()));
    let mut policies = Vec::new();

    // Keep the default pipeline order (redactors first), then any extra
    // configured kinds in name order.
    let mut ordered: Vec<&str> = vec!["pii", "secrets", "toxicity", "injection", "policy", "omnibus"];
    for name in config.guardrails.keys() {
        if !ordered.contains(&name.as_str()) {
            ordered.push(name.as_str());
        }
    }

    for name in ordered {
        let Some(setting) = config.guardrails.get(name) else {
            continue;
        };
        let Some(kind) = ClassifierKind::parse(name) else {
            tracing::warn!(name, "unknown guardrail kind in config, skipping");
            continue;
        };

        registry.register(build_candidate(kind, &setting.model, provider));
        if let Some(fallback) = &setting.fallback {
            registry.register(build_candidate(kind, fallback, provider));
        }

        policies.push(Policy {
            kind,
            enabled: setting.enabled,
            action: setting.action,
            threshold: setting.threshold,
            pre_filter: setting.pre_filter,
            post_filter: setting.post_filter,
            fail_closed: setting.fail_closed,
        });
    }

    let mut budgets = LatencyBudgets::new();
    for (use_case, ms) in &config.latency_budgets {
        if let Some(uc) = UseCase::parse(use_case) {
            budgets.set(uc, *ms);
        } else {
            tracing::warn!(use_case, "unknown use case in latency budgets");
        }
    }

    SafetyGateway::new(registry, policies, budgets, metrics).with_fast_fail(config.fast_fail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use accelshare_metrics::InMemorySink;

    #[test]
    fn test_default_config_covers_all_kinds() {
        let config = GuardConfig::default();
        for kind in ClassifierKind::all() {
            assert!(config.guardrails.contains_key(kind.as_str()));
        }
    }

    #[test]
    fn test_build_gateway_with_null_provider() {
        let config = GuardConfig::default();
        let gateway = build_gateway(
            &config,
            &NullBackendProvider,
            Arc::new(InMemorySink::new()),
        );
        let status = gateway.status();
        // ML primaries are unavailable, the pattern fallbacks serve.
        let toxicity = status
            .classifiers
            .iter()
            .find(|c| c.kind == ClassifierKind::Toxicity)
            .unwrap();
        assert_eq!(toxicity.candidates, 2);
        assert!(toxicity.available);
        // Secrets is rule-backed directly.
        let secrets = status
            .classifiers
            .iter()
            .find(|c| c.kind == ClassifierKind::Secrets)
            .unwrap();
        assert!(secrets.available);
    }

    #[tokio::test]
    async fn test_built_gateway_runs_pipeline() {
        use crate::gateway::RequestContext;
        use tokio_util::sync::CancellationToken;

        let gateway = build_gateway(
            &GuardConfig::default(),
            &NullBackendProvider,
            Arc::new(InMemorySink::new()),
        );
        let verdict = gateway
            .check_request(
                "contact me at jane@corp.example",
                &RequestContext {
                    tenant: "t".to_string(),
                    use_case: UseCase::Batch,
                    metadata: Default::default(),
                },
                &CancellationToken::new(),
            )
            .await;
        assert!(verdict.allowed);
        assert!(verdict.content.unwrap().contains("[EMAIL_REDACTED]"));
    }

    #[test]
    fn test_budget_override_applied() {
        let mut config = GuardConfig::default();
        config.latency_budgets.insert("chat".to_string(), 42);
        // The gateway is opaque here; the budgets type is covered in the
        // budget module. Just make sure construction accepts the override.
        let _ = build_gateway(
            &config,
            &NullBackendProvider,
            Arc::new(InMemorySink::new()),
        );
    }
}
