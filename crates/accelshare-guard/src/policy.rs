//! Per-classifier policy: action, threshold, direction flags.

use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierKind;

/// Action applied when a classifier fails content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    /// Allow regardless; failures only annotate the verdict.
    Allow,
    /// Deny the overall verdict on failure.
    Block,
    /// Never deny; mark the verdict with a warning.
    Warn,
    /// Rewrite content with the classifier's redacted output.
    Redact,
}

impl std::fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyAction::Allow => f.write_str("allow"),
            PolicyAction::Block => f.write_str("block"),
            PolicyAction::Warn => f.write_str("warn"),
            PolicyAction::Redact => f.write_str("redact"),
        }
    }
}

/// Policy tuple applied to a request/response direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Classifier kind the policy governs.
    pub kind: ClassifierKind,
    /// Whether the policy participates at all.
    pub enabled: bool,
    /// Action on failure.
    pub action: PolicyAction,
    /// Confidence threshold in [0, 1].
    pub threshold: f64,
    /// Run on requests (pre-filter).
    pub pre_filter: bool,
    /// Run on responses (post-filter).
    pub post_filter: bool,
    /// Deny instead of allowing open when the classifier is unavailable.
    pub fail_closed: bool,
}

impl Policy {
    /// Policy with the common defaults for a kind.
    pub fn new(kind: ClassifierKind, action: PolicyAction, threshold: f64) -> Self {
        Self {
            kind,
            enabled: true,
            action,
            threshold,
            pre_filter: true,
            post_filter: true,
            fail_closed: false,
        }
    }

    /// The default policy set: PII and secrets redact, toxicity and
    /// injection block, policy compliance warns on responses only, and the
    /// omnibus judge is configured but disabled. Redacting policies run
    /// first so downstream classifiers see sanitized content.
    pub fn defaults() -> Vec<Policy> {
        vec![
            Policy::new(ClassifierKind::Pii, PolicyAction::Redact, 0.8),
            Policy::new(ClassifierKind::Secrets, PolicyAction::Redact, 0.7),
            Policy::new(ClassifierKind::Toxicity, PolicyAction::Block, 0.7),
            Policy {
                // Injection only matters on the way in.
                post_filter: false,
                ..Policy::new(ClassifierKind::Injection, PolicyAction::Block, 0.75)
            },
            Policy {
                // Compliance is judged on what the model said.
                pre_filter: false,
                ..Policy::new(ClassifierKind::Policy, PolicyAction::Warn, 0.6)
            },
            Policy {
                enabled: false,
                ..Policy::new(ClassifierKind::Omnibus, PolicyAction::Block, 0.8)
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_kind() {
        let policies = Policy::defaults();
        for kind in ClassifierKind::all() {
            assert!(policies.iter().any(|p| p.kind == kind));
        }
    }

    #[test]
    fn test_policy_compliance_is_response_only() {
        let policies = Policy::defaults();
        let policy = policies
            .iter()
            .find(|p| p.kind == ClassifierKind::Policy)
            .unwrap();
        assert!(!policy.pre_filter);
        assert!(policy.post_filter);
    }

    #[test]
    fn test_action_serde_names() {
        assert_eq!(
            serde_json::to_string(&PolicyAction::Redact).unwrap(),
            "\"redact\""
        );
    }
}
