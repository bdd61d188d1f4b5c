//! JSON wire types for the safety gateway surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierKind;
use crate::gateway::{PolicyOutcome, SafetyVerdict};
use crate::policy::PolicyAction;

/// Body of `check/request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequestBody {
    /// Prompt to check.
    pub prompt: String,
    /// End-user identifier.
    pub user: String,
    /// API key; when present it becomes the rate-limit identity.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request context length in tokens.
    #[serde(default)]
    pub context_length: u32,
    /// Upload size in megabytes.
    #[serde(default, rename = "uploadSizeMB")]
    pub upload_size_mb: f64,
    /// Geo code of the caller.
    #[serde(default)]
    pub geo: Option<String>,
    /// Latency profile name.
    pub use_case: String,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Body of `check/response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponseBody {
    /// Model response to check.
    pub response: String,
    /// Prompt that produced the response.
    #[serde(default)]
    pub original_prompt: Option<String>,
    /// Latency profile name, when the caller tracks one.
    #[serde(default)]
    pub use_case: Option<String>,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// One classifier entry in a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResult {
    /// Classifier kind.
    #[serde(rename = "type")]
    pub kind: ClassifierKind,
    /// Whether the content passed.
    pub passed: bool,
    /// Action the policy applies.
    pub action: PolicyAction,
    /// Detection confidence.
    pub confidence: f64,
    /// Explanation.
    pub message: String,
    /// Per-entity detail map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Vec<String>>,
    /// Rewritten content, when the classifier redacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted_content: Option<String>,
}

impl From<PolicyOutcome> for WireResult {
    fn from(outcome: PolicyOutcome) -> Self {
        Self {
            kind: outcome.kind,
            passed: outcome.passed,
            action: outcome.action,
            confidence: outcome.confidence,
            message: outcome.message,
            details: outcome.details,
            redacted_content: outcome.redacted_content,
        }
    }
}

/// Successful check reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReply {
    /// Overall allow/deny.
    pub allowed: bool,
    /// Every classifier invoked.
    pub results: Vec<WireResult>,
    /// Final rewritten content, when a redact action fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Warnings from warn/allow policies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Whether the pipeline stopped early on budget or cancellation.
    pub budget_exceeded: bool,
}

impl From<SafetyVerdict> for CheckReply {
    fn from(verdict: SafetyVerdict) -> Self {
        Self {
            allowed: verdict.allowed,
            results: verdict.results.into_iter().map(WireResult::from).collect(),
            content: verdict.content,
            warnings: verdict.warnings,
            budget_exceeded: verdict.budget_exceeded,
        }
    }
}

/// Error reply, used for traffic denials and bad input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Machine-readable reason code.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_parses_spec_fields() {
        let body: CheckRequestBody = serde_json::from_value(serde_json::json!({
            "prompt": "hello",
            "user": "u1",
            "apiKey": "key-1",
            "contextLength": 2048,
            "uploadSizeMB": 1.5,
            "geo": "US",
            "useCase": "chat",
            "metadata": {"trace": "abc"}
        }))
        .unwrap();
        assert_eq!(body.user, "u1");
        assert_eq!(body.api_key.as_deref(), Some("key-1"));
        assert_eq!(body.context_length, 2048);
        assert_eq!(body.use_case, "chat");
    }

    #[test]
    fn test_result_uses_type_key() {
        let result = WireResult {
            kind: ClassifierKind::Pii,
            passed: false,
            action: PolicyAction::Redact,
            confidence: 0.8,
            message: "PII detected".to_string(),
            details: BTreeMap::new(),
            redacted_content: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["type"], "pii");
        assert_eq!(value["action"], "redact");
    }
}
