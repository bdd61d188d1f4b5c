//! Pattern-based PII classifier with typed redaction.

use std::collections::BTreeMap;

use async_trait::async_trait;
use regex::Regex;

use crate::classifier::{Classifier, ClassifierKind, ClassifierResult};

/// Detects emails, phone numbers, SSNs, credit cards, and IP addresses.
/// Matches are replaced with typed placeholders such as `[EMAIL_REDACTED]`;
/// each detected entity type adds 0.4 confidence, capped at 1.0.
pub struct PatternPiiClassifier {
    patterns: Vec<(&'static str, Regex)>,
}

impl PatternPiiClassifier {
    pub fn new() -> Self {
        let patterns = vec![
            (
                "email",
                Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                    .expect("static pattern compiles"),
            ),
            (
                "ssn",
                Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("static pattern compiles"),
            ),
            (
                "credit_card",
                Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b")
                    .expect("static pattern compiles"),
            ),
            (
                "phone",
                Regex::new(r"\b\d{3}[-.]\d{3}[-.]\d{4}\b").expect("static pattern compiles"),
            ),
            (
                "ip_address",
                Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b")
                    .expect("static pattern compiles"),
            ),
        ];
        Self { patterns }
    }
}

impl Default for PatternPiiClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Classifier for PatternPiiClassifier {
    fn name(&self) -> &str {
        "pattern-pii"
    }

    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Pii
    }

    fn model_ref(&self) -> &str {
        "pattern"
    }

    async fn check(&self, content: &str, threshold: f64) -> ClassifierResult {
        if content.is_empty() {
            return ClassifierResult::pass("empty content");
        }

        let mut detected: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut redacted = content.to_string();

        // SSNs and cards are matched before the looser phone pattern so a
        // number is redacted under its most specific type.
        for (pii_type, pattern) in &self.patterns {
            let snapshot = redacted.clone();
            let matches: Vec<String> = pattern
                .find_iter(&snapshot)
                .map(|m| m.as_str().to_string())
                .collect();
            if matches.is_empty() {
                continue;
            }
            let placeholder = format!("[{}_REDACTED]", pii_type.to_uppercase());
            for m in &matches {
                redacted = redacted.replace(m.as_str(), &placeholder);
            }
            detected.insert(pii_type.to_string(), matches);
        }

        let confidence = (detected.len() as f64 * 0.4).min(1.0);
        let passed = confidence < threshold;
        let message = if detected.is_empty() {
            "no PII detected".to_string()
        } else {
            format!(
                "PII detected: {}",
                detected.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        };

        ClassifierResult {
            passed,
            confidence,
            message,
            redacted_content: if detected.is_empty() {
                None
            } else {
                Some(redacted)
            },
            details: detected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_email_and_ssn_redacted() {
        let c = PatternPiiClassifier::new();
        let result = c
            .check("my email is john.doe@example.com and ssn 123-45-6789", 0.8)
            .await;
        assert!(!result.passed);
        let redacted = result.redacted_content.unwrap();
        assert!(redacted.contains("[EMAIL_REDACTED]"));
        assert!(redacted.contains("[SSN_REDACTED]"));
        assert!(!redacted.contains("john.doe@example.com"));
        assert!(!redacted.contains("123-45-6789"));
    }

    #[tokio::test]
    async fn test_clean_content() {
        let c = PatternPiiClassifier::new();
        let result = c.check("nothing sensitive here", 0.8).await;
        assert!(result.passed);
        assert!(result.redacted_content.is_none());
    }

    #[tokio::test]
    async fn test_single_entity_below_default_threshold() {
        let c = PatternPiiClassifier::new();
        // One entity type scores 0.4, under the 0.8 default, but the
        // redaction is still produced for redact-action policies.
        let result = c.check("server at 10.0.0.1 is down", 0.8).await;
        assert!(result.passed);
        assert!(result
            .redacted_content
            .unwrap()
            .contains("[IP_ADDRESS_REDACTED]"));
    }

    #[tokio::test]
    async fn test_credit_card_detected() {
        let c = PatternPiiClassifier::new();
        let result = c.check("card 4111 1111 1111 1111 please", 0.3).await;
        assert!(!result.passed);
        assert!(result.details.contains_key("credit_card"));
    }
}
