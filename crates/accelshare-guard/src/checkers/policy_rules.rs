//! Rule-backed policy compliance classifier (response side).

use async_trait::async_trait;
use regex::RegexSet;

use crate::classifier::{Classifier, ClassifierKind, ClassifierResult};
use crate::error::{GuardError, GuardResult};

const DEFAULT_RULES: &[&str] = &[
    r"(?i)\b(medical|legal|financial)\s+advice\b",
    r"(?i)\bguaranteed\s+(returns|profit|outcome)\b",
    r"(?i)as\s+your\s+(doctor|lawyer|attorney|financial\s+advisor)",
];

/// Matches responses against organization policy rules. Rules can be
/// replaced per deployment through the custom-rule payload.
pub struct RulePolicyClassifier {
    rules: RegexSet,
    rule_sources: Vec<String>,
}

impl RulePolicyClassifier {
    /// Classifier with the built-in rule set.
    pub fn new() -> Self {
        Self {
            rules: RegexSet::new(DEFAULT_RULES).expect("static patterns compile"),
            rule_sources: DEFAULT_RULES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Classifier with caller-supplied rule patterns.
    pub fn with_rules(patterns: &[String]) -> GuardResult<Self> {
        let rules = RegexSet::new(patterns).map_err(|e| GuardError::InvalidRule {
            reason: e.to_string(),
        })?;
        Ok(Self {
            rules,
            rule_sources: patterns.to_vec(),
        })
    }
}

impl Default for RulePolicyClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Classifier for RulePolicyClassifier {
    fn name(&self) -> &str {
        "rule-policy"
    }

    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Policy
    }

    fn model_ref(&self) -> &str {
        "pattern"
    }

    async fn check(&self, content: &str, threshold: f64) -> ClassifierResult {
        if content.is_empty() {
            return ClassifierResult::pass("empty content");
        }

        let matched: Vec<usize> = self.rules.matches(content).into_iter().collect();
        let confidence = (matched.len() as f64 * 0.5).min(1.0);
        let passed = confidence < threshold;

        let mut result = ClassifierResult {
            passed,
            confidence,
            message: if passed {
                "response complies with policy".to_string()
            } else {
                format!("policy violation ({} rules matched)", matched.len())
            },
            details: Default::default(),
            redacted_content: None,
        };
        if !matched.is_empty() {
            result.details.insert(
                "matched_rules".to_string(),
                matched
                    .iter()
                    .map(|i| self.rule_sources[*i].clone())
                    .collect(),
            );
        }
        result
    }
}
