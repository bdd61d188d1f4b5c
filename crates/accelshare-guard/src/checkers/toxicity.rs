//! Keyword-based toxicity classifier.

use async_trait::async_trait;
use regex::RegexSet;

use crate::classifier::{Classifier, ClassifierKind, ClassifierResult};

const TOXIC_PATTERNS: &[&str] = &[
    r"(?i)\b(kill|murder|suicide|violence|hate|racist|sexist)\b",
    r"(?i)\b(threat|attack|destroy|hurt|abuse)\b",
    r"(?i)\b(slur|bigot|harass)\b",
];

/// Matches toxic vocabulary with word-boundary patterns. Each matched
/// pattern family adds 0.3 confidence, capped at 1.0.
pub struct KeywordToxicityClassifier {
    patterns: RegexSet,
}

impl KeywordToxicityClassifier {
    pub fn new() -> Self {
        Self {
            patterns: RegexSet::new(TOXIC_PATTERNS).expect("static patterns compile"),
        }
    }
}

impl Default for KeywordToxicityClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Classifier for KeywordToxicityClassifier {
    fn name(&self) -> &str {
        "keyword-toxicity"
    }

    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Toxicity
    }

    fn model_ref(&self) -> &str {
        "pattern"
    }

    async fn check(&self, content: &str, threshold: f64) -> ClassifierResult {
        if content.is_empty() {
            return ClassifierResult::pass("empty content");
        }

        let matched: Vec<usize> = self.patterns.matches(content).into_iter().collect();
        let confidence = (matched.len() as f64 * 0.3).min(1.0);
        let passed = confidence < threshold;

        let mut result = ClassifierResult {
            passed,
            confidence,
            message: if passed {
                "content is safe".to_string()
            } else {
                format!("toxic content detected ({} pattern families)", matched.len())
            },
            details: Default::default(),
            redacted_content: None,
        };
        if !matched.is_empty() {
            result.details.insert(
                "matched_patterns".to_string(),
                matched
                    .iter()
                    .map(|i| TOXIC_PATTERNS[*i].to_string())
                    .collect(),
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clean_content_passes() {
        let c = KeywordToxicityClassifier::new();
        let result = c.check("please summarize this report", 0.7).await;
        assert!(result.passed);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_toxic_content_fails() {
        let c = KeywordToxicityClassifier::new();
        let result = c
            .check("I will attack and destroy you, I hate everyone", 0.5)
            .await;
        assert!(!result.passed);
        assert!(result.confidence >= 0.5);
        assert!(result.details.contains_key("matched_patterns"));
    }

    #[tokio::test]
    async fn test_empty_content() {
        let c = KeywordToxicityClassifier::new();
        assert!(c.check("", 0.0).await.passed);
    }
}
