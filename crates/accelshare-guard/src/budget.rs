//! Latency budgets per use-case and the deterministic selection oracle.
//!
//! Classifier latency estimates are fixed constants keyed by backing-model
//! reference. The oracle never measures at runtime, so the selection for a
//! given (use-case, enabled policies) pair is reproducible.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Latency profile names controlling the guardrail budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UseCase {
    /// Chat/assistant, interactive UX.
    Chat,
    /// Retrieval-augmented Q&A.
    Rag,
    /// Code generation and refactoring.
    CodeGen,
    /// Offline batch jobs, throughput oriented.
    Batch,
}

impl UseCase {
    /// Kebab-case name, matching the wire format.
    pub fn as_str(&self) -> &'static str {
        match self {
            UseCase::Chat => "chat",
            UseCase::Rag => "rag",
            UseCase::CodeGen => "code-gen",
            UseCase::Batch => "batch",
        }
    }

    /// Parses a kebab-case use-case name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(UseCase::Chat),
            "rag" => Some(UseCase::Rag),
            "code-gen" => Some(UseCase::CodeGen),
            "batch" => Some(UseCase::Batch),
            _ => None,
        }
    }

    /// Default guardrail budget in milliseconds.
    pub fn default_budget_ms(&self) -> u64 {
        match self {
            UseCase::Chat => 100,
            UseCase::Rag => 150,
            UseCase::CodeGen => 200,
            UseCase::Batch => 500,
        }
    }
}

impl std::fmt::Display for UseCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static latency estimate for a backing model, milliseconds.
pub fn latency_estimate_ms(model_ref: &str) -> u64 {
    match model_ref {
        "pattern" => 10,
        "secret-scanner" => 5,
        "roberta-toxicity" => 20,
        "detoxify" => 100,
        "xlm-toxicity" => 150,
        "presidio" => 50,
        "piiranha" => 100,
        "deberta-injection" => 30,
        "llama-guard" => 300,
        "granite-guardian" => 300,
        "policy-llm" => 500,
        _ => 100,
    }
}

/// Guardrail budgets per use case, with per-deployment overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyBudgets {
    #[serde(default)]
    overrides: HashMap<UseCase, u64>,
}

impl LatencyBudgets {
    /// Budgets using only the default table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the budget for one use case.
    pub fn set(&mut self, use_case: UseCase, guardrail_ms: u64) {
        self.overrides.insert(use_case, guardrail_ms);
    }

    /// Effective guardrail budget for a use case, milliseconds.
    pub fn budget_ms(&self, use_case: UseCase) -> u64 {
        self.overrides
            .get(&use_case)
            .copied()
            .unwrap_or_else(|| use_case.default_budget_ms())
    }

    /// Selection oracle: walks candidates in configured order, keeping each
    /// one whose estimate still fits the remaining budget. Returns the
    /// indices of selected candidates. Pure function of its inputs.
    pub fn select(&self, use_case: UseCase, candidate_model_refs: &[&str]) -> Vec<usize> {
        let budget = self.budget_ms(use_case);
        let mut spent = 0u64;
        let mut selected = Vec::new();
        for (idx, model_ref) in candidate_model_refs.iter().enumerate() {
            let estimate = latency_estimate_ms(model_ref);
            if spent + estimate <= budget {
                spent += estimate;
                selected.push(idx);
            }
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget_table() {
        assert_eq!(UseCase::Chat.default_budget_ms(), 100);
        assert_eq!(UseCase::Rag.default_budget_ms(), 150);
        assert_eq!(UseCase::CodeGen.default_budget_ms(), 200);
        assert_eq!(UseCase::Batch.default_budget_ms(), 500);
    }

    #[test]
    fn test_use_case_parse() {
        assert_eq!(UseCase::parse("code-gen"), Some(UseCase::CodeGen));
        assert_eq!(UseCase::parse("chess"), None);
    }

    #[test]
    fn test_oracle_selects_within_budget() {
        let budgets = LatencyBudgets::new();
        // roberta 20 + presidio 50 + deberta 30 = 100 fits the chat budget
        // exactly; llama-guard 300 is skipped.
        let refs = vec![
            "roberta-toxicity",
            "presidio",
            "deberta-injection",
            "llama-guard",
        ];
        let selected = budgets.select(UseCase::Chat, &refs);
        assert_eq!(selected, vec![0, 1, 2]);
    }

    #[test]
    fn test_oracle_batch_takes_everything() {
        let budgets = LatencyBudgets::new();
        let refs = vec![
            "roberta-toxicity",
            "piiranha",
            "deberta-injection",
            "llama-guard",
        ];
        let selected = budgets.select(UseCase::Batch, &refs);
        assert_eq!(selected.len(), 4);
    }

    #[test]
    fn test_oracle_keeps_later_cheap_candidate() {
        let budgets = LatencyBudgets::new();
        // llama-guard blows the remaining budget but the scanner after it
        // still fits.
        let refs = vec!["piiranha", "llama-guard", "secret-scanner"];
        let selected = budgets.select(UseCase::Chat, &refs);
        assert_eq!(selected, vec![0, 2]);
    }

    #[test]
    fn test_override_changes_budget() {
        let mut budgets = LatencyBudgets::new();
        budgets.set(UseCase::Chat, 25);
        assert_eq!(budgets.budget_ms(UseCase::Chat), 25);
        let selected = budgets.select(UseCase::Chat, &["roberta-toxicity", "presidio"]);
        assert_eq!(selected, vec![0]);
    }

    #[test]
    fn test_unknown_model_default_estimate() {
        assert_eq!(latency_estimate_ms("mystery-model"), 100);
    }
}
