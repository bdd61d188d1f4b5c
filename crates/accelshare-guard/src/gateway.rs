//! The safety gateway: orchestrates the classifier pipeline under a
//! per-use-case latency budget.
//!
//! Both entry points run the same pipeline: select policies for the
//! direction, let the budget oracle drop classifiers that cannot fit, then
//! invoke the survivors in configured order, applying each policy's action.
//! Redacted output flows into the next classifier. The pipeline stops early
//! on cancellation or when the hard budget is spent, and says so in the
//! verdict.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use accelshare_metrics::{LabelSet, MetricsSink};

use crate::budget::{latency_estimate_ms, LatencyBudgets, UseCase};
use crate::classifier::ClassifierKind;
use crate::error::{GuardError, GuardResult};
use crate::policy::{Policy, PolicyAction};
use crate::registry::ClassifierRegistry;

/// Which side of the model call is being filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    /// Metrics label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

/// Caller context for a request-side check.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Tenant the request belongs to.
    pub tenant: String,
    /// Latency profile for the budget oracle.
    pub use_case: UseCase,
    /// Opaque metadata, recorded but not interpreted.
    pub metadata: BTreeMap<String, String>,
}

/// Caller context for a response-side check.
#[derive(Debug, Clone, Default)]
pub struct ResponseContext {
    /// Tenant the response belongs to.
    pub tenant: String,
    /// Prompt that produced the response, for context-aware classifiers.
    pub original_prompt: Option<String>,
    /// Latency profile; responses without one run unbudgeted.
    pub use_case: Option<UseCase>,
    /// Opaque metadata.
    pub metadata: BTreeMap<String, String>,
}

/// Outcome of one policy's classifier invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyOutcome {
    /// Classifier kind.
    pub kind: ClassifierKind,
    /// Implementation that answered.
    pub classifier: String,
    /// Action the policy applies.
    pub action: PolicyAction,
    /// Whether the content passed.
    pub passed: bool,
    /// Detection confidence.
    pub confidence: f64,
    /// Explanation.
    pub message: String,
    /// Per-entity detail map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Vec<String>>,
    /// Rewritten content this classifier produced, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted_content: Option<String>,
}

/// Overall verdict for one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyVerdict {
    /// Whether the content may proceed.
    pub allowed: bool,
    /// Every classifier invoked, in pipeline order.
    pub results: Vec<PolicyOutcome>,
    /// Final rewritten content, present when any redact action fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Warnings accumulated by warn/allow policies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Set when the pipeline stopped early on budget or cancellation.
    pub budget_exceeded: bool,
}

/// Status snapshot for the management surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatus {
    /// Configured policies.
    pub policies: Vec<Policy>,
    /// Per-kind candidate counts and availability.
    pub classifiers: Vec<ClassifierStatus>,
}

/// Availability of one classifier kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierStatus {
    /// The kind.
    pub kind: ClassifierKind,
    /// Registered candidates.
    pub candidates: usize,
    /// Whether any candidate can answer.
    pub available: bool,
}

/// Orchestrates pre- and post-filter pipelines.
pub struct SafetyGateway {
    registry: Arc<ClassifierRegistry>,
    policies: RwLock<Vec<Policy>>,
    budgets: LatencyBudgets,
    metrics: Arc<dyn MetricsSink>,
    fast_fail: bool,
}

impl SafetyGateway {
    /// Gateway over a registry with the given policies and budgets.
    pub fn new(
        registry: Arc<ClassifierRegistry>,
        policies: Vec<Policy>,
        budgets: LatencyBudgets,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            registry,
            policies: RwLock::new(policies),
            budgets,
            metrics,
            fast_fail: false,
        }
    }

    /// Stop the pipeline at the first blocking failure instead of running
    /// the remaining classifiers for a full findings list.
    pub fn with_fast_fail(mut self, fast_fail: bool) -> Self {
        self.fast_fail = fast_fail;
        self
    }

    /// Checks a request before it reaches the model.
    pub async fn check_request(
        &self,
        content: &str,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> SafetyVerdict {
        debug!(tenant = %ctx.tenant, use_case = %ctx.use_case, "request check");
        self.run_pipeline(content, Direction::Request, Some(ctx.use_case), cancel)
            .await
    }

    /// Checks a model response before it leaves.
    pub async fn check_response(
        &self,
        content: &str,
        ctx: &ResponseContext,
        cancel: &CancellationToken,
    ) -> SafetyVerdict {
        debug!(tenant = %ctx.tenant, "response check");
        self.run_pipeline(content, Direction::Response, ctx.use_case, cancel)
            .await
    }

    /// Updates one policy in place.
    pub fn update_policy(
        &self,
        kind: ClassifierKind,
        enabled: Option<bool>,
        action: Option<PolicyAction>,
        threshold: Option<f64>,
    ) -> GuardResult<()> {
        let mut policies = self.policies.write();
        let policy = policies
            .iter_mut()
            .find(|p| p.kind == kind)
            .ok_or_else(|| GuardError::NoPolicy {
                kind: kind.to_string(),
            })?;
        if let Some(enabled) = enabled {
            policy.enabled = enabled;
        }
        if let Some(action) = action {
            policy.action = action;
        }
        if let Some(threshold) = threshold {
            policy.threshold = threshold;
        }
        Ok(())
    }

    /// Policy and availability snapshot.
    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            policies: self.policies.read().clone(),
            classifiers: self
                .registry
                .summary()
                .into_iter()
                .map(|(kind, candidates, available)| ClassifierStatus {
                    kind,
                    candidates,
                    available,
                })
                .collect(),
        }
    }

    async fn run_pipeline(
        &self,
        content: &str,
        direction: Direction,
        use_case: Option<UseCase>,
        cancel: &CancellationToken,
    ) -> SafetyVerdict {
        let start = Instant::now();
        let budget_ms = use_case.map(|uc| self.budgets.budget_ms(uc));

        let active: Vec<Policy> = self
            .policies
            .read()
            .iter()
            .filter(|p| {
                p.enabled
                    && match direction {
                        Direction::Request => p.pre_filter,
                        Direction::Response => p.post_filter,
                    }
            })
            .cloned()
            .collect();

        // Resolve each policy's classifier up front; the oracle prunes the
        // resolved set against the budget using the static estimate table.
        let mut resolved = Vec::with_capacity(active.len());
        let mut verdict = SafetyVerdict {
            allowed: true,
            results: Vec::new(),
            content: None,
            warnings: Vec::new(),
            budget_exceeded: false,
        };

        for policy in active {
            match self.registry.resolve(policy.kind) {
                Some(classifier) => resolved.push((policy, classifier)),
                None => {
                    verdict.results.push(PolicyOutcome {
                        kind: policy.kind,
                        classifier: "none".to_string(),
                        action: policy.action,
                        passed: true,
                        confidence: 0.0,
                        message: "unavailable".to_string(),
                        details: BTreeMap::new(),
                        redacted_content: None,
                    });
                    if policy.fail_closed {
                        verdict.allowed = false;
                        verdict.warnings.push(format!(
                            "{} classifier unavailable, policy is fail-closed",
                            policy.kind
                        ));
                    } else {
                        verdict
                            .warnings
                            .push(format!("{} classifier unavailable", policy.kind));
                    }
                }
            }
        }

        let selected: Vec<usize> = match use_case {
            Some(uc) => {
                let refs: Vec<&str> =
                    resolved.iter().map(|(_, c)| c.model_ref()).collect();
                self.budgets.select(uc, &refs)
            }
            None => (0..resolved.len()).collect(),
        };

        let mut current = content.to_string();

        for idx in selected {
            let (policy, classifier) = &resolved[idx];

            if cancel.is_cancelled() {
                verdict.budget_exceeded = true;
                break;
            }

            let elapsed_ms = start.elapsed().as_millis() as u64;
            if let Some(budget) = budget_ms {
                if elapsed_ms >= budget {
                    self.count_budget_exceeded(use_case);
                    verdict.budget_exceeded = true;
                    break;
                }
            }

            let estimate = latency_estimate_ms(classifier.model_ref());
            let per_check_ms = match budget_ms {
                Some(budget) => (estimate * 2).min(budget.saturating_sub(elapsed_ms).max(1)),
                None => estimate * 2,
            };

            let check_start = Instant::now();
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    verdict.budget_exceeded = true;
                    break;
                }
                result = tokio::time::timeout(
                    Duration::from_millis(per_check_ms),
                    classifier.check(&current, policy.threshold),
                ) => result,
            };
            let check_seconds = check_start.elapsed().as_secs_f64();

            self.record_check(direction, policy.kind, check_seconds);

            let result = match result {
                Ok(result) => result,
                Err(_) => {
                    warn!(kind = %policy.kind, "classifier timed out, answering open");
                    crate::classifier::ClassifierResult {
                        passed: true,
                        confidence: 0.0,
                        message: "timed out".to_string(),
                        details: BTreeMap::new(),
                        redacted_content: None,
                    }
                }
            };

            let mut outcome = PolicyOutcome {
                kind: policy.kind,
                classifier: classifier.name().to_string(),
                action: policy.action,
                passed: result.passed,
                confidence: result.confidence,
                message: result.message,
                details: result.details,
                redacted_content: result.redacted_content.clone(),
            };

            match policy.action {
                PolicyAction::Redact => {
                    // Redacted output feeds every later classifier.
                    if let Some(redacted) = result.redacted_content {
                        current = redacted;
                        verdict.content = Some(current.clone());
                    }
                }
                PolicyAction::Block => {
                    if !result.passed {
                        self.count_blocked(direction, policy.kind);
                        verdict.allowed = false;
                        if self.fast_fail {
                            verdict.results.push(outcome);
                            break;
                        }
                    }
                }
                PolicyAction::Warn => {
                    if !result.passed {
                        verdict
                            .warnings
                            .push(format!("{}: {}", policy.kind, outcome.message));
                    }
                }
                PolicyAction::Allow => {
                    if !result.passed {
                        verdict
                            .warnings
                            .push(format!("{} flagged but allowed", policy.kind));
                        outcome.passed = true;
                    }
                }
            }

            verdict.results.push(outcome);
        }

        if let Some(uc) = use_case {
            self.metrics
                .histogram(
                    "guardrail_by_usecase_seconds",
                    &LabelSet::new(&[("useCase", uc.as_str())]),
                )
                .observe(start.elapsed().as_secs_f64());
        }

        verdict
    }

    fn record_check(&self, direction: Direction, kind: ClassifierKind, seconds: f64) {
        let labels = LabelSet::new(&[("direction", direction.as_str()), ("kind", kind.as_str())]);
        self.metrics
            .counter("guardrail_requests_total", &labels)
            .inc();
        self.metrics
            .histogram(
                "guardrail_check_seconds",
                &LabelSet::new(&[("kind", kind.as_str())]),
            )
            .observe(seconds);
    }

    fn count_blocked(&self, direction: Direction, kind: ClassifierKind) {
        self.metrics
            .counter(
                "guardrail_requests_blocked_total",
                &LabelSet::new(&[("direction", direction.as_str()), ("kind", kind.as_str())]),
            )
            .inc();
    }

    fn count_budget_exceeded(&self, use_case: Option<UseCase>) {
        let label = use_case.map(|uc| uc.as_str()).unwrap_or("none");
        self.metrics
            .counter(
                "latency_budget_exceeded_total",
                &LabelSet::new(&[("useCase", label)]),
            )
            .inc();
    }
}
