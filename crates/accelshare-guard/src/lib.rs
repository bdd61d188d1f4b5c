//! Accelshare guard subsystem: in-line safety gateway with a latency-budgeted
//! classifier pipeline, plus non-ML traffic guardrails.

pub mod budget;
pub mod checkers;
pub mod classifier;
pub mod config;
pub mod error;
pub mod gateway;
pub mod policy;
pub mod registry;
pub mod server;
pub mod traffic;
pub mod wire;

pub use budget::{LatencyBudgets, UseCase};
pub use classifier::{
    BackendScore, Classifier, ClassifierBackend, ClassifierKind, ClassifierResult, ModelClassifier,
};
pub use error::{GuardError, GuardResult};
pub use gateway::{
    Direction, PolicyOutcome, RequestContext, ResponseContext, SafetyGateway, SafetyVerdict,
};
pub use policy::{Policy, PolicyAction};
pub use registry::ClassifierRegistry;
pub use traffic::{DenyReason, IdentityStats, TrafficConfig, TrafficLimiter};
