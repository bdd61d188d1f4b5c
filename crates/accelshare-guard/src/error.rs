//! Error types for the guard subsystem.

use thiserror::Error;

/// Result type alias for guard operations.
pub type GuardResult<T> = Result<T, GuardError>;

/// Error variants for guard operations.
#[derive(Debug, Error)]
pub enum GuardError {
    /// A backing classifier model failed to answer.
    #[error("Classifier backend error for {model}: {reason}")]
    Backend {
        /// Backing model reference.
        model: String,
        /// Description of the failure.
        reason: String,
    },

    /// No classifier is registered for a policy's kind.
    #[error("No classifier registered for kind {kind}")]
    NoClassifier {
        /// The kind that had no candidates.
        kind: String,
    },

    /// A policy update referenced an unknown policy.
    #[error("No policy configured for kind {kind}")]
    NoPolicy {
        /// The kind that had no policy.
        kind: String,
    },

    /// An invalid pattern in a custom rule payload.
    #[error("Invalid custom rule: {reason}")]
    InvalidRule {
        /// Description of the problem.
        reason: String,
    },
}
