//! Error types for the QoS subsystem.

use thiserror::Error;

/// Result type alias for QoS operations.
pub type QosResult<T> = Result<T, QosError>;

/// Error variants for QoS operations.
#[derive(Debug, Error)]
pub enum QosError {
    /// The global queue is past its saturation cap.
    #[error("Queue saturated: {depth} pending requests (cap {cap})")]
    Saturated {
        /// Pending requests across all priority bands.
        depth: usize,
        /// Configured saturation cap.
        cap: usize,
    },

    /// Low-priority throttling rejected the request.
    #[error("Low-priority request throttled while higher bands are waiting")]
    Throttled,

    /// A guarantee or limit outside [0, 1].
    #[error("Resource fraction {value} outside [0, 1]")]
    InvalidFraction {
        /// The rejected value.
        value: f64,
    },
}
