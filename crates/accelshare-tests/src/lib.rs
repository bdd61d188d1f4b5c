//! Accelshare integration test infrastructure.
//!
//! Cross-crate scenario tests: placement on partitioned devices, the full
//! request path (traffic limiter, QoS admission, safety gateway), and the
//! conservation invariants that must hold across subsystem boundaries.

pub mod harness;
pub mod placement_scenarios;
pub mod request_path_scenarios;
