//! Non-ML traffic guardrails: sliding-window rate limits, size caps, and
//! access gates.
//!
//! Window math runs on caller-supplied monotonic milliseconds (the HTTP
//! shell samples the clock once per request); wall time only enters through
//! the business-hours gate's local hour.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Request-count caps per window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1000,
            per_day: 10000,
        }
    }
}

/// Size caps on a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextLimits {
    pub max_context_length: u32,
    pub max_upload_mb: f64,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_context_length: 8192,
            max_upload_mb: 10.0,
        }
    }
}

/// Geography and time-of-day gates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Allowed geo codes; empty means no geo restriction.
    pub allowed_geos: Vec<String>,
    pub business_hours_only: bool,
    /// Local hour the gate opens (inclusive).
    pub hours_start: u8,
    /// Local hour the gate closes (exclusive).
    pub hours_end: u8,
}

/// Traffic limiter configuration, one section per concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficConfig {
    pub rate: RateLimits,
    pub context: ContextLimits,
    pub access: AccessPolicy,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            rate: RateLimits::default(),
            context: ContextLimits::default(),
            access: AccessPolicy {
                allowed_geos: Vec::new(),
                business_hours_only: false,
                hours_start: 9,
                hours_end: 17,
            },
        }
    }
}

/// Why a request was denied at the traffic layer.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum DenyReason {
    #[error("identity is blocked")]
    Blocked,
    #[error("context length {length} exceeds limit {max}")]
    ContextTooLarge { length: u32, max: u32 },
    #[error("upload size {size_mb}MB exceeds limit {max_mb}MB")]
    UploadTooLarge { size_mb: f64, max_mb: f64 },
    #[error("access not allowed from {geo}")]
    GeoDenied { geo: String },
    #[error("access only allowed during business hours")]
    OutsideHours { hour: u8 },
    #[error("rate limit exceeded: {limit} requests per {window}")]
    RateExceeded { window: String, limit: u32 },
}

impl DenyReason {
    /// Short machine-readable code for the wire surface.
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::Blocked => "blocked",
            DenyReason::ContextTooLarge { .. } => "context",
            DenyReason::UploadTooLarge { .. } => "upload",
            DenyReason::GeoDenied { .. } => "geo",
            DenyReason::OutsideHours { .. } => "hours",
            DenyReason::RateExceeded { .. } => "rate",
        }
    }
}

/// Per-identity usage snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityStats {
    pub requests_last_minute: usize,
    pub requests_last_hour: usize,
    pub requests_last_day: usize,
    pub blocked: bool,
}

#[derive(Default)]
struct IdentityWindows {
    minute: VecDeque<u64>,
    hour: VecDeque<u64>,
    day: VecDeque<u64>,
}

impl IdentityWindows {
    fn purge(&mut self, now_ms: u64) {
        purge_ring(&mut self.minute, now_ms, MINUTE_MS);
        purge_ring(&mut self.hour, now_ms, HOUR_MS);
        purge_ring(&mut self.day, now_ms, DAY_MS);
    }

    fn record(&mut self, now_ms: u64) {
        self.minute.push_back(now_ms);
        self.hour.push_back(now_ms);
        self.day.push_back(now_ms);
    }
}

fn purge_ring(ring: &mut VecDeque<u64>, now_ms: u64, horizon_ms: u64) {
    while let Some(front) = ring.front() {
        if now_ms.saturating_sub(*front) >= horizon_ms {
            ring.pop_front();
        } else {
            break;
        }
    }
}

/// Sliding-window request counters per identity, plus context/size caps and
/// geo/time gates.
pub struct TrafficLimiter {
    config: TrafficConfig,
    identities: DashMap<String, Mutex<IdentityWindows>>,
    blocked: RwLock<HashSet<String>>,
}

impl TrafficLimiter {
    pub fn new(config: TrafficConfig) -> Self {
        Self {
            config,
            identities: DashMap::new(),
            blocked: RwLock::new(HashSet::new()),
        }
    }

    /// Checks a request. Gate order: block list, context size, upload size,
    /// geo, business hours, then the three rate windows; an allowed request
    /// is recorded in all windows.
    pub fn check_at(
        &self,
        identity: &str,
        context_length: u32,
        upload_mb: f64,
        geo: Option<&str>,
        now_ms: u64,
        local_hour: u8,
    ) -> Result<(), DenyReason> {
        if self.blocked.read().contains(identity) {
            return Err(DenyReason::Blocked);
        }

        if context_length > self.config.context.max_context_length {
            return Err(DenyReason::ContextTooLarge {
                length: context_length,
                max: self.config.context.max_context_length,
            });
        }

        if upload_mb > self.config.context.max_upload_mb {
            return Err(DenyReason::UploadTooLarge {
                size_mb: upload_mb,
                max_mb: self.config.context.max_upload_mb,
            });
        }

        if !self.config.access.allowed_geos.is_empty() {
            if let Some(geo) = geo {
                if !self
                    .config
                    .access
                    .allowed_geos
                    .iter()
                    .any(|g| g.eq_ignore_ascii_case(geo))
                {
                    return Err(DenyReason::GeoDenied {
                        geo: geo.to_string(),
                    });
                }
            }
        }

        if self.config.access.business_hours_only {
            let (start, end) = (self.config.access.hours_start, self.config.access.hours_end);
            if !(start..end).contains(&local_hour) {
                return Err(DenyReason::OutsideHours { hour: local_hour });
            }
        }

        let entry = self
            .identities
            .entry(identity.to_string())
            .or_insert_with(|| Mutex::new(IdentityWindows::default()));
        let mut windows = entry.lock().unwrap();
        windows.purge(now_ms);

        if windows.minute.len() >= self.config.rate.per_minute as usize {
            warn!(identity, "per-minute rate limit hit");
            return Err(DenyReason::RateExceeded {
                window: "minute".to_string(),
                limit: self.config.rate.per_minute,
            });
        }
        if windows.hour.len() >= self.config.rate.per_hour as usize {
            return Err(DenyReason::RateExceeded {
                window: "hour".to_string(),
                limit: self.config.rate.per_hour,
            });
        }
        if windows.day.len() >= self.config.rate.per_day as usize {
            return Err(DenyReason::RateExceeded {
                window: "day".to_string(),
                limit: self.config.rate.per_day,
            });
        }

        windows.record(now_ms);
        Ok(())
    }

    /// Adds an identity to the blocked set.
    pub fn block(&self, identity: &str) {
        warn!(identity, "identity blocked");
        self.blocked.write().insert(identity.to_string());
    }

    /// Removes an identity from the blocked set.
    pub fn unblock(&self, identity: &str) {
        info!(identity, "identity unblocked");
        self.blocked.write().remove(identity);
    }

    /// Usage snapshot for one identity.
    pub fn stats(&self, identity: &str, now_ms: u64) -> IdentityStats {
        let blocked = self.blocked.read().contains(identity);
        match self.identities.get(identity) {
            Some(entry) => {
                let mut windows = entry.lock().unwrap();
                windows.purge(now_ms);
                IdentityStats {
                    requests_last_minute: windows.minute.len(),
                    requests_last_hour: windows.hour.len(),
                    requests_last_day: windows.day.len(),
                    blocked,
                }
            }
            None => IdentityStats {
                requests_last_minute: 0,
                requests_last_hour: 0,
                requests_last_day: 0,
                blocked,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> TrafficLimiter {
        TrafficLimiter::new(TrafficConfig::default())
    }

    #[test]
    fn test_rate_limit_61st_in_59s_denied() {
        let l = limiter();
        for i in 0..60u64 {
            l.check_at("u1", 100, 0.0, None, i * 983, 12).unwrap();
        }
        let err = l.check_at("u1", 100, 0.0, None, 59_000, 12).unwrap_err();
        assert!(matches!(err, DenyReason::RateExceeded { .. }));
        assert_eq!(err.code(), "rate");

        // One minute past the first request, a slot frees up.
        assert!(l.check_at("u1", 100, 0.0, None, 60_001, 12).is_ok());
    }

    #[test]
    fn test_context_too_large() {
        let l = limiter();
        let err = l.check_at("u1", 9000, 0.0, None, 0, 12).unwrap_err();
        assert!(matches!(err, DenyReason::ContextTooLarge { .. }));
    }

    #[test]
    fn test_upload_too_large() {
        let l = limiter();
        let err = l.check_at("u1", 100, 25.0, None, 0, 12).unwrap_err();
        assert!(matches!(err, DenyReason::UploadTooLarge { .. }));
    }

    #[test]
    fn test_geo_gate() {
        let mut config = TrafficConfig::default();
        config.access.allowed_geos = vec!["US".to_string(), "EU".to_string()];
        let l = TrafficLimiter::new(config);
        assert!(l.check_at("u1", 100, 0.0, Some("us"), 0, 12).is_ok());
        let err = l.check_at("u1", 100, 0.0, Some("CN"), 0, 12).unwrap_err();
        assert!(matches!(err, DenyReason::GeoDenied { .. }));
        // Requests without a geo are not gated.
        assert!(l.check_at("u1", 100, 0.0, None, 0, 12).is_ok());
    }

    #[test]
    fn test_business_hours_gate() {
        let mut config = TrafficConfig::default();
        config.access.business_hours_only = true;
        let l = TrafficLimiter::new(config);
        assert!(l.check_at("u1", 100, 0.0, None, 0, 9).is_ok());
        assert!(l.check_at("u1", 100, 0.0, None, 0, 16).is_ok());
        let err = l.check_at("u1", 100, 0.0, None, 0, 17).unwrap_err();
        assert!(matches!(err, DenyReason::OutsideHours { hour: 17 }));
        assert!(l.check_at("u1", 100, 0.0, None, 0, 3).is_err());
    }

    #[test]
    fn test_block_and_unblock() {
        let l = limiter();
        l.block("u1");
        assert!(matches!(
            l.check_at("u1", 100, 0.0, None, 0, 12),
            Err(DenyReason::Blocked)
        ));
        l.unblock("u1");
        assert!(l.check_at("u1", 100, 0.0, None, 0, 12).is_ok());
    }

    #[test]
    fn test_identities_are_independent() {
        let l = TrafficLimiter::new(TrafficConfig {
            rate: RateLimits {
                per_minute: 1,
                ..RateLimits::default()
            },
            ..TrafficConfig::default()
        });
        assert!(l.check_at("u1", 100, 0.0, None, 0, 12).is_ok());
        assert!(l.check_at("u1", 100, 0.0, None, 1, 12).is_err());
        assert!(l.check_at("u2", 100, 0.0, None, 1, 12).is_ok());
    }

    #[test]
    fn test_stats_snapshot() {
        let l = limiter();
        for i in 0..3u64 {
            l.check_at("u1", 100, 0.0, None, i * 10, 12).unwrap();
        }
        let stats = l.stats("u1", 30);
        assert_eq!(stats.requests_last_minute, 3);
        assert_eq!(stats.requests_last_day, 3);
        assert!(!stats.blocked);

        // An hour later the minute ring is empty, the day ring is not.
        let stats = l.stats("u1", HOUR_MS + 30);
        assert_eq!(stats.requests_last_minute, 0);
        assert_eq!(stats.requests_last_day, 3);
    }

    #[test]
    fn test_denied_requests_not_recorded() {
        let l = TrafficLimiter::new(TrafficConfig {
            rate: RateLimits {
                per_minute: 2,
                ..RateLimits::default()
            },
            ..TrafficConfig::default()
        });
        l.check_at("u1", 100, 0.0, None, 0, 12).unwrap();
        l.check_at("u1", 100, 0.0, None, 1, 12).unwrap();
        assert!(l.check_at("u1", 100, 0.0, None, 2, 12).is_err());
        // The denial did not consume a slot.
        assert_eq!(l.stats("u1", 3).requests_last_minute, 2);
    }
}
