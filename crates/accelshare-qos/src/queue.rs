//! Priority request queue: three FIFO bands with per-band locks.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Request priority band. Strict priority across bands, FIFO within one;
/// there is no aging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QosLevel {
    Low,
    Medium,
    High,
}

impl QosLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QosLevel::Low => "low",
            QosLevel::Medium => "medium",
            QosLevel::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(QosLevel::Low),
            "medium" => Some(QosLevel::Medium),
            "high" => Some(QosLevel::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for QosLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inference request tracked from enqueue to completion or expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: String,
    pub model_id: String,
    pub partition_id: u32,
    pub priority: QosLevel,
    /// Submission time, monotonic milliseconds.
    pub submitted_at_ms: u64,
    /// Absolute deadline in monotonic milliseconds, if any.
    pub deadline_ms: Option<u64>,
    /// Minimum resource guarantee in [0, 1], if any.
    pub min_guarantee: Option<f64>,
    /// Maximum resource limit in [0, 1], if any.
    pub max_limit: Option<f64>,
}

impl Request {
    pub fn new(request_id: &str, model_id: &str, partition_id: u32, priority: QosLevel) -> Self {
        Self {
            request_id: request_id.to_string(),
            model_id: model_id.to_string(),
            partition_id,
            priority,
            submitted_at_ms: 0,
            deadline_ms: None,
            min_guarantee: None,
            max_limit: None,
        }
    }

    fn expired(&self, now_ms: u64) -> bool {
        self.deadline_ms.map(|d| now_ms > d).unwrap_or(false)
    }
}

/// Three FIFO bands. Each band has its own lock; `dequeue` takes them in
/// fixed high -> medium -> low order and releases each before moving on.
pub struct RequestQueue {
    high: Mutex<VecDeque<Request>>,
    medium: Mutex<VecDeque<Request>>,
    low: Mutex<VecDeque<Request>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            high: Mutex::new(VecDeque::new()),
            medium: Mutex::new(VecDeque::new()),
            low: Mutex::new(VecDeque::new()),
        }
    }

    fn band(&self, level: QosLevel) -> &Mutex<VecDeque<Request>> {
        match level {
            QosLevel::High => &self.high,
            QosLevel::Medium => &self.medium,
            QosLevel::Low => &self.low,
        }
    }

    pub fn enqueue(&self, request: Request) {
        self.band(request.priority)
            .lock()
            .unwrap()
            .push_back(request);
    }

    /// Pops the next request, draining expired entries on the way. Bands are
    /// visited high first, then medium, then low.
    pub fn dequeue(&self, now_ms: u64) -> Option<Request> {
        for level in [QosLevel::High, QosLevel::Medium, QosLevel::Low] {
            let mut band = self.band(level).lock().unwrap();
            while let Some(request) = band.pop_front() {
                if request.expired(now_ms) {
                    warn!(request_id = %request.request_id, "request expired in queue");
                    continue;
                }
                return Some(request);
            }
        }
        None
    }

    pub fn len(&self, level: Option<QosLevel>) -> usize {
        match level {
            Some(level) => self.band(level).lock().unwrap().len(),
            None => {
                self.high.lock().unwrap().len()
                    + self.medium.lock().unwrap().len()
                    + self.low.lock().unwrap().len()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len(None) == 0
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let q = RequestQueue::new();
        q.enqueue(Request::new("r1", "m", 0, QosLevel::Low));
        q.enqueue(Request::new("r2", "m", 0, QosLevel::Low));
        q.enqueue(Request::new("r3", "m", 0, QosLevel::High));
        q.enqueue(Request::new("r4", "m", 0, QosLevel::Medium));

        let order: Vec<String> = std::iter::from_fn(|| q.dequeue(0))
            .map(|r| r.request_id)
            .collect();
        assert_eq!(order, vec!["r3", "r4", "r1", "r2"]);
    }

    #[test]
    fn test_fifo_within_band() {
        let q = RequestQueue::new();
        for i in 0..5 {
            q.enqueue(Request::new(&format!("r{i}"), "m", 0, QosLevel::Medium));
        }
        for i in 0..5 {
            assert_eq!(q.dequeue(0).unwrap().request_id, format!("r{i}"));
        }
    }

    #[test]
    fn test_expired_requests_drained() {
        let q = RequestQueue::new();
        let mut stale = Request::new("stale", "m", 0, QosLevel::High);
        stale.deadline_ms = Some(100);
        q.enqueue(stale);
        q.enqueue(Request::new("fresh", "m", 0, QosLevel::High));

        assert_eq!(q.dequeue(200).unwrap().request_id, "fresh");
        assert!(q.is_empty());
    }

    #[test]
    fn test_deadline_not_yet_passed() {
        let q = RequestQueue::new();
        let mut r = Request::new("r", "m", 0, QosLevel::Low);
        r.deadline_ms = Some(100);
        q.enqueue(r);
        assert_eq!(q.dequeue(100).unwrap().request_id, "r");
    }
}
