//! In-process counters and the `/metrics` text exposition (spec §6).
//! Deliberately not a Prometheus-client dependency: the wire contract only
//! asks for a small fixed set of counters and per-operation duration
//! sums, which a handful of atomics cover without pulling in a registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Default)]
struct OperationMetrics {
    requests: AtomicU64,
    errors: AtomicU64,
    duration_ms_sum: AtomicU64,
}

#[derive(Default)]
pub struct Metrics {
    per_operation: RwLock<HashMap<&'static str, OperationMetrics>>,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    trigger_jobs_pending: AtomicI64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, operation: &'static str, duration_ms: u64, is_error: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }

        if !self.per_operation.read().unwrap().contains_key(operation) {
            self.per_operation.write().unwrap().entry(operation).or_default();
        }
        let guard = self.per_operation.read().unwrap();
        let entry = guard.get(operation).expect("just inserted above");
        entry.requests.fetch_add(1, Ordering::Relaxed);
        entry.duration_ms_sum.fetch_add(duration_ms, Ordering::Relaxed);
        if is_error {
            entry.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_trigger_jobs_pending(&self, count: i64) {
        self.trigger_jobs_pending.store(count, Ordering::Relaxed);
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "bridge_requests_total {}\n",
            self.total_requests.load(Ordering::Relaxed)
        ));
        out.push_str(&format!("bridge_errors_total {}\n", self.total_errors.load(Ordering::Relaxed)));
        out.push_str(&format!(
            "bridge_trigger_jobs_pending {}\n",
            self.trigger_jobs_pending.load(Ordering::Relaxed)
        ));

        let guard = self.per_operation.read().unwrap();
        let mut operations: Vec<&&'static str> = guard.keys().collect();
        operations.sort();
        for op in operations {
            let m = &guard[op];
            out.push_str(&format!(
                "bridge_operation_requests_total{{operation=\"{op}\"}} {}\n",
                m.requests.load(Ordering::Relaxed)
            ));
            out.push_str(&format!(
                "bridge_operation_errors_total{{operation=\"{op}\"}} {}\n",
                m.errors.load(Ordering::Relaxed)
            ));
            out.push_str(&format!(
                "bridge_operation_duration_ms_sum{{operation=\"{op}\"}} {}\n",
                m.duration_ms_sum.load(Ordering::Relaxed)
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_request_tallies_totals_and_per_operation_counters() {
        let metrics = Metrics::new();
        metrics.record_request("post_message", 12, false);
        metrics.record_request("post_message", 8, true);

        let rendered = metrics.render_text();
        assert!(rendered.contains("bridge_requests_total 2"));
        assert!(rendered.contains("bridge_errors_total 1"));
        assert!(rendered.contains("bridge_operation_requests_total{operation=\"post_message\"} 2"));
        assert!(rendered.contains("bridge_operation_duration_ms_sum{operation=\"post_message\"} 20"));
    }
}
