//! Backpressure Controller (SPEC_FULL.md §4.5): normalises raw load metrics
//! into `[0,1]` and maps the result to an admission response.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureResponse {
    Accept,
    Degrade,
    Defer,
    Reject,
}

#[derive(Debug, Clone, Copy)]
pub struct BackpressureConfig {
    pub max_active_permits: u64,
    pub max_queue_depth: u64,
    pub max_latency_ms: u64,
    /// Must satisfy `degrade <= defer <= reject`.
    pub degrade_threshold: f64,
    pub defer_threshold: f64,
    pub reject_threshold: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_active_permits: 100,
            max_queue_depth: 500,
            max_latency_ms: 5_000,
            degrade_threshold: 0.5,
            defer_threshold: 0.75,
            reject_threshold: 0.9,
        }
    }
}

#[derive(Debug, Default)]
struct Metrics {
    queue_depth: AtomicU64,
    avg_latency_ms: AtomicU64,
}

pub struct BackpressureController {
    config: BackpressureConfig,
    metrics: Metrics,
}

impl BackpressureController {
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            config,
            metrics: Metrics::default(),
        }
    }

    /// Ingests `report_queue_metrics` inputs (§4.8).
    pub fn report(&self, queue_depth: u64, avg_latency_ms: u64) {
        self.metrics.queue_depth.store(queue_depth, Ordering::SeqCst);
        self.metrics
            .avg_latency_ms
            .store(avg_latency_ms, Ordering::SeqCst);
    }

    fn load(&self, active_permits: u64) -> f64 {
        let permits_ratio = active_permits as f64 / self.config.max_active_permits.max(1) as f64;
        let queue_ratio = self.metrics.queue_depth.load(Ordering::SeqCst) as f64
            / self.config.max_queue_depth.max(1) as f64;
        let latency_ratio = self.metrics.avg_latency_ms.load(Ordering::SeqCst) as f64
            / self.config.max_latency_ms.max(1) as f64;
        permits_ratio.max(queue_ratio).max(latency_ratio).min(1.0)
    }

    pub fn evaluate(&self, active_permits: u64) -> BackpressureResponse {
        let load = self.load(active_permits);
        if load >= self.config.reject_threshold {
            BackpressureResponse::Reject
        } else if load >= self.config.defer_threshold {
            BackpressureResponse::Defer
        } else if load >= self.config.degrade_threshold {
            BackpressureResponse::Degrade
        } else {
            BackpressureResponse::Accept
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackpressureConfig {
        BackpressureConfig {
            max_active_permits: 10,
            max_queue_depth: 100,
            max_latency_ms: 1000,
            degrade_threshold: 0.5,
            defer_threshold: 0.75,
            reject_threshold: 0.9,
        }
    }

    #[test]
    fn accepts_under_all_thresholds() {
        let ctl = BackpressureController::new(config());
        ctl.report(10, 100);
        assert_eq!(ctl.evaluate(1), BackpressureResponse::Accept);
    }

    #[test]
    fn degrades_mid_load() {
        let ctl = BackpressureController::new(config());
        assert_eq!(ctl.evaluate(6), BackpressureResponse::Degrade);
    }

    #[test]
    fn defers_high_load() {
        let ctl = BackpressureController::new(config());
        assert_eq!(ctl.evaluate(8), BackpressureResponse::Defer);
    }

    #[test]
    fn rejects_at_global_shed_threshold() {
        // Matches §8 scenario 2: queueDepth=200/max100 drives load to 1.0.
        let ctl = BackpressureController::new(config());
        ctl.report(200, 50_000);
        assert_eq!(ctl.evaluate(0), BackpressureResponse::Reject);
    }
}
