//! Permit Gate (SPEC_FULL.md §4.6): the single atomic admission decision
//! composing the Circuit Breaker Registry, Backpressure Controller, and
//! Execution Budget into one `Permit` or `Rejection`.

use std::collections::HashMap;

use agent_common::{
    CircuitState, Id, Job, Permit, Rejection, RejectionReason, TokensGranted,
};
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::backpressure::{BackpressureController, BackpressureResponse};
use crate::breaker::CircuitBreakerRegistry;
use crate::budget::{BudgetDenial, ExecutionBudget, ExecutionBudgetConfig};

/// Default deadline applied when a job carries no timeout of its own.
const DEFAULT_GLOBAL_DEADLINE_MS: i64 = 10 * 60 * 1000;

struct ActivePermit {
    job_id: Id,
    worker_kind: String,
    cancellation: CancellationToken,
}

/// Tracks one live permit per `jobId` and enforces `DUPLICATE_PERMIT`
/// (§4.6's invariant).
pub struct PermitGate {
    breaker: CircuitBreakerRegistry,
    backpressure: BackpressureController,
    budget: ExecutionBudget,
    active: Mutex<HashMap<String, ActivePermit>>,
}

impl PermitGate {
    pub fn new(
        breaker: CircuitBreakerRegistry,
        backpressure: BackpressureController,
        budget_config: ExecutionBudgetConfig,
    ) -> Self {
        Self {
            breaker,
            backpressure,
            budget: ExecutionBudget::new(budget_config),
            active: Mutex::new(HashMap::new()),
        }
    }

    fn worker_kind(job: &Job) -> String {
        job.payload
            .get("workerKind")
            .and_then(|v| v.as_str())
            .unwrap_or("default")
            .to_string()
    }

    pub async fn request_permit(
        &self,
        job: &Job,
        attempt_index: u32,
    ) -> Result<(Permit, CancellationToken), Rejection> {
        {
            let active = self.active.lock().await;
            if active.contains_key(job.job_id.as_str()) {
                return Err(Rejection::new(RejectionReason::DuplicatePermit));
            }
        }

        let worker_kind = Self::worker_kind(job);

        if self.breaker.admit(&worker_kind).await == CircuitState::Open {
            return Err(Rejection::new(RejectionReason::CircuitOpen));
        }

        let active_permits = self.active.lock().await.len() as u64;
        match self.backpressure.evaluate(active_permits) {
            BackpressureResponse::Reject => {
                return Err(Rejection::new(RejectionReason::GlobalShed))
            }
            BackpressureResponse::Defer => return Err(Rejection::new(RejectionReason::Deferred)),
            BackpressureResponse::Degrade | BackpressureResponse::Accept => {}
        }

        if let Err(denial) = self.budget.try_acquire(None).await {
            let reason = match denial {
                BudgetDenial::ConcurrencyLimit => RejectionReason::ConcurrencyLimit,
                BudgetDenial::RateLimit => RejectionReason::RateLimit,
                BudgetDenial::BudgetExhausted => RejectionReason::BudgetExhausted,
            };
            return Err(Rejection::new(reason));
        }

        let deadline_ms = job
            .limits
            .timeout_ms
            .min(DEFAULT_GLOBAL_DEADLINE_MS as u64) as i64;
        let deadline_at = Utc::now() + chrono::Duration::milliseconds(deadline_ms);

        let permit = Permit {
            permit_id: Id::new(),
            job_id: job.job_id.clone(),
            deadline_at,
            attempt_index,
            tokens_granted: TokensGranted {
                concurrency: 1,
                rps: 1,
                cost_budget: None,
            },
            circuit_state_snapshot: self.breaker.snapshot().await,
            workspace_lock_token: None,
        };

        let cancellation = CancellationToken::new();
        self.active.lock().await.insert(
            job.job_id.as_str().to_string(),
            ActivePermit {
                job_id: job.job_id.clone(),
                worker_kind,
                cancellation: cancellation.clone(),
            },
        );

        Ok((permit, cancellation))
    }

    /// Fires the cancellation handle, releases budget, and records a breaker
    /// failure observation.
    pub async fn revoke_permit(&self, job_id: &Id) {
        if let Some(entry) = self.active.lock().await.remove(job_id.as_str()) {
            tracing::debug!(job_id = %entry.job_id, worker_kind = %entry.worker_kind, "permit revoked");
            entry.cancellation.cancel();
            self.budget.release();
            self.breaker.record_failure(&entry.worker_kind).await;
        }
    }

    pub async fn complete_permit(&self, job_id: &Id, succeeded: bool) {
        if let Some(entry) = self.active.lock().await.remove(job_id.as_str()) {
            self.budget.release();
            if succeeded {
                self.breaker.record_success(&entry.worker_kind).await;
            } else {
                self.breaker.record_failure(&entry.worker_kind).await;
            }
        }
    }

    pub async fn active_permit_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Revokes every live permit, e.g. on Core shutdown.
    pub async fn dispose(&self) {
        let mut active = self.active.lock().await;
        for (_, entry) in active.drain() {
            entry.cancellation.cancel();
            self.budget.release();
        }
    }

    /// Feeds `report_queue_metrics` (§4.8) into the Backpressure Controller;
    /// `oldest_job_age_ms` stands in for the avg-latency signal §4.5 wants,
    /// since the Scheduler reports age rather than a rolling latency.
    pub fn report_queue_metrics(&self, queue_depth: u64, oldest_job_age_ms: u64) {
        self.backpressure.report(queue_depth, oldest_job_age_ms);
    }
}
