//! Agent Core Orchestrator (SPEC_FULL.md §4.8): wires the IPC protocol's
//! handlers to the admission/gateway primitives. Owns the job map; no
//! queue/retry/dedup logic lives here (that's the Scheduler's job on the
//! other side of the wire).

use std::collections::HashMap;
use std::sync::Arc;

use agent_admission::PermitGate;
use agent_common::{ErrorClass, Id, Job, JobType, WorkerStatus};
use agent_gateway::WorkerDelegationGateway;
use agent_ipc::{EscalationEvent, EscalationSeverity, IpcProtocol, Message, Outcome};
use tokio::sync::{mpsc, Mutex};

use crate::task::worker_task_from_job;

pub struct CoreOrchestrator {
    protocol: Arc<IpcProtocol>,
    permit_gate: Arc<PermitGate>,
    gateway: Arc<WorkerDelegationGateway>,
    jobs: Mutex<HashMap<String, Job>>,
}

impl CoreOrchestrator {
    pub fn new(
        protocol: Arc<IpcProtocol>,
        permit_gate: Arc<PermitGate>,
        gateway: Arc<WorkerDelegationGateway>,
    ) -> Arc<Self> {
        Arc::new(Self {
            protocol,
            permit_gate,
            gateway,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Registers every handler named in §4.8. Call once, right after
    /// construction.
    pub async fn start(self: &Arc<Self>) {
        self.register_submit_job().await;
        self.register_cancel_job().await;
        self.register_request_permit().await;
        self.register_report_queue_metrics().await;
        self.register_heartbeat().await;
    }

    async fn register_submit_job(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.protocol
            .on("submit_job", move |msg| {
                let this = Arc::clone(&this);
                async move {
                    if let Message::SubmitJob { request_id, job } = msg {
                        let job_id = job.job_id.clone();
                        this.jobs.lock().await.insert(job_id.as_str().to_string(), job);
                        let _ = this.protocol.send(Message::Ack { request_id, job_id }).await;
                    }
                }
            })
            .await;
    }

    async fn register_cancel_job(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.protocol
            .on("cancel_job", move |msg| {
                let this = Arc::clone(&this);
                async move {
                    if let Message::CancelJob { request_id, job_id, reason } = msg {
                        this.jobs.lock().await.remove(job_id.as_str());
                        this.permit_gate.revoke_permit(&job_id).await;
                        let _ = this
                            .protocol
                            .send(Message::JobCancelled { request_id, job_id, reason })
                            .await;
                    }
                }
            })
            .await;
    }

    async fn register_request_permit(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.protocol
            .on("request_permit", move |msg| {
                let this = Arc::clone(&this);
                async move {
                    if let Message::RequestPermit { request_id, job, attempt_index } = msg {
                        this.handle_request_permit(request_id, job, attempt_index).await;
                    }
                }
            })
            .await;
    }

    async fn handle_request_permit(self: &Arc<Self>, request_id: Id, job: Job, attempt_index: u32) {
        match self.permit_gate.request_permit(&job, attempt_index).await {
            Ok((permit, cancellation)) => {
                let job_id = job.job_id.clone();
                let _ = self
                    .protocol
                    .send(Message::PermitGranted { request_id, permit })
                    .await;

                if job.job_type != JobType::WorkerTask {
                    // No adapter work to delegate; nothing else names this
                    // job kind's execution within this boundary (§1).
                    self.permit_gate.complete_permit(&job_id, true).await;
                    let _ = self
                        .protocol
                        .send(Message::JobCompleted {
                            job_id,
                            outcome: Outcome::Succeeded,
                            result: None,
                            error_class: None,
                        })
                        .await;
                    return;
                }

                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.delegate_worker_task(job, cancellation).await;
                });
            }
            Err(rejection) => {
                if rejection.reason == agent_common::RejectionReason::CircuitOpen {
                    self.send_escalation(&job).await;
                }
                let _ = self
                    .protocol
                    .send(Message::PermitRejected { request_id, rejection })
                    .await;
            }
        }
    }

    async fn delegate_worker_task(
        self: Arc<Self>,
        job: Job,
        cancellation: tokio_util::sync::CancellationToken,
    ) {
        let job_id = job.job_id.clone();
        let task = match worker_task_from_job(&job) {
            Ok(task) => task,
            Err(msg) => {
                tracing::warn!(job_id = %job_id, error = %msg, "worker task payload rejected");
                self.permit_gate.complete_permit(&job_id, false).await;
                let _ = self
                    .protocol
                    .send(Message::JobCompleted {
                        job_id,
                        outcome: Outcome::Failed,
                        result: None,
                        error_class: Some(ErrorClass::NonRetryable),
                    })
                    .await;
                return;
            }
        };

        // Worker events (stdout/stderr/progress/patch) are the throttle's
        // concern and stay local; only completion crosses the IPC boundary.
        let (events_tx, mut events_rx) = mpsc::channel(256);
        let drain = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                tracing::debug!(?event, "worker event");
            }
        });

        let result = self.gateway.delegate_task(task, cancellation, events_tx).await;
        drop(drain);

        let succeeded = result.status == WorkerStatus::Succeeded;
        self.permit_gate.complete_permit(&job_id, succeeded).await;

        let outcome = match result.status {
            WorkerStatus::Succeeded => Outcome::Succeeded,
            WorkerStatus::Failed => Outcome::Failed,
            WorkerStatus::Cancelled => Outcome::Cancelled,
        };
        let _ = self
            .protocol
            .send(Message::JobCompleted {
                job_id,
                outcome,
                result: serde_json::to_value(&result).ok(),
                error_class: result.error_class,
            })
            .await;
    }

    async fn register_report_queue_metrics(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.protocol
            .on("report_queue_metrics", move |msg| {
                let this = Arc::clone(&this);
                async move {
                    if let Message::ReportQueueMetrics {
                        request_id: _,
                        queue_depth,
                        oldest_job_age_ms,
                        backlog_count: _,
                    } = msg
                    {
                        this.permit_gate.report_queue_metrics(queue_depth, oldest_job_age_ms);
                    }
                }
            })
            .await;
    }

    async fn register_heartbeat(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.protocol
            .on("heartbeat", move |msg| {
                let this = Arc::clone(&this);
                async move {
                    if let Message::Heartbeat { timestamp } = msg {
                        let _ = this.protocol.send(Message::HeartbeatAck { timestamp }).await;
                    }
                }
            })
            .await;
    }

    async fn send_escalation(&self, job: &Job) {
        let event = EscalationEvent {
            scope: "circuit_breaker".to_string(),
            action: "reject".to_string(),
            target: job.job_id.as_str().to_string(),
            reason: "circuit open".to_string(),
            timestamp: chrono::Utc::now(),
            severity: EscalationSeverity::Warning,
        };
        let _ = self.protocol.send(Message::Escalation { event }).await;
    }

    /// Revokes every permit (cancelling their workers), then closes the
    /// protocol. Breaker/budget state needs no separate disposal — it holds
    /// no background tasks of its own.
    pub async fn shutdown(&self) {
        self.permit_gate.dispose().await;
        self.protocol.stop().await;
    }
}
