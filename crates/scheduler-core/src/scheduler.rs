//! The Scheduler (§4.9): owns the queue, dedup registry, in-flight map, and
//! DLQ; drives the Core purely over `agent_ipc::IpcProtocol`. Spawning the
//! Core process and killing it on shutdown is the caller's job (the
//! `agent-scheduler` binary wires this crate to `agent-supervisor`).
//!
//! Grounded on `client-engine::engine`'s `EngineRuntime::run` cooperative
//! loop: a single consumer task blocks on a `Notify` when idle and wakes on
//! every submission, exactly like the teacher's own `EngineInner::notify`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_common::{DedupPolicy, DlqEntry, Id, Job};
use agent_ipc::{IpcProtocol, Message, Outcome};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::dedup::{DedupOutcome, DedupRegistry};
use crate::dlq::DeadLetterQueue;
use crate::inflight::InflightMap;
use crate::queue::JobQueue;
use crate::retry::{
    compute_backoff_delay, PERMIT_BACKOFF_BASE_MS, PERMIT_BACKOFF_MAX_MS, RETRY_BACKOFF_BASE_MS,
    RETRY_BACKOFF_MAX_MS,
};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub drain_timeout_ms: u64,
    pub metrics_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub dlq_capacity: usize,
    pub dlq_dir: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 10_000,
            metrics_interval_ms: 5_000,
            request_timeout_ms: 5_000,
            dlq_capacity: 1_000,
            dlq_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubmitOutcome {
    pub accepted: bool,
    pub reason: Option<String>,
    pub cancel_job_id: Option<Id>,
}

struct SchedulerState {
    queue: JobQueue,
    dedup: DedupRegistry,
    inflight: InflightMap,
    dlq: DeadLetterQueue,
}

pub struct Scheduler {
    state: Mutex<SchedulerState>,
    protocol: Arc<IpcProtocol>,
    notify: Notify,
    config: SchedulerConfig,
    stopped: AtomicBool,
    process_task: Mutex<Option<JoinHandle<()>>>,
    metrics_task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(protocol: Arc<IpcProtocol>, config: SchedulerConfig) -> std::io::Result<Arc<Self>> {
        let dlq = DeadLetterQueue::load(config.dlq_capacity, config.dlq_dir.clone())?;
        let scheduler = Arc::new(Self {
            state: Mutex::new(SchedulerState {
                queue: JobQueue::new(),
                dedup: DedupRegistry::new(),
                inflight: InflightMap::new(),
                dlq,
            }),
            protocol,
            notify: Notify::new(),
            config,
            stopped: AtomicBool::new(false),
            process_task: Mutex::new(None),
            metrics_task: Mutex::new(None),
        });
        scheduler.spawn_tasks();
        Ok(scheduler)
    }

    /// Only ever called once, from `new`, before any other holder of `self`
    /// exists — the `try_lock`s below can never contend.
    fn spawn_tasks(self: &Arc<Self>) {
        let process_handler = Arc::clone(self);
        let process_task = tokio::spawn(async move { process_handler.process_loop().await });

        let completion_handler = Arc::clone(self);
        let protocol = Arc::clone(&self.protocol);
        tokio::spawn(async move {
            protocol
                .on("job_completed", move |msg| {
                    let completion_handler = Arc::clone(&completion_handler);
                    async move {
                        if let Message::JobCompleted {
                            job_id,
                            outcome,
                            error_class,
                            ..
                        } = msg
                        {
                            completion_handler
                                .handle_job_completed(job_id, outcome, error_class)
                                .await;
                        }
                    }
                })
                .await;
        });

        let metrics_handler = Arc::clone(self);
        let metrics_task = tokio::spawn(async move { metrics_handler.metrics_loop().await });

        *self.process_task.try_lock().expect("uncontended at construction") = Some(process_task);
        *self.metrics_task.try_lock().expect("uncontended at construction") = Some(metrics_task);
    }

    /// Submits `job` for execution, applying `policy` when `job.key`
    /// collides with an in-flight submission (§4.9).
    pub async fn submit_job(&self, job: Job, policy: DedupPolicy) -> SubmitOutcome {
        let mut state = self.state.lock().await;
        match state.dedup.check(job.key.as_deref(), &job.job_id, policy) {
            DedupOutcome::Refused { reason } => SubmitOutcome {
                accepted: false,
                reason: Some(reason),
                cancel_job_id: None,
            },
            DedupOutcome::Proceed => {
                let now = chrono::Utc::now();
                state.inflight.insert(job.clone(), now);
                state.queue.enqueue(job);
                drop(state);
                self.notify.notify_waiters();
                SubmitOutcome {
                    accepted: true,
                    reason: None,
                    cancel_job_id: None,
                }
            }
            DedupOutcome::Displaced { cancel_job_id } => {
                let now = chrono::Utc::now();
                state.inflight.insert(job.clone(), now);
                state.queue.enqueue(job);
                drop(state);
                self.notify.notify_waiters();
                SubmitOutcome {
                    accepted: true,
                    reason: None,
                    cancel_job_id: Some(cancel_job_id),
                }
            }
        }
    }

    async fn process_loop(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let job = {
                let mut state = self.state.lock().await;
                state.queue.dequeue()
            };

            let Some(job) = job else {
                notified.await;
                continue;
            };

            self.drive_one(job).await;
        }
    }

    async fn drive_one(self: &Arc<Self>, job: Job) {
        let timeout = Duration::from_millis(self.config.request_timeout_ms);

        let submit_request_id = Id::new();
        let submit_reply = self
            .protocol
            .request(
                &submit_request_id,
                Message::SubmitJob {
                    request_id: submit_request_id.clone(),
                    job: job.clone(),
                },
                timeout,
            )
            .await;
        if !matches!(submit_reply, Ok(Message::Ack { .. })) {
            self.reenqueue_with_backoff(job).await;
            return;
        }

        let attempt_index = {
            let state = self.state.lock().await;
            state.inflight.get(&job.job_id).map(|i| i.attempt_index).unwrap_or(0)
        };

        let permit_request_id = Id::new();
        let permit_reply = self
            .protocol
            .request(
                &permit_request_id,
                Message::RequestPermit {
                    request_id: permit_request_id.clone(),
                    job: job.clone(),
                    attempt_index,
                },
                timeout,
            )
            .await;

        match permit_reply {
            Ok(Message::PermitGranted { .. }) => {
                let mut state = self.state.lock().await;
                if let Some(info) = state.inflight.get_mut(&job.job_id) {
                    info.processing = true;
                    info.backoff_count = 0;
                }
            }
            _ => {
                self.reenqueue_with_backoff(job).await;
            }
        }
    }

    async fn reenqueue_with_backoff(self: &Arc<Self>, job: Job) {
        let backoff_count = {
            let mut state = self.state.lock().await;
            state
                .inflight
                .get_mut(&job.job_id)
                .map(|info| {
                    info.backoff_count += 1;
                    info.backoff_count - 1
                })
                .unwrap_or(0)
        };
        let delay = compute_backoff_delay(backoff_count, PERMIT_BACKOFF_BASE_MS, PERMIT_BACKOFF_MAX_MS);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.stopped.load(Ordering::SeqCst) {
                return;
            }
            let mut state = this.state.lock().await;
            if state.inflight.get(&job.job_id).is_some() {
                state.queue.enqueue(job);
                drop(state);
                this.notify.notify_waiters();
            }
        });
    }

    async fn handle_job_completed(
        self: &Arc<Self>,
        job_id: Id,
        outcome: Outcome,
        error_class: Option<agent_common::ErrorClass>,
    ) {
        match outcome {
            Outcome::Succeeded | Outcome::Cancelled => {
                let mut state = self.state.lock().await;
                if let Some(info) = state.inflight.remove(&job_id) {
                    state.dedup.deregister(info.job.key.as_deref());
                }
            }
            Outcome::Failed => {
                let retry = {
                    let state = self.state.lock().await;
                    state.inflight.get(&job_id).map(|info| {
                        let retryable = error_class.is_some_and(agent_common::ErrorClass::is_retryable);
                        (retryable, info.attempt_index, info.job.limits.max_attempts)
                    })
                };
                let Some((retryable, attempt_index, max_attempts)) = retry else {
                    return;
                };

                if retryable && attempt_index + 1 < max_attempts {
                    let delay = compute_backoff_delay(attempt_index, RETRY_BACKOFF_BASE_MS, RETRY_BACKOFF_MAX_MS);
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if this.stopped.load(Ordering::SeqCst) {
                            return;
                        }
                        let mut state = this.state.lock().await;
                        if let Some(info) = state.inflight.get_mut(&job_id) {
                            info.attempt_index += 1;
                            info.processing = false;
                            let job = info.job.clone();
                            state.queue.enqueue(job);
                            drop(state);
                            this.notify.notify_waiters();
                        }
                    });
                } else {
                    let mut state = self.state.lock().await;
                    if let Some(info) = state.inflight.remove(&job_id) {
                        state.dedup.deregister(info.job.key.as_deref());
                        let entry = DlqEntry {
                            job: info.job,
                            reason: "job failed and exhausted retries".to_string(),
                            error_class,
                            failed_at: chrono::Utc::now(),
                            attempt_count: info.attempt_index + 1,
                        };
                        if let Err(err) = state.dlq.push(entry).await {
                            tracing::warn!(error = %err, "failed to mirror dlq entry to disk");
                        }
                    }
                }
            }
        }
    }

    async fn metrics_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.metrics_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            let (queue_depth, oldest_job_age_ms, backlog_count) = {
                let state = self.state.lock().await;
                let now = chrono::Utc::now();
                let oldest = state
                    .queue
                    .iter()
                    .filter_map(|job| state.inflight.get(&job.job_id))
                    .map(|info| (now - info.enqueued_at).num_milliseconds().max(0) as u64)
                    .max()
                    .unwrap_or(0);
                let backlog = state.inflight.values().filter(|info| !info.processing).count();
                (state.queue.len() as u64, oldest, backlog as u64)
            };

            let request_id = Id::new();
            if let Err(err) = self
                .protocol
                .send(Message::ReportQueueMetrics {
                    request_id,
                    queue_depth,
                    oldest_job_age_ms,
                    backlog_count,
                })
                .await
            {
                tracing::debug!(error = %err, "report_queue_metrics send failed, swallowed");
            }
        }
    }

    /// Stops the metrics loop and process loop, then waits up to
    /// `drain_timeout_ms` for every in-flight job to stop processing.
    /// Anything still in-flight after that is DLQed with "Drain timeout".
    /// Does not touch the Core process; the caller kills it via the
    /// Supervisor once this returns.
    pub async fn shutdown(self: &Arc<Self>) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();

        if let Some(task) = self.metrics_task.lock().await.take() {
            task.abort();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.config.drain_timeout_ms);
        loop {
            {
                let state = self.state.lock().await;
                if state.inflight.all_drained() {
                    break;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if let Some(task) = self.process_task.lock().await.take() {
            task.abort();
        }

        let mut state = self.state.lock().await;
        let stranded: Vec<_> = state.inflight.drain().collect();
        for info in stranded {
            state.dedup.deregister(info.job.key.as_deref());
            let entry = DlqEntry {
                job: info.job,
                reason: "Drain timeout".to_string(),
                error_class: None,
                failed_at: chrono::Utc::now(),
                attempt_count: info.attempt_index + 1,
            };
            if let Err(err) = state.dlq.push(entry).await {
                tracing::warn!(error = %err, "failed to mirror drain-timeout dlq entry to disk");
            }
        }
    }

    pub async fn dlq_len(&self) -> usize {
        self.state.lock().await.dlq.len()
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn inflight_len(&self) -> usize {
        self.state.lock().await.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_common::{ErrorClass, JobLimits, JobType, Permit, Priority, PriorityClass, Rejection, RejectionReason, TokensGranted};
    use serde_json::json;
    use std::collections::BTreeMap;
    use tokio::io::duplex;

    fn job(key: Option<&str>) -> Job {
        Job {
            job_id: Id::new(),
            job_type: JobType::Maintenance,
            priority: Priority { value: 0, class: PriorityClass::Batch },
            key: key.map(str::to_string),
            payload: json!({}),
            limits: JobLimits { timeout_ms: 60_000, max_attempts: 3 },
            context: Default::default(),
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            drain_timeout_ms: 500,
            metrics_interval_ms: 50,
            request_timeout_ms: 500,
            dlq_capacity: 100,
            dlq_dir: None,
        }
    }

    /// Wires a `Scheduler` to a mock Core that acks every submit and grants
    /// every permit request, so tests can drive real queue/inflight/dlq
    /// transitions through the actual IPC round trip.
    fn scheduler_with_granting_core() -> (Arc<Scheduler>, Arc<IpcProtocol>) {
        let (scheduler_io, core_io) = duplex(8192);
        let (s_read, s_write) = tokio::io::split(scheduler_io);
        let (c_read, c_write) = tokio::io::split(core_io);
        let scheduler_protocol = IpcProtocol::new(
            agent_ipc::FrameReader::new(s_read),
            agent_ipc::FrameWriter::new(s_write),
        );
        let core_protocol = IpcProtocol::new(
            agent_ipc::FrameReader::new(c_read),
            agent_ipc::FrameWriter::new(c_write),
        );

        let core_for_submit = Arc::clone(&core_protocol);
        tokio::spawn(async move {
            core_for_submit
                .on("submit_job", {
                    let core = Arc::clone(&core_for_submit);
                    move |msg| {
                        let core = Arc::clone(&core);
                        async move {
                            if let Message::SubmitJob { request_id, job } = msg {
                                let _ = core.send(Message::Ack { request_id, job_id: job.job_id }).await;
                            }
                        }
                    }
                })
                .await;
        });
        let core_for_permit = Arc::clone(&core_protocol);
        tokio::spawn(async move {
            core_for_permit
                .on("request_permit", {
                    let core = Arc::clone(&core_for_permit);
                    move |msg| {
                        let core = Arc::clone(&core);
                        async move {
                            if let Message::RequestPermit { request_id, job, attempt_index } = msg {
                                let _ = core
                                    .send(Message::PermitGranted {
                                        request_id,
                                        permit: Permit {
                                            permit_id: Id::new(),
                                            job_id: job.job_id,
                                            deadline_at: chrono::Utc::now() + chrono::Duration::minutes(5),
                                            attempt_index,
                                            tokens_granted: TokensGranted::default(),
                                            circuit_state_snapshot: BTreeMap::new(),
                                            workspace_lock_token: None,
                                        },
                                    })
                                    .await;
                            }
                        }
                    }
                })
                .await;
        });

        let scheduler = Scheduler::new(scheduler_protocol, fast_config()).unwrap();
        (scheduler, core_protocol)
    }

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    #[tokio::test]
    async fn happy_path_reaches_processing() {
        let (scheduler, _core) = scheduler_with_granting_core();
        let job = job(None);
        let job_id = job.job_id.clone();
        let outcome = scheduler.submit_job(job, DedupPolicy::Reject).await;
        assert!(outcome.accepted);

        let reached = wait_until(|| {
            futures_now(&scheduler, |state| {
                state.inflight.get(&job_id).is_some_and(|i| i.processing)
            })
        })
        .await;
        assert!(reached);
    }

    #[tokio::test]
    async fn duplicate_key_rejected_under_reject_policy() {
        let (scheduler, _core) = scheduler_with_granting_core();
        let first = scheduler.submit_job(job(Some("k")), DedupPolicy::Reject).await;
        assert!(first.accepted);
        let second = scheduler.submit_job(job(Some("k")), DedupPolicy::Reject).await;
        assert!(!second.accepted);
        assert!(second.reason.unwrap().contains("Duplicate key"));
    }

    #[tokio::test]
    async fn latest_wins_returns_cancel_job_id() {
        let (scheduler, _core) = scheduler_with_granting_core();
        let first = scheduler.submit_job(job(Some("k")), DedupPolicy::LatestWins).await;
        assert!(first.accepted);
        let first_job = scheduler.state.lock().await.inflight.values().next().unwrap().job.job_id.clone();

        let second = scheduler.submit_job(job(Some("k")), DedupPolicy::LatestWins).await;
        assert!(second.accepted);
        assert_eq!(second.cancel_job_id, Some(first_job));
    }

    #[tokio::test]
    async fn job_completed_succeeded_clears_inflight() {
        let (scheduler, core) = scheduler_with_granting_core();
        let job = job(None);
        let job_id = job.job_id.clone();
        scheduler.submit_job(job, DedupPolicy::Reject).await;

        wait_until(|| futures_now(&scheduler, |state| state.inflight.get(&job_id).is_some_and(|i| i.processing)))
            .await;

        core
            .send(Message::JobCompleted {
                job_id: job_id.clone(),
                outcome: Outcome::Succeeded,
                result: None,
                error_class: None,
            })
            .await
            .unwrap();

        let cleared = wait_until(|| futures_now(&scheduler, |state| state.inflight.get(&job_id).is_none())).await;
        assert!(cleared);
    }

    #[tokio::test]
    async fn job_completed_non_retryable_failure_lands_in_dlq() {
        let (scheduler, core) = scheduler_with_granting_core();
        let job = job(None);
        let job_id = job.job_id.clone();
        scheduler.submit_job(job, DedupPolicy::Reject).await;
        wait_until(|| futures_now(&scheduler, |state| state.inflight.get(&job_id).is_some_and(|i| i.processing)))
            .await;

        core
            .send(Message::JobCompleted {
                job_id: job_id.clone(),
                outcome: Outcome::Failed,
                result: None,
                error_class: Some(ErrorClass::NonRetryable),
            })
            .await
            .unwrap();

        let dlqed = wait_until(|| futures_now(&scheduler, |state| state.dlq.len() == 1)).await;
        assert!(dlqed);
    }

    #[tokio::test]
    async fn permit_rejection_reenqueues_with_backoff() {
        let (scheduler_io, core_io) = duplex(8192);
        let (s_read, s_write) = tokio::io::split(scheduler_io);
        let (c_read, c_write) = tokio::io::split(core_io);
        let scheduler_protocol = IpcProtocol::new(
            agent_ipc::FrameReader::new(s_read),
            agent_ipc::FrameWriter::new(s_write),
        );
        let core_protocol = IpcProtocol::new(
            agent_ipc::FrameReader::new(c_read),
            agent_ipc::FrameWriter::new(c_write),
        );

        let core_for_submit = Arc::clone(&core_protocol);
        tokio::spawn(async move {
            core_for_submit
                .on("submit_job", {
                    let core = Arc::clone(&core_for_submit);
                    move |msg| {
                        let core = Arc::clone(&core);
                        async move {
                            if let Message::SubmitJob { request_id, job } = msg {
                                let _ = core.send(Message::Ack { request_id, job_id: job.job_id }).await;
                            }
                        }
                    }
                })
                .await;
        });
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let core_for_permit = Arc::clone(&core_protocol);
        let attempts_clone = Arc::clone(&attempts);
        tokio::spawn(async move {
            core_for_permit
                .on("request_permit", {
                    let core = Arc::clone(&core_for_permit);
                    let attempts = Arc::clone(&attempts_clone);
                    move |msg| {
                        let core = Arc::clone(&core);
                        let attempts = Arc::clone(&attempts);
                        async move {
                            if let Message::RequestPermit { request_id, job, .. } = msg {
                                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                                if n == 0 {
                                    let _ = core
                                        .send(Message::PermitRejected {
                                            request_id,
                                            rejection: Rejection::new(RejectionReason::ConcurrencyLimit),
                                        })
                                        .await;
                                } else {
                                    let _ = core
                                        .send(Message::PermitGranted {
                                            request_id,
                                            permit: Permit {
                                                permit_id: Id::new(),
                                                job_id: job.job_id,
                                                deadline_at: chrono::Utc::now() + chrono::Duration::minutes(5),
                                                attempt_index: 0,
                                                tokens_granted: TokensGranted::default(),
                                                circuit_state_snapshot: BTreeMap::new(),
                                                workspace_lock_token: None,
                                            },
                                        })
                                        .await;
                                }
                            }
                        }
                    }
                })
                .await;
        });

        let scheduler = Scheduler::new(scheduler_protocol, fast_config()).unwrap();
        let job = job(None);
        let job_id = job.job_id.clone();
        scheduler.submit_job(job, DedupPolicy::Reject).await;

        let reached = wait_until(|| futures_now(&scheduler, |state| state.inflight.get(&job_id).is_some_and(|i| i.processing))).await;
        assert!(reached);
        assert!(attempts.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    }

    /// Synchronously peeks at scheduler state from a poll loop without
    /// re-entering the async executor per call.
    fn futures_now(scheduler: &Arc<Scheduler>, check: impl FnOnce(&SchedulerState) -> bool) -> bool {
        match scheduler.state.try_lock() {
            Ok(state) => check(&state),
            Err(_) => false,
        }
    }
}
