//! Worker Delegation Gateway (SPEC_FULL.md §4.7): dispatches a permitted
//! job to a registered [`WorkerAdapter`], wiring its events through the
//! [`throttle`].

use std::collections::HashMap;
use std::sync::Arc;

use agent_common::{ErrorClass, WorkerEvent, WorkerResult, WorkerStatus, WorkerTask};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::adapter::{AdapterError, WorkerAdapter};
use crate::throttle::{self, EventThrottleConfig};

/// Registers adapters keyed by worker kind; opaque beyond [`WorkerAdapter`].
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn WorkerAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker_kind: impl Into<String>, adapter: Arc<dyn WorkerAdapter>) {
        self.adapters.insert(worker_kind.into(), adapter);
    }

    pub fn get(&self, worker_kind: &str) -> Option<Arc<dyn WorkerAdapter>> {
        self.adapters.get(worker_kind).cloned()
    }
}

pub struct WorkerDelegationGateway {
    registry: AdapterRegistry,
    throttle_config: EventThrottleConfig,
    active_workers: Mutex<u32>,
}

impl WorkerDelegationGateway {
    pub fn new(registry: AdapterRegistry, throttle_config: EventThrottleConfig) -> Self {
        Self {
            registry,
            throttle_config,
            active_workers: Mutex::new(0),
        }
    }

    pub async fn active_worker_count(&self) -> u32 {
        *self.active_workers.lock().await
    }

    /// Validates and runs `task` under `cancellation` (composed by the
    /// caller from parent cancellation, permit revocation, and deadline),
    /// forwarding events through `event_sink`. Always decrements the active
    /// count on every return path so no worker is ever leaked.
    pub async fn delegate_task(
        &self,
        task: WorkerTask,
        cancellation: CancellationToken,
        event_sink: mpsc::Sender<WorkerEvent>,
    ) -> WorkerResult {
        if let Err(msg) = task.validate() {
            return WorkerResult {
                status: WorkerStatus::Failed,
                error_class: Some(ErrorClass::NonRetryable),
                cost: Default::default(),
                artifacts: Vec::new(),
                observations: vec![msg],
                exit_code: None,
            };
        }

        let Some(adapter) = self.registry.get(&task.worker_kind) else {
            return WorkerResult {
                status: WorkerStatus::Failed,
                error_class: Some(ErrorClass::NonRetryable),
                cost: Default::default(),
                artifacts: Vec::new(),
                observations: vec![format!("no adapter registered for kind {}", task.worker_kind)],
                exit_code: None,
            };
        };

        *self.active_workers.lock().await += 1;

        let (raw_tx, raw_rx) = mpsc::channel(256);
        let throttle_handle = tokio::spawn(throttle::run(self.throttle_config, raw_rx, event_sink));

        let result = tokio::select! {
            result = adapter.start_task(task, raw_tx, cancellation.clone()) => result,
            _ = cancellation.cancelled() => Err(AdapterError::Failed("cancelled".into())),
        };

        let _ = throttle_handle.await;
        *self.active_workers.lock().await -= 1;

        match result {
            Ok(result) => result,
            Err(AdapterError::InvalidTask(msg)) => WorkerResult {
                status: WorkerStatus::Failed,
                error_class: Some(ErrorClass::NonRetryable),
                cost: Default::default(),
                artifacts: Vec::new(),
                observations: vec![msg],
                exit_code: None,
            },
            Err(AdapterError::Failed(msg)) => {
                // Best-effort: an abort we caused is reported as CANCELLED
                // even if the adapter itself surfaces FAILED (§5).
                let status = if cancellation.is_cancelled() {
                    WorkerStatus::Cancelled
                } else {
                    WorkerStatus::Failed
                };
                WorkerResult {
                    status,
                    error_class: if status == WorkerStatus::Failed {
                        Some(ErrorClass::RetryableTransient)
                    } else {
                        None
                    },
                    cost: Default::default(),
                    artifacts: Vec::new(),
                    observations: vec![msg],
                    exit_code: None,
                }
            }
        }
    }
}
