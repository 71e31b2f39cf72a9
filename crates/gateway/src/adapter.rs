//! Worker Adapter interface (SPEC_FULL.md §2 item 6, §9's polymorphic
//! capability set). The gateway treats adapters as opaque beyond this trait;
//! specific worker kinds (Claude Code, Codex CLI, etc.) are out of scope.

use agent_common::{WorkerEvent, WorkerResult, WorkerTask};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("invalid task payload: {0}")]
    InvalidTask(String),
    #[error("adapter failed: {0}")]
    Failed(String),
}

/// A started worker task: the adapter streams [`WorkerEvent`]s through
/// `events` and resolves `result` exactly once.
#[async_trait]
pub trait WorkerAdapter: Send + Sync {
    /// Starts executing `task`. Events are pushed to `events` until either
    /// the adapter finishes or `cancellation` fires. Must always resolve and
    /// must never leak processes or tasks on either path.
    async fn start_task(
        &self,
        task: WorkerTask,
        events: mpsc::Sender<WorkerEvent>,
        cancellation: CancellationToken,
    ) -> Result<WorkerResult, AdapterError>;
}
