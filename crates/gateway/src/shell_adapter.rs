//! A minimal worker adapter that runs `task.instructions` as a shell command.
//! Specific worker kinds (Claude Code, Codex CLI, OpenCode) are out of scope
//! (§1); this one exists only to exercise the gateway end-to-end.

use std::process::Stdio;
use std::time::Instant;

use agent_common::{WorkerCost, WorkerEvent, WorkerResult, WorkerStatus, WorkerTask};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::adapter::{AdapterError, WorkerAdapter};

pub struct ShellAdapter;

#[async_trait]
impl WorkerAdapter for ShellAdapter {
    async fn start_task(
        &self,
        task: WorkerTask,
        events: mpsc::Sender<WorkerEvent>,
        cancellation: CancellationToken,
    ) -> Result<WorkerResult, AdapterError> {
        let start = Instant::now();
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&task.instructions)
            .current_dir(&task.workspace_ref)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AdapterError::Failed(format!("spawn failed: {e}")))?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        // Drain each pipe on its own task to completion (EOF), so a fast
        // exit can never race ahead of output still sitting in the pipe.
        let stdout_events = events.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(data)) = lines.next_line().await {
                let _ = stdout_events.send(WorkerEvent::Stdout { data }).await;
            }
        });
        let stderr_events = events.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(data)) = lines.next_line().await {
                let _ = stderr_events.send(WorkerEvent::Stderr { data }).await;
            }
        });

        let status = tokio::select! {
            status = child.wait() => status,
            _ = cancellation.cancelled() => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(AdapterError::Failed("cancelled".into()));
            }
        };
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let status = status.map_err(|e| AdapterError::Failed(format!("wait failed: {e}")))?;
        let wall_time_ms = start.elapsed().as_millis() as u64;
        Ok(WorkerResult {
            status: if status.success() {
                WorkerStatus::Succeeded
            } else {
                WorkerStatus::Failed
            },
            error_class: if status.success() {
                None
            } else {
                Some(agent_common::ErrorClass::RetryableTransient)
            },
            cost: WorkerCost {
                wall_time_ms,
                estimated_tokens: None,
            },
            artifacts: Vec::new(),
            observations: Vec::new(),
            exit_code: status.code(),
        })
    }
}
