//! Worker Task / Event / Result data model (§3, §4.7). The concrete adapters
//! (Claude Code, Codex CLI, OpenCode, custom shell) are out of scope (§1);
//! this module only fixes the shapes the generic gateway speaks.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::id::Id;
use crate::job::ErrorClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputMode {
    Batch,
    Stream,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerBudget {
    pub deadline_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_command_time_ms: Option<u64>,
}

/// A validated request to delegate work to a registered adapter (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerTask {
    pub worker_task_id: Id,
    pub worker_kind: String,
    pub workspace_ref: String,
    pub instructions: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub output_mode: OutputMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub budget: WorkerBudget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<std::collections::BTreeMap<String, String>>,
}

impl WorkerTask {
    /// Field-by-field validation performed at the Core boundary (§4.7).
    /// Invalid payloads fail the job immediately with `NON_RETRYABLE`.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_kind.trim().is_empty() {
            return Err("worker_kind must not be empty".to_string());
        }
        if self.workspace_ref.trim().is_empty() {
            return Err("workspace_ref must not be empty".to_string());
        }
        if self.instructions.trim().is_empty() {
            return Err("instructions must not be empty".to_string());
        }
        Ok(())
    }
}

/// Events an adapter emits while a task runs (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WorkerEvent {
    Stdout { data: String },
    Stderr { data: String },
    Progress {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        percent: Option<f32>,
    },
    Patch { file_path: String, diff: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCost {
    pub wall_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResult {
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    pub cost: WorkerCost,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}
