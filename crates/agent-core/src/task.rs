//! Maps a Scheduler-submitted [`Job`] into a [`WorkerTask`] the gateway can
//! run. The job's `payload` carries the worker-facing fields; this is the
//! only place that reaches into it.

use std::collections::{BTreeMap, BTreeSet};

use agent_common::{Job, OutputMode, WorkerBudget, WorkerTask};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerPayload {
    worker_kind: String,
    #[serde(default)]
    workspace_ref: String,
    instructions: String,
    #[serde(default)]
    capabilities: BTreeSet<String>,
    #[serde(default)]
    output_mode: Option<OutputMode>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    env: Option<BTreeMap<String, String>>,
    #[serde(default)]
    max_steps: Option<u32>,
    #[serde(default)]
    max_command_time_ms: Option<u64>,
}

pub fn worker_task_from_job(job: &Job) -> Result<WorkerTask, String> {
    let payload: WorkerPayload = serde_json::from_value(job.payload.clone())
        .map_err(|err| format!("invalid worker task payload: {err}"))?;

    let deadline_at =
        chrono::Utc::now() + chrono::Duration::milliseconds(job.limits.timeout_ms as i64);

    Ok(WorkerTask {
        worker_task_id: job.job_id.clone(),
        worker_kind: payload.worker_kind,
        workspace_ref: payload.workspace_ref,
        instructions: payload.instructions,
        capabilities: payload.capabilities,
        output_mode: payload.output_mode.unwrap_or(OutputMode::Batch),
        model: payload.model,
        budget: WorkerBudget {
            deadline_at,
            max_steps: payload.max_steps,
            max_command_time_ms: payload.max_command_time_ms,
        },
        env: payload.env,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_common::{Id, JobContext, JobLimits, JobType, Priority, PriorityClass};
    use serde_json::json;

    fn job(payload: serde_json::Value) -> Job {
        Job {
            job_id: Id::from_string("job-1"),
            job_type: JobType::WorkerTask,
            priority: Priority { value: 0, class: PriorityClass::Batch },
            key: None,
            payload,
            limits: JobLimits::default(),
            context: JobContext::default(),
        }
    }

    #[test]
    fn builds_task_from_minimal_payload() {
        let task = worker_task_from_job(&job(json!({
            "workerKind": "shell",
            "instructions": "echo hi",
        })))
        .unwrap();
        assert_eq!(task.worker_kind, "shell");
        assert_eq!(task.instructions, "echo hi");
        assert_eq!(task.output_mode, OutputMode::Batch);
    }

    #[test]
    fn rejects_payload_missing_required_fields() {
        let err = worker_task_from_job(&job(json!({"workerKind": "shell"}))).unwrap_err();
        assert!(err.contains("invalid worker task payload"));
    }
}
