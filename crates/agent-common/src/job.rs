//! The Job data model (§3): immutable once created, owned by the Scheduler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Llm,
    Tool,
    WorkerTask,
    PluginEvent,
    Maintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityClass {
    Interactive,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Priority {
    pub value: i64,
    pub class: PriorityClass,
}

impl Priority {
    /// Interactive jobs preempt batch jobs at equal `value` (§4.9).
    pub fn outranks(&self, other: &Priority) -> bool {
        match self.value.cmp(&other.value) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => {
                self.class == PriorityClass::Interactive && other.class == PriorityClass::Batch
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLimits {
    pub timeout_ms: u64,
    pub max_attempts: u32,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 5 * 60 * 1000,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContext {
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// A unit of work submitted to the Scheduler. Immutable after creation; the
/// Scheduler owns the canonical copy, a serialised clone travels over IPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: Id,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub payload: Value,
    pub limits: JobLimits,
    #[serde(default)]
    pub context: JobContext,
}

impl Job {
    pub fn new(job_type: JobType, priority: Priority, payload: Value) -> Self {
        Self {
            job_id: Id::new(),
            job_type,
            priority,
            key: None,
            payload,
            limits: JobLimits::default(),
            context: JobContext::default(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Policy applied when a submission collides with an existing dedup entry (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DedupPolicy {
    Coalesce,
    LatestWins,
    Reject,
}

/// Error classification driving the Retry Policy (§3, §7). Only the
/// `RETRYABLE_*` variants are ever retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    NonRetryable,
    RetryableTransient,
    RetryableRateLimit,
    RetryableNetwork,
    RetryableService,
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorClass::RetryableTransient
                | ErrorClass::RetryableRateLimit
                | ErrorClass::RetryableNetwork
                | ErrorClass::RetryableService
        )
    }
}

/// A job that exhausted retries or missed the drain deadline (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqEntry {
    pub job: Job,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    pub failed_at: chrono::DateTime<chrono::Utc>,
    pub attempt_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prio(value: i64, class: PriorityClass) -> Priority {
        Priority { value, class }
    }

    #[test]
    fn interactive_outranks_batch_at_equal_value() {
        let interactive = prio(5, PriorityClass::Interactive);
        let batch = prio(5, PriorityClass::Batch);
        assert!(interactive.outranks(&batch));
        assert!(!batch.outranks(&interactive));
    }

    #[test]
    fn higher_value_outranks_regardless_of_class() {
        let low_interactive = prio(1, PriorityClass::Interactive);
        let high_batch = prio(2, PriorityClass::Batch);
        assert!(high_batch.outranks(&low_interactive));
    }

    #[test]
    fn error_class_retryability() {
        assert!(ErrorClass::RetryableNetwork.is_retryable());
        assert!(!ErrorClass::NonRetryable.is_retryable());
        assert!(!ErrorClass::Fatal.is_retryable());
    }
}
