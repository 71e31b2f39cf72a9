//! The typed message catalogue of SPEC_FULL.md §6. Modelled as one
//! externally-tagged enum so serde's own required-field checking gives us
//! the per-type validation the spec calls for "for free": a message
//! missing a required field fails to deserialise into its variant and is
//! dropped by the caller, same as an unknown `type` or a non-object value.

use agent_common::{Id, Job, Permit, Rejection};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationEvent {
    pub scope: String,
    pub action: String,
    pub target: String,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub severity: EscalationSeverity,
}

/// The full set of wire messages, keyed by `type` (§6). Variant names map
/// to `snake_case` wire types via serde; fields within each variant map to
/// `camelCase`, per §6's wire table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Message {
    // Scheduler -> Core
    SubmitJob { request_id: Id, job: Job },
    CancelJob { request_id: Id, job_id: Id, reason: String },
    RequestPermit { request_id: Id, job: Job, attempt_index: u32 },
    ReportQueueMetrics {
        request_id: Id,
        queue_depth: u64,
        oldest_job_age_ms: u64,
        backlog_count: u64,
    },
    Heartbeat { timestamp: chrono::DateTime<chrono::Utc> },

    // Core -> Scheduler
    Ack { request_id: Id, job_id: Id },
    PermitGranted { request_id: Id, permit: Permit },
    PermitRejected { request_id: Id, rejection: Rejection },
    JobCompleted {
        job_id: Id,
        outcome: Outcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_class: Option<agent_common::ErrorClass>,
    },
    JobCancelled { request_id: Id, job_id: Id, reason: String },
    Escalation { event: EscalationEvent },
    HeartbeatAck { timestamp: chrono::DateTime<chrono::Utc> },
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<Id>,
    },
}

impl Message {
    /// The wire `type` tag, e.g. `"submit_job"`.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Message::SubmitJob { .. } => "submit_job",
            Message::CancelJob { .. } => "cancel_job",
            Message::RequestPermit { .. } => "request_permit",
            Message::ReportQueueMetrics { .. } => "report_queue_metrics",
            Message::Heartbeat { .. } => "heartbeat",
            Message::Ack { .. } => "ack",
            Message::PermitGranted { .. } => "permit_granted",
            Message::PermitRejected { .. } => "permit_rejected",
            Message::JobCompleted { .. } => "job_completed",
            Message::JobCancelled { .. } => "job_cancelled",
            Message::Escalation { .. } => "escalation",
            Message::HeartbeatAck { .. } => "heartbeat_ack",
            Message::Error { .. } => "error",
        }
    }

    /// The `requestId` used for response correlation (§4.2), when this
    /// message type carries one. `job_completed`, `escalation`, and the two
    /// heartbeat messages are pure notifications routed by type handler only.
    pub fn request_id(&self) -> Option<&Id> {
        match self {
            Message::SubmitJob { request_id, .. }
            | Message::CancelJob { request_id, .. }
            | Message::RequestPermit { request_id, .. }
            | Message::ReportQueueMetrics { request_id, .. }
            | Message::Ack { request_id, .. }
            | Message::PermitGranted { request_id, .. }
            | Message::PermitRejected { request_id, .. }
            | Message::JobCancelled { request_id, .. } => Some(request_id),
            Message::Error { request_id, .. } => request_id.as_ref(),
            Message::Heartbeat { .. }
            | Message::JobCompleted { .. }
            | Message::Escalation { .. }
            | Message::HeartbeatAck { .. } => None,
        }
    }

    /// Parses a raw JSON value into a known, well-formed `Message`.
    /// Returns `None` for non-objects, missing/non-string `type`, unknown
    /// types, and per-type required-field failures — all silently dropped
    /// per §4.2.
    pub fn from_value(value: Value) -> Option<Message> {
        if !value.is_object() {
            return None;
        }
        if !value.get("type").is_some_and(Value::is_string) {
            return None;
        }
        serde_json::from_value(value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_common::{JobLimits, JobType, Priority, PriorityClass};
    use serde_json::json;

    fn sample_job() -> Job {
        Job {
            job_id: Id::from_string("job-1"),
            job_type: JobType::WorkerTask,
            priority: Priority { value: 0, class: PriorityClass::Batch },
            key: None,
            payload: json!({}),
            limits: JobLimits::default(),
            context: Default::default(),
        }
    }

    #[test]
    fn round_trips_through_json() {
        let msg = Message::SubmitJob {
            request_id: Id::from_string("req-1"),
            job: sample_job(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "submit_job");
        let back = Message::from_value(value).unwrap();
        assert_eq!(back.type_tag(), "submit_job");
    }

    #[test]
    fn non_object_is_dropped() {
        assert!(Message::from_value(json!([1, 2, 3])).is_none());
        assert!(Message::from_value(json!(null)).is_none());
        assert!(Message::from_value(json!("just a string")).is_none());
    }

    #[test]
    fn missing_type_is_dropped() {
        assert!(Message::from_value(json!({"requestId": "x"})).is_none());
    }

    #[test]
    fn unknown_type_is_dropped() {
        assert!(Message::from_value(json!({"type": "not_a_real_type"})).is_none());
    }

    #[test]
    fn missing_required_field_is_dropped() {
        // cancel_job needs requestId, jobId, reason.
        assert!(Message::from_value(json!({"type": "cancel_job", "requestId": "r"})).is_none());
    }

    #[test]
    fn job_completed_has_no_request_id() {
        let msg = Message::JobCompleted {
            job_id: Id::from_string("j-1"),
            outcome: Outcome::Succeeded,
            result: None,
            error_class: None,
        };
        assert_eq!(msg.request_id(), None);
    }
}
