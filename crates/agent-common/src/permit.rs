//! Permit and Circuit State data model (§3, §4.4, §4.6).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokensGranted {
    pub concurrency: u32,
    pub rps: u32,
    /// Reserved for future use: carried on the wire but never deducted by
    /// the permit gate (SPEC_FULL.md §9 Open Questions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_budget: Option<u64>,
}

/// A typed admission token granting a job the right to execute (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permit {
    pub permit_id: Id,
    pub job_id: Id,
    pub deadline_at: chrono::DateTime<chrono::Utc>,
    pub attempt_index: u32,
    pub tokens_granted: TokensGranted,
    pub circuit_state_snapshot: BTreeMap<String, CircuitState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_lock_token: Option<String>,
}

/// Reasons a permit request can be denied (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    QueueStall,
    CircuitOpen,
    RateLimit,
    GlobalShed,
    FatalMode,
    BudgetExhausted,
    ConcurrencyLimit,
    DuplicatePermit,
    Deferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: RejectionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Rejection {
    pub fn new(reason: RejectionReason) -> Self {
        Self {
            reason,
            detail: None,
        }
    }

    pub fn with_detail(reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: Some(detail.into()),
        }
    }
}
