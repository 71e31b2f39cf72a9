//! Shared data model for the agent execution platform's Core (SPEC_FULL.md §3).
//!
//! Owned exclusively by whichever side the spec names: the Scheduler owns
//! `Job`/`DlqEntry`, the Core owns `Permit`/`CircuitState`. Both sides see
//! these types only across the IPC boundary in `ipc`.

pub mod error;
pub mod id;
pub mod job;
pub mod permit;
pub mod worker;

pub use error::CoreError;
pub use id::Id;
pub use job::{DedupPolicy, DlqEntry, ErrorClass, Job, JobContext, JobLimits, JobType, Priority, PriorityClass};
pub use permit::{CircuitState, Permit, Rejection, RejectionReason, TokensGranted};
pub use worker::{OutputMode, WorkerBudget, WorkerCost, WorkerEvent, WorkerResult, WorkerStatus, WorkerTask};
