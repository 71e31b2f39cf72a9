//! Worker Delegation Gateway and Job Event Throttle (SPEC_FULL.md §4.7),
//! plus the generic [`adapter::WorkerAdapter`] interface the Core speaks.

pub mod adapter;
pub mod gateway;
pub mod shell_adapter;
pub mod throttle;

pub use adapter::{AdapterError, WorkerAdapter};
pub use gateway::{AdapterRegistry, WorkerDelegationGateway};
pub use shell_adapter::ShellAdapter;
pub use throttle::{truncate_utf8, EventThrottleConfig};
