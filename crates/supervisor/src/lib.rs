//! Supervisor: spawns and owns the Core subprocess's lifecycle (SPEC_FULL.md
//! §4.10) — transport selection, restart-on-crash with a sliding-window cap,
//! and a heartbeat-based health watchdog. No job/queue/permit logic lives
//! here; that's `agent-scheduler-core` and `agent-core`'s job respectively.

pub mod health;
pub mod process;
pub mod restart;
pub mod transport;

pub use health::HealthWatchdog;
pub use process::{KillOutcome, RestartOutcome, Supervisor, SupervisorConfig};
pub use restart::RestartTracker;
pub use transport::{TransportError, TransportKind};
