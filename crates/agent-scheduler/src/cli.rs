//! Scheduler process configuration (SPEC_FULL.md §10): a typed `clap`
//! struct resolved once at startup, mirroring `agent-core::cli`'s shape.

use std::path::PathBuf;
use std::time::Duration;

use agent_supervisor::TransportKind;
use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    Stdio,
    Socket,
    Tcp,
}

impl From<Transport> for TransportKind {
    fn from(value: Transport) -> Self {
        match value {
            Transport::Stdio => TransportKind::Stdio,
            Transport::Socket => TransportKind::Socket,
            Transport::Tcp => TransportKind::Tcp,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "agent-scheduler", version, about = "Scheduler process of the agent execution platform")]
pub struct Cli {
    /// Path to the Core executable this process spawns and supervises.
    #[arg(long, env = "AGENT_SCHEDULER_CORE_PROGRAM", default_value = "agent-core")]
    pub core_program: String,

    /// Extra arguments passed through to the Core process.
    #[arg(long, env = "AGENT_SCHEDULER_CORE_ARGS", value_delimiter = ' ')]
    pub core_args: Vec<String>,

    /// Transport the Supervisor offers the Core; falls back from `socket` to
    /// `tcp` automatically on platform refusal (§4.10).
    #[arg(long, env = "AGENT_SCHEDULER_TRANSPORT", value_enum, default_value_t = Transport::Stdio)]
    pub transport: Transport,

    /// Seconds to wait for the Core to connect after spawn.
    #[arg(long, env = "AGENT_SCHEDULER_ACCEPT_TIMEOUT_SECS", default_value_t = 10)]
    pub accept_timeout_secs: u64,

    /// Milliseconds granted for graceful shutdown before escalating to
    /// `SIGKILL`.
    #[arg(long, env = "AGENT_SCHEDULER_GRACEFUL_SHUTDOWN_MS", default_value_t = 5_000)]
    pub graceful_shutdown_ms: u64,

    /// Restart cap window, in seconds, for the sliding-window restart limit.
    #[arg(long, env = "AGENT_SCHEDULER_RESTART_WINDOW_SECS", default_value_t = 60)]
    pub restart_window_secs: u64,

    /// Maximum restarts allowed within the restart window.
    #[arg(long, env = "AGENT_SCHEDULER_RESTART_MAX", default_value_t = 5)]
    pub restart_max: u32,

    /// Heartbeat interval, in seconds, the health watchdog uses to probe the
    /// Core.
    #[arg(long, env = "AGENT_SCHEDULER_HEALTH_INTERVAL_SECS", default_value_t = 10)]
    pub health_interval_secs: u64,

    /// Consecutive missed heartbeats before the watchdog declares a hang.
    #[arg(long, env = "AGENT_SCHEDULER_HEALTH_MISS_THRESHOLD", default_value_t = 3)]
    pub health_miss_threshold: u32,

    /// Milliseconds the scheduler waits for in-flight jobs to drain on
    /// shutdown before DLQ-ing them with "Drain timeout".
    #[arg(long, env = "AGENT_SCHEDULER_DRAIN_TIMEOUT_MS", default_value_t = 10_000)]
    pub drain_timeout_ms: u64,

    /// Milliseconds between `report_queue_metrics` sends to the Core.
    #[arg(long, env = "AGENT_SCHEDULER_METRICS_INTERVAL_MS", default_value_t = 5_000)]
    pub metrics_interval_ms: u64,

    /// Milliseconds to wait for a `submit_job`/`request_permit` reply before
    /// treating it as a rejection.
    #[arg(long, env = "AGENT_SCHEDULER_REQUEST_TIMEOUT_MS", default_value_t = 5_000)]
    pub request_timeout_ms: u64,

    /// Maximum entries retained in the in-memory dead-letter queue.
    #[arg(long, env = "AGENT_SCHEDULER_DLQ_CAPACITY", default_value_t = 1_000)]
    pub dlq_capacity: usize,

    /// Optional directory the DLQ mirrors entries to as JSON files.
    #[arg(long, env = "AGENT_SCHEDULER_DLQ_DIR")]
    pub dlq_dir: Option<PathBuf>,

    /// Emit `debug`-level spans for every inbound/outbound IPC message.
    #[arg(long, env = "AGENT_SCHEDULER_IPC_TRACE", default_value_t = false)]
    pub ipc_trace: bool,
}

impl Cli {
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_secs)
    }

    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}
