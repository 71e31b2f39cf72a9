//! Core process configuration (SPEC_FULL.md §10): one typed `clap` struct,
//! every knob a flag with an environment-variable fallback and a documented
//! default. Resolved once in `main` and passed down explicitly.

use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "agent-core", version, about = "Core process of the agent execution platform")]
pub struct Cli {
    /// Maximum number of permits granted concurrently.
    #[arg(long, env = "AGENT_CORE_MAX_CONCURRENCY", default_value_t = 100)]
    pub max_concurrency: u32,

    /// Token-bucket refill rate backing the rate limit, in requests/sec.
    #[arg(long, env = "AGENT_CORE_MAX_RPS", default_value_t = 200)]
    pub max_rps: u32,

    /// Consecutive failures before a worker kind's breaker opens.
    #[arg(long, env = "AGENT_CORE_BREAKER_FAILURE_THRESHOLD", default_value_t = 5)]
    pub breaker_failure_threshold: u32,

    /// Seconds an open breaker waits before probing half-open.
    #[arg(long, env = "AGENT_CORE_BREAKER_COOLDOWN_SECS", default_value_t = 30)]
    pub breaker_cooldown_secs: u64,

    /// Active-permit count treated as 100% load for backpressure.
    #[arg(long, env = "AGENT_CORE_MAX_ACTIVE_PERMITS", default_value_t = 100)]
    pub max_active_permits: u64,

    /// Queue depth treated as 100% load for backpressure.
    #[arg(long, env = "AGENT_CORE_MAX_QUEUE_DEPTH", default_value_t = 500)]
    pub max_queue_depth: u64,

    /// Average job latency treated as 100% load for backpressure.
    #[arg(long, env = "AGENT_CORE_MAX_LATENCY_MS", default_value_t = 5_000)]
    pub max_latency_ms: u64,

    /// Forward raw stdout/stderr worker events instead of filtering them.
    #[arg(long, env = "AGENT_CORE_FORWARD_STDIO", default_value_t = false)]
    pub forward_stdio: bool,

    /// Emit `debug`-level spans for every inbound/outbound IPC message.
    #[arg(long, env = "AGENT_CORE_IPC_TRACE", default_value_t = false)]
    pub ipc_trace: bool,

    /// Heartbeat interval sent by the Supervisor's watchdog; informational
    /// only here since the Core answers whatever cadence it is sent.
    #[arg(long, env = "AGENT_CORE_HEARTBEAT_LOG_SECS", default_value_t = 60)]
    pub heartbeat_log_secs: u64,
}

impl Cli {
    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}
