//! `Supervisor`: owns the Core subprocess across its whole lifecycle —
//! spawn, health-watch, restart-on-crash, and kill (§4.10). Grounded on the
//! teacher's `ShutdownController`/ctrl-c handler split (`client::shutdown`):
//! there the parent reacts to an external signal; here the Supervisor is the
//! one sending it, so the graceful-then-forceful escalation is the same
//! shape turned around.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_ipc::IpcProtocol;
use tokio::process::Command;
use tokio::sync::{watch, Mutex};

use crate::health::{HangCallback, HealthWatchdog};
use crate::restart::RestartTracker;
use crate::transport::{self, TransportError, TransportKind};

pub type CrashCallback = Arc<dyn Fn(i32) + Send + Sync>;
pub type RestartLimitCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("a restart is already in progress")]
    RestartInProgress,
    #[error("spawned core process has no pid")]
    NoPid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    AlreadyExited,
    Graceful,
    ForceKilled,
}

pub enum RestartOutcome {
    Restarted(Arc<IpcProtocol>),
    LimitReached,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub program: String,
    pub args: Vec<String>,
    pub transport: TransportKind,
    pub accept_timeout: Duration,
    pub socket_dir: PathBuf,
    pub graceful_shutdown_ms: u64,
    pub restart_window: Duration,
    pub restart_max: u32,
    pub health_interval: Duration,
    pub health_miss_threshold: u32,
}

impl SupervisorConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            transport: TransportKind::Stdio,
            accept_timeout: Duration::from_secs(10),
            socket_dir: std::env::temp_dir(),
            graceful_shutdown_ms: 5_000,
            restart_window: Duration::from_secs(60),
            restart_max: 5,
            health_interval: Duration::from_secs(10),
            health_miss_threshold: 3,
        }
    }
}

struct CoreHandle {
    protocol: Arc<IpcProtocol>,
    pid: u32,
    socket_path: Option<PathBuf>,
    exit_rx: watch::Receiver<Option<i32>>,
    watchdog: Arc<HealthWatchdog>,
}

/// One Core subprocess, supervised for its whole life: `spawn_core` starts
/// it, `kill_core` stops it, `restart_core` does both under the restart cap.
/// No queue/permit/job logic lives here (`agent-scheduler-core`/`agent-core`
/// own that); this crate only knows about the Core as an OS process.
pub struct Supervisor {
    config: SupervisorConfig,
    current: Mutex<Option<CoreHandle>>,
    restart_tracker: Mutex<RestartTracker>,
    restart_in_progress: AtomicBool,
    expected_exit: Arc<AtomicBool>,
    crash_callback: CrashCallback,
    restart_limit_callback: RestartLimitCallback,
    hang_callback: HangCallback,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        crash_callback: CrashCallback,
        restart_limit_callback: RestartLimitCallback,
        hang_callback: HangCallback,
    ) -> Arc<Self> {
        let restart_tracker = RestartTracker::new(config.restart_max, config.restart_window);
        Arc::new(Self {
            config,
            current: Mutex::new(None),
            restart_tracker: Mutex::new(restart_tracker),
            restart_in_progress: AtomicBool::new(false),
            expected_exit: Arc::new(AtomicBool::new(false)),
            crash_callback,
            restart_limit_callback,
            hang_callback,
        })
    }

    /// Spawns the Core, waits for it to connect, and starts its health
    /// watchdog. Returns the bound IPC protocol.
    pub async fn spawn_core(&self) -> Result<Arc<IpcProtocol>, SupervisorError> {
        let mut command = Command::new(&self.config.program);
        command.args(&self.config.args);

        let spawned = transport::spawn_with_transport(
            command,
            self.config.transport,
            self.config.accept_timeout,
            &self.config.socket_dir,
        )
        .await?;

        let pid = spawned.child.id().ok_or(SupervisorError::NoPid)?;
        let mut child = spawned.child;
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(async move {
            let status = child.wait().await;
            let code = status.ok().and_then(|s| s.code()).unwrap_or(-1);
            let _ = exit_tx.send(Some(code));
        });

        self.expected_exit.store(false, Ordering::SeqCst);
        let expected_exit = Arc::clone(&self.expected_exit);
        let crash_callback = Arc::clone(&self.crash_callback);
        let mut watch_rx = exit_rx.clone();
        tokio::spawn(async move {
            if watch_rx.changed().await.is_err() {
                return;
            }
            let code = watch_rx.borrow().unwrap_or(-1);
            if !expected_exit.load(Ordering::SeqCst) {
                crash_callback(code);
            }
        });

        let watchdog = HealthWatchdog::spawn(
            Arc::clone(&spawned.protocol),
            self.config.health_interval,
            self.config.health_miss_threshold,
            Arc::clone(&self.hang_callback),
        )
        .await;

        let protocol = Arc::clone(&spawned.protocol);
        *self.current.lock().await = Some(CoreHandle {
            protocol: Arc::clone(&protocol),
            pid,
            socket_path: spawned.socket_path,
            exit_rx,
            watchdog,
        });
        Ok(protocol)
    }

    /// Stops the health checker and protocol, sends `SIGTERM`, waits
    /// `graceful_shutdown_ms`, escalates to `SIGKILL`, then cleans up any
    /// socket artifacts.
    pub async fn kill_core(&self) -> Result<KillOutcome, SupervisorError> {
        let Some(handle) = self.current.lock().await.take() else {
            return Ok(KillOutcome::AlreadyExited);
        };

        handle.watchdog.stop().await;
        handle.protocol.stop().await;
        self.expected_exit.store(true, Ordering::SeqCst);

        let mut exit_rx = handle.exit_rx;
        if exit_rx.borrow().is_some() {
            cleanup_socket(&handle.socket_path);
            return Ok(KillOutcome::AlreadyExited);
        }

        // SAFETY: `pid` is a still-tracked child pid owned by this process;
        // kill(2) on a valid pid with SIGTERM/SIGKILL has no memory effects.
        unsafe {
            libc::kill(handle.pid as libc::pid_t, libc::SIGTERM);
        }

        let outcome = match tokio::time::timeout(
            Duration::from_millis(self.config.graceful_shutdown_ms),
            exit_rx.changed(),
        )
        .await
        {
            Ok(_) => KillOutcome::Graceful,
            Err(_) => {
                unsafe {
                    libc::kill(handle.pid as libc::pid_t, libc::SIGKILL);
                }
                let _ = exit_rx.changed().await;
                KillOutcome::ForceKilled
            }
        };

        cleanup_socket(&handle.socket_path);
        Ok(outcome)
    }

    /// Guarded by an in-progress flag; enforces the sliding-window restart
    /// cap before killing and respawning the Core.
    pub async fn restart_core(&self) -> Result<RestartOutcome, SupervisorError> {
        if self.restart_in_progress.swap(true, Ordering::SeqCst) {
            return Err(SupervisorError::RestartInProgress);
        }
        let result = self.restart_core_inner().await;
        self.restart_in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn restart_core_inner(&self) -> Result<RestartOutcome, SupervisorError> {
        let allowed = self.restart_tracker.lock().await.try_record(Instant::now());
        if !allowed {
            (self.restart_limit_callback)();
            return Ok(RestartOutcome::LimitReached);
        }
        self.kill_core().await?;
        let protocol = self.spawn_core().await?;
        Ok(RestartOutcome::Restarted(protocol))
    }
}

fn cleanup_socket(path: &Option<PathBuf>) {
    if let Some(path) = path {
        let _ = std::fs::remove_file(path);
    }
}
