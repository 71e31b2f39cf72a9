mod cli;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use agent_ipc::{EscalationEvent, Message};
use agent_scheduler_core::{Scheduler, SchedulerConfig};
use agent_supervisor::{Supervisor, SupervisorConfig};
use clap::Parser;
use tokio::sync::mpsc;

use crate::cli::Cli;

fn supervisor_config(cli: &Cli) -> SupervisorConfig {
    let mut config = SupervisorConfig::new(cli.core_program.clone());
    config.args = cli.core_args.clone();
    config.transport = cli.transport.into();
    config.accept_timeout = cli.accept_timeout();
    config.graceful_shutdown_ms = cli.graceful_shutdown_ms;
    config.restart_window = cli.restart_window();
    config.restart_max = cli.restart_max;
    config.health_interval = cli.health_interval();
    config.health_miss_threshold = cli.health_miss_threshold;
    config
}

fn scheduler_config(cli: &Cli) -> SchedulerConfig {
    SchedulerConfig {
        drain_timeout_ms: cli.drain_timeout_ms,
        metrics_interval_ms: cli.metrics_interval_ms,
        request_timeout_ms: cli.request_timeout_ms,
        dlq_capacity: cli.dlq_capacity,
        dlq_dir: cli.dlq_dir.clone(),
    }
}

/// A `tracing::warn!` escalation handler; registered fresh on every
/// (re)spawned Core protocol.
async fn register_escalation_handler(protocol: &Arc<agent_ipc::IpcProtocol>) {
    protocol
        .on("escalation", |msg| async move {
            if let Message::Escalation { event } = msg {
                let EscalationEvent { scope, action, target, reason, severity, .. } = event;
                tracing::warn!(%scope, %action, %target, %reason, ?severity, "core escalation");
            }
        })
        .await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), ?cli, "agent-scheduler starting");

    // Bridges the Supervisor's synchronous crash/restart-limit callbacks
    // into the async main loop below.
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<Signal>();

    let crash_tx = signal_tx.clone();
    let restart_limit_tx = signal_tx.clone();
    let hangs = Arc::new(AtomicUsize::new(0));
    let hang_tx = signal_tx;

    let supervisor = Supervisor::new(
        supervisor_config(&cli),
        Arc::new(move |code: i32| {
            let _ = crash_tx.send(Signal::Crashed(code));
        }),
        Arc::new(move || {
            let _ = restart_limit_tx.send(Signal::RestartLimitReached);
        }),
        Arc::new(move || {
            hangs.fetch_add(1, Ordering::SeqCst);
            let _ = hang_tx.send(Signal::Hung);
        }),
    );

    let protocol = supervisor.spawn_core().await?;
    register_escalation_handler(&protocol).await;
    let mut scheduler = Scheduler::new(protocol, scheduler_config(&cli))?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, shutting down");
                break;
            }
            signal = signal_rx.recv() => {
                match signal {
                    Some(Signal::Crashed(code)) => {
                        tracing::warn!(exit_code = code, "core process crashed, restarting");
                        scheduler.shutdown().await;
                        match supervisor.restart_core().await {
                            Ok(agent_supervisor::RestartOutcome::Restarted(protocol)) => {
                                register_escalation_handler(&protocol).await;
                                scheduler = Scheduler::new(protocol, scheduler_config(&cli))?;
                            }
                            Ok(agent_supervisor::RestartOutcome::LimitReached) => {
                                tracing::error!("restart limit reached, giving up");
                                return Err(anyhow::anyhow!("core restart limit reached"));
                            }
                            Err(err) => {
                                tracing::error!(error = %err, "failed to restart core");
                                return Err(err.into());
                            }
                        }
                    }
                    Some(Signal::RestartLimitReached) => {
                        tracing::error!("restart limit reached, giving up");
                        return Err(anyhow::anyhow!("core restart limit reached"));
                    }
                    Some(Signal::Hung) => {
                        tracing::warn!("core missed consecutive heartbeats");
                    }
                    None => break,
                }
            }
        }
    }

    scheduler.shutdown().await;
    let _ = supervisor.kill_core().await;
    Ok(())
}

enum Signal {
    Crashed(i32),
    RestartLimitReached,
    Hung,
}
