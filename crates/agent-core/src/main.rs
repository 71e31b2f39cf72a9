mod cli;
mod orchestrator;
mod task;

use std::sync::Arc;
use std::time::Duration;

use agent_admission::{
    BackpressureConfig, BackpressureController, CircuitBreakerConfig, CircuitBreakerRegistry,
    ExecutionBudgetConfig, PermitGate,
};
use agent_gateway::{AdapterRegistry, EventThrottleConfig, ShellAdapter, WorkerDelegationGateway};
use agent_ipc::transport::{FrameReader, FrameWriter};
use agent_ipc::IpcProtocol;
use clap::Parser;
use tokio::net::{TcpStream, UnixStream};

use crate::cli::Cli;
use crate::orchestrator::CoreOrchestrator;

/// Connects the protocol over whichever transport the Supervisor wired up
/// via environment (§4.10's priority: socket > tcp > stdio), falling back
/// to this process's own stdin/stdout when spawned without either.
async fn connect() -> anyhow::Result<Arc<IpcProtocol>> {
    if let Ok(path) = std::env::var("AGENT_IPC_SOCKET_PATH") {
        let stream = UnixStream::connect(&path).await?;
        let (read_half, write_half) = tokio::io::split(stream);
        return Ok(IpcProtocol::new(FrameReader::new(read_half), FrameWriter::new(write_half)));
    }

    if let (Ok(host), Ok(port)) = (
        std::env::var("AGENT_IPC_SOCKET_HOST"),
        std::env::var("AGENT_IPC_SOCKET_PORT"),
    ) {
        let port: u16 = port.parse()?;
        let stream = TcpStream::connect((host.as_str(), port)).await?;
        let (read_half, write_half) = tokio::io::split(stream);
        return Ok(IpcProtocol::new(FrameReader::new(read_half), FrameWriter::new(write_half)));
    }

    Ok(IpcProtocol::new(
        FrameReader::new(tokio::io::stdin()),
        FrameWriter::new(tokio::io::stdout()),
    ))
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
    tracing::info!(version = env!("CARGO_PKG_VERSION"), ?cli, "agent-core starting");

    let protocol = connect().await?;

    let mut registry = AdapterRegistry::new();
    registry.register("shell", Arc::new(ShellAdapter));
    let gateway = Arc::new(WorkerDelegationGateway::new(
        registry,
        EventThrottleConfig {
            forward_stdio: cli.forward_stdio,
            ..EventThrottleConfig::default()
        },
    ));

    let permit_gate = Arc::new(PermitGate::new(
        CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: cli.breaker_failure_threshold,
            cooldown: cli.breaker_cooldown(),
            ..CircuitBreakerConfig::default()
        }),
        BackpressureController::new(BackpressureConfig {
            max_active_permits: cli.max_active_permits,
            max_queue_depth: cli.max_queue_depth,
            max_latency_ms: cli.max_latency_ms,
            ..BackpressureConfig::default()
        }),
        ExecutionBudgetConfig {
            max_concurrency: cli.max_concurrency,
            max_rps: cli.max_rps,
            cost_budget: None,
        },
    ));

    let orchestrator = CoreOrchestrator::new(Arc::clone(&protocol), permit_gate, gateway);
    orchestrator.start().await;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
        _ = wait_until_stopped(&protocol) => {
            tracing::info!("ipc protocol disconnected, shutting down");
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

async fn wait_until_stopped(protocol: &Arc<IpcProtocol>) {
    loop {
        if protocol.is_stopped() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
