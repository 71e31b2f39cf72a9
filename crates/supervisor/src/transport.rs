//! Core transport selection (§4.10): `stdio` by default, a Unix-domain
//! socket when configured, falling back to a loopback TCP socket when the
//! platform refuses the Unix socket outright.
//!
//! Grounded on `ipc::transport::{FrameReader, FrameWriter}` (this crate only
//! chooses and wires the byte stream; framing and message typing are
//! `agent-ipc`'s job) and on the teacher's own `tokio::process::Command`
//! usage in `client-engine` for spawning and piping a child process.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_ipc::transport::{FrameReader, FrameWriter};
use agent_ipc::IpcProtocol;
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::process::{Child, Command};

/// Which byte-stream carries the IPC protocol between Scheduler and Core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Socket,
    Tcp,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to spawn core process: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to bind {kind:?} transport: {source}")]
    Bind {
        kind: TransportKind,
        #[source]
        source: io::Error,
    },
    #[error("core did not connect within {0:?}")]
    AcceptTimeout(Duration),
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

/// Errno families for which a Unix-socket bind should fall back to TCP
/// rather than propagate, per §4.10: permission/support failures on the
/// platform, not transient/resource failures.
const SOCKET_FALLBACK_ERRNOS: &[i32] = &[
    libc::EPERM,
    libc::EACCES,
    libc::ENOTSUP,
    libc::EOPNOTSUPP,
    libc::EAFNOSUPPORT,
    libc::EPROTONOSUPPORT,
    libc::ENOSYS,
    libc::EINVAL,
    libc::ENAMETOOLONG,
];

pub fn is_socket_fallback_error(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if SOCKET_FALLBACK_ERRNOS.contains(&code))
}

pub struct SpawnedCore {
    pub child: Child,
    pub protocol: std::sync::Arc<IpcProtocol>,
    pub transport_kind: TransportKind,
    pub(crate) socket_path: Option<PathBuf>,
}

/// Spawns `command` wired to `preferred`, falling back from `Socket` to
/// `Tcp` when the bind fails with a `SOCKET_FALLBACK_ERRNOS` error.
pub async fn spawn_with_transport(
    command: Command,
    preferred: TransportKind,
    accept_timeout: Duration,
    socket_dir: &Path,
) -> Result<SpawnedCore, TransportError> {
    match preferred {
        TransportKind::Stdio => spawn_stdio(command).await,
        TransportKind::Tcp => spawn_tcp(command, accept_timeout).await,
        TransportKind::Socket => {
            let socket_path = socket_dir.join("core.sock");
            let _ = std::fs::remove_file(&socket_path);
            match UnixListener::bind(&socket_path) {
                Ok(listener) => spawn_unix(command, listener, socket_path, accept_timeout).await,
                Err(err) if is_socket_fallback_error(&err) => {
                    tracing::warn!(error = %err, "unix socket bind refused, falling back to tcp");
                    spawn_tcp(command, accept_timeout).await
                }
                Err(err) => Err(TransportError::Bind { kind: TransportKind::Socket, source: err }),
            }
        }
    }
}

async fn spawn_stdio(mut command: Command) -> Result<SpawnedCore, TransportError> {
    command
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped());
    let mut child = command.spawn().map_err(TransportError::Spawn)?;
    let stdin = child.stdin.take().expect("piped stdin");
    let stdout = child.stdout.take().expect("piped stdout");
    let protocol = IpcProtocol::new(FrameReader::new(stdout), FrameWriter::new(stdin));
    Ok(SpawnedCore {
        child,
        protocol,
        transport_kind: TransportKind::Stdio,
        socket_path: None,
    })
}

async fn spawn_unix(
    mut command: Command,
    listener: UnixListener,
    socket_path: PathBuf,
    accept_timeout: Duration,
) -> Result<SpawnedCore, TransportError> {
    command.env("AGENT_IPC_SOCKET_PATH", &socket_path);
    let child = command.spawn().map_err(TransportError::Spawn)?;

    let stream: UnixStream = tokio::time::timeout(accept_timeout, listener.accept())
        .await
        .map_err(|_| TransportError::AcceptTimeout(accept_timeout))?
        .map_err(TransportError::Accept)?
        .0;
    // Stop accepting further connections immediately; `listener` is simply
    // dropped without waiting on anything else to close.
    drop(listener);

    let (read_half, write_half) = tokio::io::split(stream);
    let protocol = IpcProtocol::new(FrameReader::new(read_half), FrameWriter::new(write_half));
    Ok(SpawnedCore {
        child,
        protocol,
        transport_kind: TransportKind::Socket,
        socket_path: Some(socket_path),
    })
}

async fn spawn_tcp(mut command: Command, accept_timeout: Duration) -> Result<SpawnedCore, TransportError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|source| TransportError::Bind { kind: TransportKind::Tcp, source })?;
    let addr = listener
        .local_addr()
        .map_err(|source| TransportError::Bind { kind: TransportKind::Tcp, source })?;
    command
        .env("AGENT_IPC_SOCKET_HOST", addr.ip().to_string())
        .env("AGENT_IPC_SOCKET_PORT", addr.port().to_string());
    let child = command.spawn().map_err(TransportError::Spawn)?;

    let stream: TcpStream = tokio::time::timeout(accept_timeout, listener.accept())
        .await
        .map_err(|_| TransportError::AcceptTimeout(accept_timeout))?
        .map_err(TransportError::Accept)?
        .0;
    drop(listener);

    let (read_half, write_half) = tokio::io::split(stream);
    let protocol = IpcProtocol::new(FrameReader::new(read_half), FrameWriter::new(write_half));
    Ok(SpawnedCore {
        child,
        protocol,
        transport_kind: TransportKind::Tcp,
        socket_path: None,
    })
}
