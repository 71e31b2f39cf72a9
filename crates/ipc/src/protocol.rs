//! Typed request/response + notification router over a [`LineFramedTransport`]
//! (SPEC_FULL.md §4.2).
//!
//! Grounded on `client-engine::engine`'s split between a cooperative
//! `tokio::select!` loop and channel-fed command/event queues: here the read
//! half runs its own task dispatching inbound frames, while outbound sends go
//! through an `mpsc` queue drained by a dedicated write task, so handler code
//! and typed helper methods can call `send`/`request` concurrently without
//! fighting over `&mut` access to the socket.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use agent_common::{CoreError, Id};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::message::Message;
use crate::transport::{Frame, FrameReader, FrameWriter};

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Handler = Arc<dyn Fn(Message) -> HandlerFuture + Send + Sync>;

/// Registers async handlers for notification-style messages and routes
/// request/response pairs by `requestId`. One instance wraps one
/// [`LineFramedTransport`] connection; `type_tag()` not present in
/// `pending` is dispatched to a registered handler, never both (§4.2's
/// correlation-exclusivity rule).
pub struct IpcProtocol {
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>,
    handlers: Arc<Mutex<HashMap<&'static str, Handler>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    write_task: Mutex<Option<JoinHandle<()>>>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
}

impl IpcProtocol {
    pub fn new<R, W>(reader: FrameReader<R>, writer: FrameWriter<W>) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let protocol = Arc::new(Self {
            outbound_tx: Mutex::new(Some(outbound_tx)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            handlers: Arc::new(Mutex::new(HashMap::new())),
            read_task: Mutex::new(None),
            write_task: Mutex::new(None),
            stopped: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        });
        protocol.spawn_tasks(reader, writer, outbound_rx);
        protocol
    }

    fn spawn_tasks<R, W>(
        self: &Arc<Self>,
        mut reader: FrameReader<R>,
        mut writer: FrameWriter<W>,
        mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let write_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(err) = writer.write(&msg).await {
                    tracing::warn!(error = %err, "ipc write failed, stopping write loop");
                    break;
                }
            }
            writer.close().await;
        });

        let this = Arc::clone(self);
        let read_task = tokio::spawn(async move {
            loop {
                match reader.next_message().await {
                    None => {
                        this.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
                        break;
                    }
                    Some(Frame::Overflow { size, max }) => {
                        tracing::warn!(size, max, "ipc frame exceeded max size, dropped");
                    }
                    Some(Frame::ParseError { raw }) => {
                        tracing::warn!(raw, "ipc line failed to parse as json, dropped");
                    }
                    Some(Frame::Message(value)) => {
                        let Some(msg) = Message::from_value(value) else {
                            tracing::warn!("ipc message failed validation, dropped");
                            continue;
                        };
                        this.dispatch(msg).await;
                    }
                }
            }
        });

        // `spawn_tasks` is only ever called from `new`, before any other
        // holder of the Mutex could contend, so these never block.
        *self.read_task.try_lock().expect("uncontended at construction") = Some(read_task);
        *self.write_task.try_lock().expect("uncontended at construction") = Some(write_task);
    }

    /// Correlates by `requestId` first; only dispatches to a type handler
    /// when no waiter claims the message (§4.2).
    async fn dispatch(self: &Arc<Self>, msg: Message) {
        if let Some(request_id) = msg.request_id() {
            let mut pending = self.pending.lock().await;
            if let Some(waiter) = pending.remove(request_id.as_str()) {
                drop(pending);
                let _ = waiter.send(msg);
                return;
            }
        }

        let handler = {
            let handlers = self.handlers.lock().await;
            handlers.get(msg.type_tag()).cloned()
        };
        match handler {
            Some(handler) => {
                let fut = handler(msg);
                // Isolate handler panics so one bad handler doesn't kill the
                // dispatch loop.
                if let Err(panic) = tokio::spawn(fut).await {
                    tracing::error!(panic = %panic, "ipc handler panicked");
                }
            }
            None => {
                tracing::debug!(type_tag = msg.type_tag(), "no handler registered, dropped");
            }
        }
    }

    /// Registers (or replaces) the handler for a notification-style message
    /// type, keyed by its wire `type` tag (e.g. `"job_completed"`).
    pub async fn on<F, Fut>(&self, type_tag: &'static str, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped: Handler = Arc::new(move |msg| Box::pin(handler(msg)));
        self.handlers.lock().await.insert(type_tag, wrapped);
    }

    /// Sends a message without awaiting a response.
    pub async fn send(&self, msg: Message) -> Result<(), CoreError> {
        match self.outbound_tx.lock().await.as_ref() {
            Some(tx) => tx
                .send(msg)
                .map_err(|_| CoreError::Transport("ipc write queue closed".into())),
            None => Err(CoreError::Transport("ipc protocol stopped".into())),
        }
    }

    /// Sends `msg` (which must carry `request_id`) and awaits the correlated
    /// reply, or a timeout error if none arrives in time.
    pub async fn request(&self, request_id: &Id, msg: Message, timeout: Duration) -> Result<Message, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(request_id.as_str().to_string(), tx);
        if let Err(err) = self.send(msg).await {
            self.pending.lock().await.remove(request_id.as_str());
            return Err(err);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(CoreError::Protocol("response channel dropped".into())),
            Err(_) => {
                self.pending.lock().await.remove(request_id.as_str());
                Err(CoreError::Protocol(format!(
                    "no response for request {request_id} within {timeout:?}"
                )))
            }
        }
    }

    /// `true` once the read half has observed EOF/disconnect.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Idempotent: aborts the read loop, drops the outbound sender (which
    /// lets the write loop drain and exit), and rejects any pending waiters
    /// with a stopped error.
    pub async fn stop(&self) {
        if let Some(task) = self.read_task.lock().await.take() {
            task.abort();
        }
        self.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
        self.outbound_tx.lock().await.take();
        if let Some(task) = self.write_task.lock().await.take() {
            let _ = task.await;
        }
        for (_, waiter) in self.pending.lock().await.drain() {
            drop(waiter);
        }
    }
}
