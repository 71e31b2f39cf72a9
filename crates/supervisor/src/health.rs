//! Heartbeat-based health watchdog (§4.10): separate from the IPC protocol's
//! own request/response correlation, since `heartbeat`/`heartbeat_ack` carry
//! no `request_id` (§4.2) — a missed ack is "no ack arrived by the next
//! tick", not a request timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_ipc::{IpcProtocol, Message};
use tokio::task::JoinHandle;

pub type HangCallback = Arc<dyn Fn() + Send + Sync>;

pub struct HealthWatchdog {
    stop: Arc<AtomicBool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HealthWatchdog {
    /// Spawns the watchdog: sends a `heartbeat` every `interval`, and fires
    /// `hang_callback` after `miss_threshold` consecutive ticks without a
    /// `heartbeat_ack` seen in between.
    pub async fn spawn(
        protocol: Arc<IpcProtocol>,
        interval: Duration,
        miss_threshold: u32,
        hang_callback: HangCallback,
    ) -> Arc<Self> {
        let ack_seen = Arc::new(AtomicBool::new(false));
        {
            let ack_seen = Arc::clone(&ack_seen);
            protocol
                .on("heartbeat_ack", move |_msg| {
                    let ack_seen = Arc::clone(&ack_seen);
                    async move {
                        ack_seen.store(true, Ordering::SeqCst);
                    }
                })
                .await;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let task_stop = Arc::clone(&stop);
        let task = tokio::spawn(async move {
            let mut missed = 0u32;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if task_stop.load(Ordering::SeqCst) {
                    return;
                }
                ack_seen.store(false, Ordering::SeqCst);
                if protocol
                    .send(Message::Heartbeat { timestamp: now() })
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::time::sleep(interval).await;
                if task_stop.load(Ordering::SeqCst) {
                    return;
                }
                if ack_seen.load(Ordering::SeqCst) {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= miss_threshold {
                        hang_callback();
                        missed = 0;
                    }
                }
            }
        });

        Arc::new(Self {
            stop,
            task: tokio::sync::Mutex::new(Some(task)),
        })
    }

    pub async fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_ipc::transport::{FrameReader, FrameWriter};
    use std::sync::atomic::AtomicUsize;
    use tokio::io::duplex;

    fn pair() -> (Arc<IpcProtocol>, Arc<IpcProtocol>) {
        let (a, b) = duplex(8192);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        let side_a = IpcProtocol::new(FrameReader::new(a_read), FrameWriter::new(a_write));
        let side_b = IpcProtocol::new(FrameReader::new(b_read), FrameWriter::new(b_write));
        (side_a, side_b)
    }

    #[tokio::test]
    async fn healthy_core_never_trips_hang_callback() {
        let (supervisor_side, core_side) = pair();
        core_side
            .on("heartbeat", {
                let core_side = Arc::clone(&core_side);
                move |msg| {
                    let core_side = Arc::clone(&core_side);
                    async move {
                        if let Message::Heartbeat { timestamp } = msg {
                            let _ = core_side.send(Message::HeartbeatAck { timestamp }).await;
                        }
                    }
                }
            })
            .await;

        let hangs = Arc::new(AtomicUsize::new(0));
        let hangs_clone = Arc::clone(&hangs);
        let watchdog = HealthWatchdog::spawn(
            supervisor_side,
            Duration::from_millis(30),
            2,
            Arc::new(move || {
                hangs_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        watchdog.stop().await;
        assert_eq!(hangs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unresponsive_core_trips_hang_callback() {
        let (supervisor_side, _core_side) = pair();

        let hangs = Arc::new(AtomicUsize::new(0));
        let hangs_clone = Arc::clone(&hangs);
        let watchdog = HealthWatchdog::spawn(
            supervisor_side,
            Duration::from_millis(20),
            2,
            Arc::new(move || {
                hangs_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        watchdog.stop().await;
        assert!(hangs.load(Ordering::SeqCst) >= 1);
    }
}
