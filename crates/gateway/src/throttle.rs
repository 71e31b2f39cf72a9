//! Job Event Throttle (SPEC_FULL.md §4.7): stdio filtering, UTF-8-safe
//! truncation, a per-job event budget, and coalesced progress forwarding.

use std::time::Duration;

use agent_common::WorkerEvent;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

pub const MAX_DATA_BYTES: usize = 16 * 1024;
pub const MAX_DIFF_BYTES: usize = 256 * 1024;
pub const MAX_EVENTS: u32 = 500;
pub const COALESCE_WINDOW: Duration = Duration::from_millis(100);

const TRUNCATION_SUFFIX: &str = "...(truncated)";

/// Truncates `s` to at most `max_bytes` UTF-8 bytes, dropping a trailing
/// partial codepoint and appending the truncation suffix.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut boundary = max_bytes;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!("{}{}", &s[..boundary], TRUNCATION_SUFFIX)
}

#[derive(Clone, Copy)]
pub struct EventThrottleConfig {
    /// Opt-in: `stdout`/`stderr` may carry secrets, filtered by default.
    pub forward_stdio: bool,
    pub max_data_bytes: usize,
    pub max_diff_bytes: usize,
    pub max_events: u32,
    pub coalesce_window: Duration,
}

impl Default for EventThrottleConfig {
    fn default() -> Self {
        Self {
            forward_stdio: false,
            max_data_bytes: MAX_DATA_BYTES,
            max_diff_bytes: MAX_DIFF_BYTES,
            max_events: MAX_EVENTS,
            coalesce_window: COALESCE_WINDOW,
        }
    }
}

/// Consumes raw adapter events from `inbound` and forwards filtered,
/// truncated, budgeted events to `outbound` until `inbound` closes.
pub async fn run(
    config: EventThrottleConfig,
    mut inbound: mpsc::Receiver<WorkerEvent>,
    outbound: mpsc::Sender<WorkerEvent>,
) {
    let mut forwarded_non_progress: u32 = 0;
    let mut budget_exhausted = false;
    let mut pending_progress: Option<WorkerEvent> = None;

    let mut ticker = tokio::time::interval(config.coalesce_window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = inbound.recv() => {
                match event {
                    None => break,
                    Some(event) => {
                        handle_event(
                            &config,
                            event,
                            &mut forwarded_non_progress,
                            &mut budget_exhausted,
                            &mut pending_progress,
                            &outbound,
                        )
                        .await;
                    }
                }
            }
            _ = ticker.tick() => {
                if let Some(progress) = pending_progress.take() {
                    let _ = outbound.send(progress).await;
                }
            }
        }
    }

    // Final flush on dispose (inbound closed).
    if let Some(progress) = pending_progress.take() {
        let _ = outbound.send(progress).await;
    }
}

async fn handle_event(
    config: &EventThrottleConfig,
    event: WorkerEvent,
    forwarded_non_progress: &mut u32,
    budget_exhausted: &mut bool,
    pending_progress: &mut Option<WorkerEvent>,
    outbound: &mpsc::Sender<WorkerEvent>,
) {
    match event {
        WorkerEvent::Progress { message, percent } => {
            // Progress bypasses the budget but coalesces: latest-wins within
            // the window, delivered by the ticker or the final flush.
            *pending_progress = Some(WorkerEvent::Progress {
                message: truncate_utf8(&message, config.max_data_bytes),
                percent,
            });
        }
        WorkerEvent::Stdout { data } => {
            if !config.forward_stdio {
                return;
            }
            forward_non_progress(
                WorkerEvent::Stdout {
                    data: truncate_utf8(&data, config.max_data_bytes),
                },
                config,
                forwarded_non_progress,
                budget_exhausted,
                outbound,
            )
            .await;
        }
        WorkerEvent::Stderr { data } => {
            if !config.forward_stdio {
                return;
            }
            forward_non_progress(
                WorkerEvent::Stderr {
                    data: truncate_utf8(&data, config.max_data_bytes),
                },
                config,
                forwarded_non_progress,
                budget_exhausted,
                outbound,
            )
            .await;
        }
        WorkerEvent::Patch { file_path, diff } => {
            forward_non_progress(
                WorkerEvent::Patch {
                    file_path,
                    diff: truncate_utf8(&diff, config.max_diff_bytes),
                },
                config,
                forwarded_non_progress,
                budget_exhausted,
                outbound,
            )
            .await;
        }
    }
}

async fn forward_non_progress(
    event: WorkerEvent,
    config: &EventThrottleConfig,
    forwarded_non_progress: &mut u32,
    budget_exhausted: &mut bool,
    outbound: &mpsc::Sender<WorkerEvent>,
) {
    if *budget_exhausted {
        return;
    }
    if *forwarded_non_progress >= config.max_events {
        *budget_exhausted = true;
        let _ = outbound
            .send(WorkerEvent::Progress {
                message: "(logs truncated)".to_string(),
                percent: None,
            })
            .await;
        return;
    }
    *forwarded_non_progress += 1;
    let _ = outbound.send(event).await;
}
