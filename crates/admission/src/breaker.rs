//! Circuit Breaker Registry (SPEC_FULL.md §4.4): per-key
//! CLOSED/HALF_OPEN/OPEN state machine over a caller-provided logical key
//! (typically worker kind).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use agent_common::CircuitState;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub half_open_probe_count: u32,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            half_open_probe_count: 3,
            success_threshold: 2,
        }
    }
}

struct KeyState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
}

impl KeyState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            probes_in_flight: 0,
        }
    }
}

pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    keys: Mutex<BTreeMap<String, KeyState>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            keys: Mutex::new(BTreeMap::new()),
        }
    }

    /// Transitions OPEN -> HALF_OPEN once the cooldown has elapsed, then
    /// returns the key's current state, admitting a limited number of
    /// probes while HALF_OPEN.
    pub async fn admit(&self, key: &str) -> CircuitState {
        let mut keys = self.keys.lock().await;
        let entry = keys.entry(key.to_string()).or_insert_with(KeyState::new);

        if entry.state == CircuitState::Open {
            if let Some(opened_at) = entry.opened_at {
                if opened_at.elapsed() >= self.config.cooldown {
                    entry.state = CircuitState::HalfOpen;
                    entry.probes_in_flight = 0;
                    entry.consecutive_successes = 0;
                }
            }
        }

        if entry.state == CircuitState::HalfOpen {
            if entry.probes_in_flight >= self.config.half_open_probe_count {
                return CircuitState::Open;
            }
            entry.probes_in_flight += 1;
        }

        entry.state
    }

    pub async fn record_success(&self, key: &str) {
        let mut keys = self.keys.lock().await;
        let entry = keys.entry(key.to_string()).or_insert_with(KeyState::new);
        match entry.state {
            CircuitState::Closed => {
                entry.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                entry.consecutive_successes += 1;
                if entry.consecutive_successes >= self.config.success_threshold {
                    entry.state = CircuitState::Closed;
                    entry.consecutive_failures = 0;
                    entry.consecutive_successes = 0;
                    entry.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self, key: &str) {
        let mut keys = self.keys.lock().await;
        let entry = keys.entry(key.to_string()).or_insert_with(KeyState::new);
        match entry.state {
            CircuitState::Closed => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= self.config.failure_threshold {
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Instant::now());
                entry.consecutive_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// A snapshot of every key's current state, embedded into issued permits.
    pub async fn snapshot(&self) -> BTreeMap<String, CircuitState> {
        self.keys
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.state))
            .collect()
    }
}
