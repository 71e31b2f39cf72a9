//! The error-kind taxonomy of §7, shared across crates so each layer can
//! translate a lower layer's error into its own without losing the kind.

use thiserror::Error;

/// Distinct from message-level wire error codes (§6's `error` message type);
/// this is the internal classification layers translate into their own.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("system error: {0}")]
    System(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}
