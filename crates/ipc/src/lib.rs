//! Line-framed transport and typed protocol router for the Scheduler<->Core
//! IPC boundary (SPEC_FULL.md §4.1, §4.2, §6).

pub mod message;
pub mod protocol;
pub mod transport;

pub use message::{EscalationEvent, EscalationSeverity, Message, Outcome};
pub use protocol::IpcProtocol;
pub use transport::{Frame, FrameReader, FrameWriter, LineFramedTransport, WriteError, DEFAULT_MAX_FRAME_BYTES};
