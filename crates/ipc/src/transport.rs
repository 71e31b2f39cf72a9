//! Line-framed transport (SPEC_FULL.md §4.1): a bidirectional byte stream
//! turned into a sequence of newline-delimited JSON values.
//!
//! Grounded on the teacher's own split of "accumulate until a boundary, then
//! hand back one parsed unit" (`client-engine::inflight::InflightStore`
//! reads a whole file and parses it in one shot; here the boundary is a
//! single `\n` instead of EOF, so the accumulation has to survive partial
//! reads across multiple calls). Read and write halves are split so the
//! protocol layer (§4.2) can run one read loop and one write loop
//! concurrently, same as it would own two halves of a split TCP/Unix socket.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default per-line byte budget (§4.1).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("value could not be serialised: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("frame of {size} bytes exceeds the {max}-byte limit")]
    BufferOverflow { size: usize, max: usize },
    #[error("transport is disconnected")]
    Disconnect(#[source] std::io::Error),
}

/// One item produced by [`FrameReader::next_message`].
#[derive(Debug)]
pub enum Frame {
    /// A line parsed successfully into a JSON value.
    Message(Value),
    /// A line that failed to parse as JSON. Carries the raw line, truncated
    /// if long, so callers can log it without risking unbounded output.
    ParseError { raw: String },
    /// A line (or partial line) whose byte length exceeded the configured
    /// maximum before a terminating `\n` was found.
    Overflow { size: usize, max: usize },
}

const PARSE_ERROR_RAW_PREVIEW: usize = 2048;

/// The read half: turns a byte stream into a lazy, finite sequence of
/// [`Frame`]s.
pub struct FrameReader<R> {
    reader: R,
    max_frame_bytes: usize,
    buf: Vec<u8>,
    read_chunk: [u8; 8192],
    discarding: bool,
    closed: bool,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self::with_max_frame_bytes(reader, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            max_frame_bytes,
            buf: Vec::new(),
            read_chunk: [0u8; 8192],
            discarding: false,
            closed: false,
        }
    }

    /// Returns the next frame, or `None` once the stream is exhausted
    /// (EOF/close). Non-restartable: once `None` is returned, subsequent
    /// calls keep returning `None`.
    pub async fn next_message(&mut self) -> Option<Frame> {
        if self.closed {
            return None;
        }
        loop {
            if let Some(frame) = self.try_extract_one() {
                return Some(frame);
            }

            let n = match self.reader.read(&mut self.read_chunk).await {
                Ok(n) => n,
                Err(_) => {
                    self.closed = true;
                    self.buf.clear();
                    return None;
                }
            };
            if n == 0 {
                // EOF. A partial, LF-less buffer is discarded without error (§4.1).
                self.closed = true;
                self.buf.clear();
                return None;
            }

            Self::ingest_chunk(&mut self.buf, &mut self.discarding, &self.read_chunk[..n]);
        }
    }

    /// Folds one freshly-read chunk into `buf`. While `discarding`, the
    /// chunk is scanned for the oversized line's terminator instead of being
    /// buffered, so a peer that never sends `\n` can't grow `buf` without
    /// bound (§4.1).
    fn ingest_chunk(buf: &mut Vec<u8>, discarding: &mut bool, chunk: &[u8]) {
        if *discarding {
            if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
                *discarding = false;
                buf.extend_from_slice(&chunk[pos + 1..]);
            }
        } else {
            buf.extend_from_slice(chunk);
        }
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.buf.clear();
    }

    /// Pulls exactly one frame out of `self.buf` if a complete line is
    /// present; otherwise returns `None` so the caller reads more bytes.
    fn try_extract_one(&mut self) -> Option<Frame> {
        loop {
            let Some(lf_pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if !self.discarding && self.buf.len() > self.max_frame_bytes {
                    let size = self.buf.len();
                    self.buf.clear();
                    self.discarding = true;
                    return Some(Frame::Overflow {
                        size,
                        max: self.max_frame_bytes,
                    });
                }
                return None;
            };

            let line: Vec<u8> = self.buf.drain(..=lf_pos).collect();
            let line = &line[..line.len() - 1]; // drop the LF itself; CR (if any) is content.

            if self.discarding {
                self.discarding = false;
                continue; // the oversized frame's tail is discarded silently, not re-surfaced.
            }

            if line.len() > self.max_frame_bytes {
                return Some(Frame::Overflow {
                    size: line.len(),
                    max: self.max_frame_bytes,
                });
            }

            if line.is_empty() {
                continue; // empty lines between frames are skipped (§4.1).
            }

            match serde_json::from_slice::<Value>(line) {
                Ok(value) => return Some(Frame::Message(value)),
                Err(_) => {
                    let raw = String::from_utf8_lossy(line);
                    let raw = if raw.len() > PARSE_ERROR_RAW_PREVIEW {
                        format!("{}...(truncated)", &raw[..PARSE_ERROR_RAW_PREVIEW])
                    } else {
                        raw.into_owned()
                    };
                    return Some(Frame::ParseError { raw });
                }
            }
        }
    }
}

/// The write half: serialises one value at a time, each followed by `\n`.
pub struct FrameWriter<W> {
    writer: W,
    max_frame_bytes: usize,
    closed: bool,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self::with_max_frame_bytes(writer, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(writer: W, max_frame_bytes: usize) -> Self {
        Self {
            writer,
            max_frame_bytes,
            closed: false,
        }
    }

    /// Serialises `value` and writes it followed by a single `\n`.
    pub async fn write<T: Serialize>(&mut self, value: &T) -> Result<(), WriteError> {
        if self.closed {
            return Err(WriteError::Disconnect(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport closed",
            )));
        }
        let mut bytes = serde_json::to_vec(value)?;
        bytes.push(b'\n');
        if bytes.len() > self.max_frame_bytes {
            return Err(WriteError::BufferOverflow {
                size: bytes.len(),
                max: self.max_frame_bytes,
            });
        }
        self.writer
            .write_all(&bytes)
            .await
            .map_err(WriteError::Disconnect)?;
        self.writer.flush().await.map_err(WriteError::Disconnect)?;
        Ok(())
    }

    /// Idempotent; releases the write direction.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.writer.shutdown().await;
    }
}

/// A convenience pairing of [`FrameReader`] and [`FrameWriter`] for callers
/// that don't need to split the two across tasks.
pub struct LineFramedTransport<R, W> {
    pub reader: FrameReader<R>,
    pub writer: FrameWriter<W>,
}

impl<R, W> LineFramedTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_max_frame_bytes(reader, writer, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(reader: R, writer: W, max_frame_bytes: usize) -> Self {
        Self {
            reader: FrameReader::with_max_frame_bytes(reader, max_frame_bytes),
            writer: FrameWriter::with_max_frame_bytes(writer, max_frame_bytes),
        }
    }

    pub async fn write<T: Serialize>(&mut self, value: &T) -> Result<(), WriteError> {
        self.writer.write(value).await
    }

    pub async fn next_message(&mut self) -> Option<Frame> {
        self.reader.next_message().await
    }

    /// Idempotent; releases both directions.
    pub async fn close(&mut self) {
        self.reader.close();
        self.writer.close().await;
    }

    pub fn split(self) -> (FrameReader<R>, FrameWriter<W>) {
        (self.reader, self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::duplex;
    use tokio::io::ReadBuf;

    /// Wraps a reader so each `poll_read` hands back at most `chunk` bytes,
    /// forcing a long line to arrive across many reads instead of one.
    struct ChunkedReader<R> {
        inner: R,
        chunk: usize,
    }

    impl<R: AsyncRead + Unpin> AsyncRead for ChunkedReader<R> {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let limit = self.chunk;
            let mut limited = buf.take(limit);
            let poll = Pin::new(&mut self.inner).poll_read(cx, &mut limited);
            let filled = limited.filled().len();
            if poll.is_ready() {
                buf.advance(filled);
            }
            poll
        }
    }

    async fn frames_of(input: &str) -> Vec<Frame> {
        let reader = Cursor::new(input.as_bytes().to_vec());
        let writer = Vec::new();
        let mut t = LineFramedTransport::new(reader, writer);
        let mut out = Vec::new();
        while let Some(f) = t.next_message().await {
            out.push(f);
        }
        out
    }

    #[tokio::test]
    async fn parses_one_value_per_line() {
        let frames = frames_of("{\"a\":1}\n{\"b\":2}\n").await;
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Frame::Message(v) if *v == json!({"a": 1})));
        assert!(matches!(&frames[1], Frame::Message(v) if *v == json!({"b": 2})));
    }

    #[tokio::test]
    async fn skips_empty_lines() {
        let frames = frames_of("\n\n{\"a\":1}\n\n").await;
        assert_eq!(frames.len(), 1);
    }

    #[tokio::test]
    async fn malformed_json_survives_and_continues() {
        let frames = frames_of("{bad json}\n{\"valid\":true}\n").await;
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Frame::ParseError { .. }));
        assert!(matches!(&frames[1], Frame::Message(v) if *v == json!({"valid": true})));
    }

    #[tokio::test]
    async fn malformed_ipc_survival_scenario() {
        // §8 scenario 6.
        let frames = frames_of("{bad json}\n[also bad\n{\"valid\":true}\n").await;
        let parse_errors = frames
            .iter()
            .filter(|f| matches!(f, Frame::ParseError { .. }))
            .count();
        assert_eq!(parse_errors, 2);
        assert!(frames
            .iter()
            .any(|f| matches!(f, Frame::Message(v) if *v == json!({"valid": true}))));
    }

    #[tokio::test]
    async fn overflow_drops_and_resumes_at_next_lf() {
        let max = 16;
        let oversized = "x".repeat(64);
        let input = format!("{oversized}\n{{\"ok\":true}}\n");
        let reader = Cursor::new(input.into_bytes());
        let mut t = LineFramedTransport::with_max_frame_bytes(reader, Vec::new(), max);

        let first = t.next_message().await.unwrap();
        assert!(matches!(first, Frame::Overflow { .. }));
        let second = t.next_message().await.unwrap();
        assert!(matches!(second, Frame::Message(v) if v == json!({"ok": true})));
        assert!(t.next_message().await.is_none());
    }

    #[tokio::test]
    async fn discarding_resumes_correctly_across_many_small_reads() {
        // The oversized line arrives across many small reads with no `\n`
        // until the very end, so the reader spends many iterations with
        // `discarding == true` before it ever sees the terminator.
        let max = 16;
        let oversized = "x".repeat(max * 50);
        let input = format!("{oversized}\n{{\"ok\":true}}\n");
        let reader = ChunkedReader {
            inner: Cursor::new(input.into_bytes()),
            chunk: 4,
        };
        let mut t = LineFramedTransport::with_max_frame_bytes(reader, Vec::new(), max);

        let first = t.next_message().await.unwrap();
        assert!(matches!(first, Frame::Overflow { .. }));
        let second = t.next_message().await.unwrap();
        assert!(matches!(second, Frame::Message(v) if v == json!({"ok": true})));
        assert!(t.next_message().await.is_none());
    }

    #[test]
    fn ingest_chunk_scans_for_terminator_while_discarding_instead_of_buffering() {
        // Regression test: before the fix, every chunk was unconditionally
        // appended to `buf` even while discarding an oversized, LF-less
        // line, so a peer that never sent `\n` could grow `buf` without
        // bound. `ingest_chunk` must leave `buf` empty across any number of
        // LF-less chunks and only start buffering again once the
        // terminator is found, keeping just the bytes after it.
        let mut buf = Vec::new();
        let mut discarding = true;

        for _ in 0..1000 {
            FrameReader::<Cursor<Vec<u8>>>::ingest_chunk(&mut buf, &mut discarding, b"xxxx");
            assert!(buf.is_empty(), "buf grew while discarding with no LF in sight");
            assert!(discarding);
        }

        FrameReader::<Cursor<Vec<u8>>>::ingest_chunk(&mut buf, &mut discarding, b"xx\nrest");
        assert!(!discarding);
        assert_eq!(buf, b"rest");
    }

    #[tokio::test]
    async fn overflow_boundary_at_max_plus_one_bytes() {
        let max = 10;
        let line = "a".repeat(max + 1);
        let input = format!("{line}\n");
        let reader = Cursor::new(input.into_bytes());
        let mut t = LineFramedTransport::with_max_frame_bytes(reader, Vec::new(), max);
        assert!(matches!(
            t.next_message().await.unwrap(),
            Frame::Overflow { .. }
        ));
        assert!(t.next_message().await.is_none());
    }

    #[tokio::test]
    async fn mid_line_eof_discards_without_error() {
        let reader = Cursor::new(b"{\"partial\":".to_vec());
        let mut t = LineFramedTransport::new(reader, Vec::new());
        assert!(t.next_message().await.is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_terminates_stream() {
        let (a, _b) = duplex(64);
        let (reader, writer) = tokio::io::split(a);
        let mut t = LineFramedTransport::new(reader, writer);
        t.close().await;
        t.close().await;
        assert!(t.next_message().await.is_none());
    }

    #[tokio::test]
    async fn write_rejects_oversized_frame() {
        let (a, _b) = duplex(1024);
        let (reader, writer) = tokio::io::split(a);
        let mut t = LineFramedTransport::with_max_frame_bytes(reader, writer, 8);
        let err = t.write(&json!({"too": "long"})).await.unwrap_err();
        assert!(matches!(err, WriteError::BufferOverflow { .. }));
    }

    #[tokio::test]
    async fn round_trip_through_duplex() {
        let (a, b) = duplex(4096);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        let mut side_a = LineFramedTransport::new(a_read, a_write);
        let mut side_b = LineFramedTransport::new(b_read, b_write);

        side_a.write(&json!({"hello": "world"})).await.unwrap();
        let got = side_b.next_message().await.unwrap();
        assert!(matches!(got, Frame::Message(v) if v == json!({"hello": "world"})));
    }

    #[tokio::test]
    async fn multibyte_codepoints_measured_in_utf8_bytes() {
        // "é" is 2 bytes in UTF-8; a max of exactly that size should parse,
        // one byte under should overflow.
        let value = json!("é");
        let serialized = serde_json::to_vec(&value).unwrap();
        let exact_max = serialized.len() + 1; // + the trailing LF
        let reader = Cursor::new([serialized.clone(), b"\n".to_vec()].concat());
        let mut t = LineFramedTransport::with_max_frame_bytes(reader, Vec::new(), exact_max);
        assert!(matches!(t.next_message().await.unwrap(), Frame::Message(_)));
    }
}
