//! Text framing over a byte stream.
//!
//! ```text
//! inbound:  <json>\r\n<json>\r\n<partial...
//! outbound: <json>\n\n
//! ```
//!
//! [`FrameBuffer`] accumulates bytes read from a client and yields complete
//! frames; anything after the last delimiter stays buffered for the next
//! read. The backlog is capped: a chunk that would push it past the cap
//! discards what was buffered before it.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Terminator of inbound frames.
pub const INBOUND_DELIMITER: &[u8] = b"\r\n";

/// Terminator of outbound frames.
pub const OUTBOUND_DELIMITER: &[u8] = b"\n\n";

/// Framing errors. Neither ends the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Backlog would exceed the cap; buffered bytes were dropped
    #[error("inbound buffer overflow: {attempted} > {limit} bytes")]
    Overflow {
        /// Size the backlog would have reached
        attempted: usize,
        /// Configured cap
        limit: usize,
    },

    /// Frame is not UTF-8
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Per-client inbound buffer.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    limit: usize,
}

impl FrameBuffer {
    /// Empty buffer holding at most `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self { buffer: BytesMut::new(), limit }
    }

    /// Append bytes read from the socket.
    ///
    /// # Errors
    ///
    /// `Overflow` when the backlog plus `data` exceeds the cap. The backlog
    /// is discarded first; `data` is then kept if it fits on its own.
    pub fn extend(&mut self, data: &[u8]) -> Result<(), FrameError> {
        let attempted = self.buffer.len() + data.len();
        if attempted <= self.limit {
            self.buffer.extend_from_slice(data);
            return Ok(());
        }

        self.buffer.clear();
        if data.len() <= self.limit {
            self.buffer.extend_from_slice(data);
        }
        Err(FrameError::Overflow { attempted, limit: self.limit })
    }

    /// Next complete frame, without its delimiter.
    ///
    /// Empty frames are skipped. Returns `None` once only a partial frame
    /// (or nothing) remains.
    pub fn next_frame(&mut self) -> Option<Result<String, FrameError>> {
        loop {
            let end = self
                .buffer
                .windows(INBOUND_DELIMITER.len())
                .position(|window| window == INBOUND_DELIMITER)?;

            let frame = self.buffer.split_to(end + INBOUND_DELIMITER.len());
            let body = &frame[..end];
            if body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(
                std::str::from_utf8(body).map(str::to_string).map_err(|_| FrameError::InvalidUtf8),
            );
        }
    }

    /// Bytes waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Terminate an outbound message.
pub fn encode_frame(message: &str) -> Bytes {
    let mut out = BytesMut::with_capacity(message.len() + OUTBOUND_DELIMITER.len());
    out.extend_from_slice(message.as_bytes());
    out.extend_from_slice(OUTBOUND_DELIMITER);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn splits_on_delimiter_and_keeps_partial() {
        let mut frames = FrameBuffer::new(1024);
        frames.extend(b"{\"a\":1}\r\n{\"b\":2}\r\n{\"c\"").unwrap();

        assert_eq!(frames.next_frame(), Some(Ok("{\"a\":1}".to_string())));
        assert_eq!(frames.next_frame(), Some(Ok("{\"b\":2}".to_string())));
        assert_eq!(frames.next_frame(), None);
        assert_eq!(frames.pending(), 4);

        frames.extend(b":3}\r\n").unwrap();
        assert_eq!(frames.next_frame(), Some(Ok("{\"c\":3}".to_string())));
        assert_eq!(frames.pending(), 0);
    }

    #[test]
    fn delimiter_split_across_reads() {
        let mut frames = FrameBuffer::new(1024);
        frames.extend(b"{}\r").unwrap();
        assert_eq!(frames.next_frame(), None);
        frames.extend(b"\n").unwrap();
        assert_eq!(frames.next_frame(), Some(Ok("{}".to_string())));
    }

    #[test]
    fn skips_empty_frames() {
        let mut frames = FrameBuffer::new(1024);
        frames.extend(b"\r\n  \r\n{}\r\n").unwrap();
        assert_eq!(frames.next_frame(), Some(Ok("{}".to_string())));
        assert_eq!(frames.next_frame(), None);
    }

    #[test]
    fn overflow_discards_backlog() {
        let mut frames = FrameBuffer::new(16);
        frames.extend(b"0123456789").unwrap();

        assert_eq!(
            frames.extend(b"abcdefgh"),
            Err(FrameError::Overflow { attempted: 18, limit: 16 })
        );
        assert_eq!(frames.pending(), 8);

        assert!(frames.extend(&[b'x'; 17]).is_err());
        assert_eq!(frames.pending(), 0);
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut frames = FrameBuffer::new(64);
        frames.extend(&[0xff, 0xfe, b'\r', b'\n', b'{', b'}', b'\r', b'\n']).unwrap();
        assert_eq!(frames.next_frame(), Some(Err(FrameError::InvalidUtf8)));
        assert_eq!(frames.next_frame(), Some(Ok("{}".to_string())));
    }

    #[test]
    fn outbound_terminator() {
        assert_eq!(&encode_frame("{}")[..], b"{}\n\n");
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_frames(
            bodies in prop::collection::vec("[a-z0-9{}\":,]{1,40}", 1..8),
            split in 1usize..16,
        ) {
            let wire: Vec<u8> = bodies
                .iter()
                .flat_map(|b| b.bytes().chain(INBOUND_DELIMITER.iter().copied()))
                .collect();

            let mut frames = FrameBuffer::new(4096);
            let mut out = Vec::new();
            for chunk in wire.chunks(split) {
                frames.extend(chunk).unwrap();
                while let Some(frame) = frames.next_frame() {
                    out.push(frame.unwrap());
                }
            }

            prop_assert_eq!(out, bodies);
            prop_assert_eq!(frames.pending(), 0);
        }
    }
}
