//! Brace-balance message framing.
//!
//! The protocol has no length prefix: each message is a self-delimiting JSON
//! object, and chunk boundaries fall wherever the transport decides. The
//! decoder keeps a signed brace balance across chunks, tracking whether the
//! scanner is inside a quoted string and whether the next character is
//! escaped, so braces inside string literals never perturb the balance.
//! Whenever the balance returns to zero the bytes since the last boundary
//! are one complete message.
//!
//! Errors are isolated per frame: a frame that is not valid UTF-8 is
//! reported and consumed without corrupting the scanner state, and JSON
//! validity is the next layer's problem.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio_util::codec::Decoder;

/// Framing-level failures.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Transport read failure (surfaced through `FramedRead`).
    #[error("transport read failed: {0}")]
    Io(#[from] std::io::Error),

    /// One completed frame was not valid UTF-8. The frame is consumed;
    /// subsequent frames are unaffected.
    #[error("frame is not valid UTF-8")]
    Utf8,

    /// The stream ended mid-message.
    #[error("stream ended with {bytes} bytes of an incomplete message")]
    Truncated {
        /// Unconsumed byte count at EOF.
        bytes: usize,
    },
}

/// Incremental brace-balance frame decoder.
///
/// Implements [`tokio_util::codec::Decoder`], yielding each complete
/// JSON-object text in arrival order. Correct across any chunking: multiple
/// messages in one chunk, one message split across arbitrarily many chunks,
/// and zero-length chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Signed brace balance of the in-progress message.
    depth: i32,
    /// Scanner is inside a quoted string.
    in_string: bool,
    /// Next character is escaped.
    escaped: bool,
    /// An opening brace for the current message has been seen.
    started: bool,
    /// Bytes of the buffer already scanned (kept across calls so re-polls
    /// never rescan).
    scanned: usize,
}

impl FrameDecoder {
    /// Create a decoder with clean scanner state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        self.started = false;
        self.scanned = 0;
    }
}

impl Decoder for FrameDecoder {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError> {
        // Inter-message blanks never start a frame; dropping them keeps the
        // buffer bounded on idle keep-alive whitespace.
        if self.scanned == 0 && !self.started {
            while src.first().is_some_and(u8::is_ascii_whitespace) {
                src.advance(1);
            }
        }

        while self.scanned < src.len() {
            let byte = src[self.scanned];
            self.scanned += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' => {
                    self.depth += 1;
                    self.started = true;
                }
                b'}' => {
                    self.depth -= 1;
                    if self.depth <= 0 && self.started {
                        let frame = src.split_to(self.scanned);
                        self.reset();
                        let Ok(text) = std::str::from_utf8(&frame) else {
                            return Err(FrameError::Utf8);
                        };
                        return Ok(Some(text.trim().to_owned()));
                    }
                }
                _ => {}
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if src.iter().all(u8::is_ascii_whitespace) {
                    Ok(None)
                } else {
                    Err(FrameError::Truncated { bytes: src.len() })
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
