//! Incremental UTF-8 codec for socket traffic.
//!
//! TCP delivers bytes in whatever segments the network chooses, so a single
//! character may straddle two reads. [`Utf8Decoder`] emits only complete
//! characters and carries the unfinished tail (never more than three bytes)
//! into the next chunk. Anything that can never become valid UTF-8 is an
//! error; nothing is ever replaced with U+FFFD.
//!
//! Outbound text goes through [`Utf8Encoder`] so both directions of a
//! connection share one well-defined boundary.

use std::io::{self, Write};
use std::str;

use thiserror::Error;

/// Longest prefix of a UTF-8 sequence that can still be incomplete.
const MAX_PENDING: usize = 3;

/// Errors raised while decoding inbound bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// The bytes at `offset` can never form a valid character.
    #[error("invalid UTF-8 sequence at byte {offset}")]
    Invalid {
        /// Byte offset, from the start of the stream, of the bad sequence.
        offset: usize,
    },
    /// The stream ended inside a multi-byte character.
    #[error("input ended inside a multi-byte character at byte {offset} ({pending} byte(s) pending)")]
    Truncated {
        /// Byte offset where the unfinished character starts.
        offset: usize,
        /// Number of bytes of the unfinished character that did arrive.
        pending: usize,
    },
}

/// Resumable decoder turning byte chunks into text.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
    consumed: usize,
}

impl Utf8Decoder {
    /// Creates a decoder with no buffered bytes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `chunk` and returns every character it completes.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::Invalid`] when the stream contains a byte
    /// sequence that no continuation could make valid.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<String, EncodingError> {
        let mut text = String::new();
        self.feed_into(chunk, &mut text)?;
        Ok(text)
    }

    /// Decodes `chunk`, appending completed characters to `out`.
    ///
    /// Returns the number of bytes of text appended.
    ///
    /// # Errors
    ///
    /// See [`Utf8Decoder::feed`].
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut String) -> Result<usize, EncodingError> {
        let before = out.len();
        let rest = self.complete_pending(chunk, out)?;
        if !rest.is_empty() {
            self.decode_run(rest, out)?;
        }
        Ok(out.len() - before)
    }

    /// Signals end of input.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::Truncated`] when the final chunk stopped in
    /// the middle of a character.
    pub fn finish(self) -> Result<String, EncodingError> {
        if self.pending.is_empty() {
            Ok(String::new())
        } else {
            Err(EncodingError::Truncated {
                offset: self.consumed,
                pending: self.pending.len(),
            })
        }
    }

    /// Number of bytes currently held back.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Total bytes decoded into text so far.
    #[must_use]
    pub const fn consumed(&self) -> usize {
        self.consumed
    }

    /// Extends the held-back character one byte at a time until it resolves.
    fn complete_pending<'c>(
        &mut self,
        mut chunk: &'c [u8],
        out: &mut String,
    ) -> Result<&'c [u8], EncodingError> {
        while !self.pending.is_empty() {
            let Some((&byte, rest)) = chunk.split_first() else {
                return Ok(chunk);
            };
            self.pending.push(byte);
            chunk = rest;
            match str::from_utf8(&self.pending) {
                Ok(character) => {
                    out.push_str(character);
                    self.consumed += self.pending.len();
                    self.pending.clear();
                }
                Err(error) if error.error_len().is_some() => {
                    return Err(EncodingError::Invalid {
                        offset: self.consumed,
                    });
                }
                Err(_) => {}
            }
        }
        Ok(chunk)
    }

    fn decode_run(&mut self, bytes: &[u8], out: &mut String) -> Result<(), EncodingError> {
        let error = match str::from_utf8(bytes) {
            Ok(text) => {
                out.push_str(text);
                self.consumed += bytes.len();
                return Ok(());
            }
            Err(error) => error,
        };

        let (valid, tail) = bytes.split_at(error.valid_up_to());
        let text = str::from_utf8(valid).map_err(|_| EncodingError::Invalid {
            offset: self.consumed,
        })?;
        out.push_str(text);
        self.consumed += valid.len();

        if error.error_len().is_some() || tail.len() > MAX_PENDING {
            return Err(EncodingError::Invalid {
                offset: self.consumed,
            });
        }
        self.pending.extend_from_slice(tail);
        Ok(())
    }
}

/// Writes text to a byte sink, counting what went out.
#[derive(Debug)]
pub struct Utf8Encoder<W> {
    writer: W,
    written: usize,
}

impl<W: Write> Utf8Encoder<W> {
    /// Wraps `writer`.
    pub const fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Encodes and writes `text` in full.
    ///
    /// # Errors
    ///
    /// Propagates write failures from the underlying sink.
    pub fn write_str(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_all(text.as_bytes())?;
        self.written += text.len();
        Ok(())
    }

    /// Bytes written so far.
    #[must_use]
    pub const fn written(&self) -> usize {
        self.written
    }

    /// Flushes the sink and hands it back.
    ///
    /// # Errors
    ///
    /// Propagates flush failures from the underlying sink.
    pub fn finish(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
