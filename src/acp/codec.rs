//! Line framing for the agent's stdio streams.
//!
//! Each protocol message is exactly one UTF-8 line terminated by `\n`.
//! [`LineCodec`] splits the inbound byte stream on newline boundaries and
//! encodes outbound strings with a trailing `\n`, for use with
//! [`tokio_util::codec::FramedRead`] and [`FramedWrite`](tokio_util::codec::FramedWrite).
//!
//! Inbound lines are capped at [`MAX_LINE_BYTES`]; an over-long line yields
//! [`AppError::Acp`] and the offending bytes are discarded so the stream can
//! resynchronise at the next newline.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Maximum accepted inbound line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited UTF-8 codec for agent stdio streams.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Set after an over-long line; bytes are dropped until the next `\n`.
    discarding: bool,
}

impl LineCodec {
    /// Create a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self { discarding: false }
    }

    fn take_line(&mut self, src: &mut BytesMut, newline_at: usize) -> Result<Option<String>> {
        let line = src.split_to(newline_at + 1);
        if self.discarding {
            // Tail of a line that already exceeded the limit.
            self.discarding = false;
            return Ok(None);
        }
        if newline_at > MAX_LINE_BYTES {
            return Err(AppError::Acp(format!(
                "line too long: exceeded {MAX_LINE_BYTES} bytes"
            )));
        }
        // Strip the `\n` and an optional preceding `\r`.
        let mut end = line.len() - 1;
        if end > 0 && line[end - 1] == b'\r' {
            end -= 1;
        }
        let text = std::str::from_utf8(&line[..end])
            .map_err(|err| AppError::Acp(format!("non-utf8 line: {err}")))?
            .to_owned();
        Ok(Some(text))
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        loop {
            match src.iter().position(|&b| b == b'\n') {
                Some(pos) => match self.take_line(src, pos)? {
                    Some(line) => return Ok(Some(line)),
                    // Discarded tail of an over-long line; look for the next one.
                    None => continue,
                },
                None => {
                    if src.len() > MAX_LINE_BYTES {
                        // Drop what has accumulated and resynchronise at the
                        // next newline.
                        src.advance(src.len());
                        self.discarding = true;
                        return Err(AppError::Acp(format!(
                            "line too long: exceeded {MAX_LINE_BYTES} bytes"
                        )));
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() || self.discarding {
            return Ok(None);
        }
        // Final unterminated line.
        let rest = src.split_to(src.len());
        let text = std::str::from_utf8(&rest)
            .map_err(|err| AppError::Acp(format!("non-utf8 line: {err}")))?
            .to_owned();
        Ok(Some(text))
    }
}

impl Encoder<String> for LineCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
