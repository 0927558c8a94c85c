//! NDJSON codec for the agent's stdio streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! misbehaving agent cannot make the relay buffer an unterminated line
//! forever.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::{AppError, Result};

/// Maximum inbound line length: 4 MiB.
///
/// Large tool results are echoed back inside `user` frames, so the limit is
/// well above anything a single assistant message produces.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Line codec for the agent protocol.
///
/// Oversize lines never surface as errors: the codec logs them, discards
/// the rest of the line and carries on with the next one. A decoder error
/// would end a [`FramedRead`](tokio_util::codec::FramedRead) stream for
/// good, so only I/O failures are reported, as [`AppError::Io`].
#[derive(Debug)]
pub struct AgentCodec(LinesCodec);

impl AgentCodec {
    /// Codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max))
    }
}

impl Default for AgentCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AgentCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(max = self.0.max_length(), "codec: line too long, discarding");
                }
                other => return other.map_err(map_codec_error),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode_eof(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(max = self.0.max_length(), "codec: line too long at EOF, discarding");
                }
                other => return other.map_err(map_codec_error),
            }
        }
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol("line too long: exceeded maximum line length".into())
        }
        LinesCodecError::Io(io_err) => AppError::from(io_err),
    }
}
