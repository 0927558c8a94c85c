//! Shared helpers for tool output.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Read size used while draining a stream.
const READ_CHUNK: usize = 8 * 1024;

/// Byte sink that keeps the first `limit` bytes and only counts the rest.
#[derive(Debug)]
pub struct CappedBuffer {
    kept: Vec<u8>,
    limit: usize,
    dropped: u64,
}

impl CappedBuffer {
    /// Empty buffer keeping at most `limit` bytes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            kept: Vec::with_capacity(limit.min(READ_CHUNK)),
            limit,
            dropped: 0,
        }
    }

    /// Append `chunk`, discarding whatever does not fit.
    pub fn extend(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.kept.len());
        let take = room.min(chunk.len());
        self.kept.extend_from_slice(&chunk[..take]);
        self.dropped += (chunk.len() - take) as u64;
    }

    /// Whether no further byte will be kept.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.kept.len() >= self.limit
    }

    /// Bytes seen but not kept.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Kept bytes as lossy UTF-8 plus the dropped byte count.
    ///
    /// A multi-byte char cut in half by the limit is dropped whole.
    #[must_use]
    pub fn into_lossy(self) -> (String, u64) {
        let mut dropped = self.dropped;
        let mut end = self.kept.len();
        if dropped > 0 {
            if let Err(err) = std::str::from_utf8(&self.kept) {
                if err.error_len().is_none() {
                    dropped += (end - err.valid_up_to()) as u64;
                    end = err.valid_up_to();
                }
            }
        }
        (String::from_utf8_lossy(&self.kept[..end]).into_owned(), dropped)
    }
}

/// Drain `reader` to EOF, keeping at most `limit` bytes in memory.
///
/// # Errors
///
/// Returns the first read error.
pub async fn read_capped<R>(reader: &mut R, limit: usize) -> std::io::Result<CappedBuffer>
where
    R: AsyncRead + Unpin,
{
    let mut buf = CappedBuffer::new(limit);
    let mut chunk = vec![0_u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend(&chunk[..n]);
    }
}

/// Truncate `text` to at most `max_len` bytes of content, breaking at the
/// nearest preceding char boundary so the result is always valid UTF-8.
///
/// When truncation happens a marker naming the number of dropped bytes is
/// appended after the kept prefix.
#[must_use]
pub fn truncate_output(text: &str, max_len: usize) -> String {
    truncate_output_with(text, max_len, 0)
}

/// Like [`truncate_output`] for text that already lost `already_dropped`
/// bytes before it was assembled; those count towards the marker.
#[must_use]
pub fn truncate_output_with(text: &str, max_len: usize, already_dropped: u64) -> String {
    if text.len() <= max_len && already_dropped == 0 {
        return text.to_owned();
    }

    let boundary = if text.len() <= max_len {
        text.len()
    } else {
        text.char_indices()
            .map(|(i, _)| i)
            .take_while(|&i| i <= max_len)
            .last()
            .unwrap_or(0)
    };

    format!(
        "{}\n... [truncated {} bytes]",
        &text[..boundary],
        (text.len() - boundary) as u64 + already_dropped
    )
}
