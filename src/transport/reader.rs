//! Background reader task.
//!
//! Drives a [`FramedRead`] over the agent's stdout, parses each line into an
//! [`InboundFrame`] and forwards it through a bounded [`mpsc`] channel. The
//! task is the channel's only sender, so the channel closes exactly when the
//! task ends: on EOF, on an unrecoverable I/O error, or on cancellation.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::protocol::{parse_inbound_line, InboundFrame};
use crate::transport::codec::AgentCodec;

/// Channel capacity between the reader task and the conversation.
pub const CHANNEL_CAPACITY: usize = 64;

/// Read frames until EOF, I/O failure or cancellation.
///
/// Oversize and unparseable lines are logged and skipped; they do not end
/// the task.
pub async fn run_reader<R>(
    label: String,
    mut framed: FramedRead<R, AgentCodec>,
    frame_tx: mpsc::Sender<InboundFrame>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    loop {
        let item = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(label, "reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => item,
        };

        let line = match item {
            None => {
                debug!(label, "reader: EOF");
                break;
            }
            Some(Err(err)) => {
                warn!(label, error = %err, "reader: I/O error, stopping");
                break;
            }
            Some(Ok(line)) => line,
        };

        let frame = match parse_inbound_line(&line) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(err) => {
                warn!(label, error = %err, raw_line = %line, "reader: parse error, skipping line");
                continue;
            }
        };

        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(label, "reader: cancellation received while delivering, stopping");
                break;
            }

            sent = frame_tx.send(frame) => {
                if sent.is_err() {
                    debug!(label, "reader: receiver dropped, stopping");
                    break;
                }
            }
        }
    }
}
