//! NDJSON page link over a byte stream (stdin/stdout for the binary).

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use keyward_core::protocol::{ReplyEnvelope, encode_line, parse_page_line};

use super::serve_page_link;
use crate::relay::{RelayError, RelayHandle};

/// Read page envelopes from `reader` and write replies to `writer` until EOF.
///
/// Malformed frames are logged and skipped; they carry no usable kind to
/// answer with. EOF releases the relay, which fails requests still awaiting a
/// decision with the dropped error. Returns once every reply is written.
pub async fn run<R, W>(
    relay: RelayHandle,
    reader: R,
    writer: W,
    capacity: usize,
) -> Result<(), RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (page_tx, page_rx) = mpsc::channel(capacity);
    let (reply_tx, reply_rx) = mpsc::channel(capacity);

    let server = tokio::spawn(serve_page_link(relay, page_rx, reply_tx));
    let writer = tokio::spawn(write_replies(writer, reply_rx));

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_page_line(&line) {
            Ok(envelope) => {
                if page_tx.send(envelope).await.is_err() {
                    warn!("Page link server stopped");
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Dropping malformed page frame"),
        }
    }

    info!("Page link reached EOF");
    drop(page_tx);
    let _ = server.await;
    let _ = writer.await;
    Ok(())
}

async fn write_replies<W>(mut writer: W, mut replies: mpsc::Receiver<ReplyEnvelope>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = replies.recv().await {
        let line = match encode_line(&reply) {
            Ok(line) => line,
            Err(e) => {
                warn!(id = %reply.id, error = %e, "Failed to encode reply");
                continue;
            }
        };
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            warn!(error = %e, "Failed to write reply, closing page link");
            return;
        }
    }
    debug!("Reply writer finished");
}
