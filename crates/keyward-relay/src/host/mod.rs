//! Page-side endpoint of the relay.
//!
//! Turns a stream of [`PageEnvelope`]s into routed requests and writes back
//! exactly one [`ReplyEnvelope`] per envelope.

pub mod stdio;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use keyward_core::RequestError;
use keyward_core::protocol::{OutboundResponse, PageEnvelope, ReplyEnvelope};

use crate::bridge::{PageBridge, PageContext};
use crate::relay::RelayHandle;
use crate::router::PageRequest;

/// Serve one page link until its inbound side closes.
pub async fn serve_page_link(
    relay: RelayHandle,
    mut inbound: mpsc::Receiver<PageEnvelope>,
    outbound: mpsc::Sender<ReplyEnvelope>,
) {
    while let Some(envelope) = inbound.recv().await {
        let id = envelope.id.clone();
        let kind = envelope.action;
        let request = PageRequest::from_envelope(envelope);
        debug!(%id, %kind, request_id = %request.request_id, "Page request received");

        let (tx, rx) = oneshot::channel();
        let submitted = relay.submit(request, tx).await;

        let outbound = outbound.clone();
        tokio::spawn(async move {
            let response = match submitted {
                Ok(()) => rx.await.unwrap_or_else(|_| {
                    warn!(%id, %kind, "Reply channel dropped without a response");
                    OutboundResponse::failure(kind, &RequestError::Dropped)
                }),
                Err(e) => {
                    warn!(%id, %kind, error = %e, "Relay unavailable");
                    OutboundResponse::failure(kind, &RequestError::Dropped)
                }
            };
            if outbound.send(ReplyEnvelope { id, response }).await.is_err() {
                debug!(%kind, "Page link closed before reply was written");
            }
        });
    }
    debug!("Page link inbound closed");
}

/// Connect a [`PageBridge`] to the relay inside this process.
pub fn in_process_bridge(relay: RelayHandle, context: PageContext, capacity: usize) -> PageBridge {
    let (page_tx, page_rx) = mpsc::channel(capacity);
    let (reply_tx, reply_rx) = mpsc::channel(capacity);
    tokio::spawn(serve_page_link(relay, page_rx, reply_tx));
    PageBridge::new(context, page_tx, reply_rx)
}
