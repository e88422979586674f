//! # Receiver Loop
//!
//! The only reader of the transport. Reads one frame at a time, decodes it and
//! hands it to the correlator.
//!
//! Malformed frames are logged and skipped: one bad frame from the server
//! should not fail every other request on the connection. The cost is that a
//! request whose response was garbled waits until the connection closes (or
//! its timeout fires).

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{protocol::Message, Error as WsError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hpkv_common::decode_response;

use crate::client::ClientError;
use crate::correlator::Correlator;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReceiverExit {
    /// `disconnect()` asked it to stop; the caller drains.
    Cancelled,
    /// The peer closed or the transport failed; the table has been drained.
    TransportClosed,
}

/// Runs until cancelled or until the transport ends.
///
/// Cancellation is checked before every read.
pub(crate) async fn run<S>(
    mut source: S,
    correlator: Arc<Correlator>,
    cancel: CancellationToken,
) -> ReceiverExit
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    debug!("receiver loop started");

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("receiver loop cancelled");
                return ReceiverExit::Cancelled;
            }
            next = source.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => dispatch(&correlator, text.as_bytes()),
            Some(Ok(Message::Binary(data))) => dispatch(&correlator, &data),
            Some(Ok(Message::Close(frame))) => {
                info!(frame = ?frame, "server closed connection");
                break;
            }
            // Ping/pong are answered by tungstenite.
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                error!(error = %err, "transport read failed");
                break;
            }
            None => {
                info!("transport stream ended");
                break;
            }
        }
    }

    let drained = correlator.drain_all(ClientError::ConnectionClosed);
    debug!(drained, "receiver loop ended");
    ReceiverExit::TransportClosed
}

fn dispatch(correlator: &Correlator, payload: &[u8]) {
    let mut response = match decode_response(payload) {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, len = payload.len(), "discarding malformed frame");
            return;
        }
    };

    let id = response.message_id;
    let delivered = match response.error.take() {
        Some(message) => correlator.reject(id, ClientError::Remote(message)),
        None => correlator.resolve(id, response),
    };

    if delivered {
        debug!(id, "response delivered");
    } else {
        debug!(id, "discarding response for unknown message id");
    }
}
