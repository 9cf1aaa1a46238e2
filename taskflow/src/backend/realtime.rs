//! WebSocket change feed.
//!
//! Opens a connection to the realtime endpoint, sends one
//! [`SubscribeRequest`] as a JSON text frame, then hands the socket to a
//! background reader task that decodes each incoming frame into a
//! [`ChangeEvent`] and forwards it over an mpsc channel. The returned
//! [`ChangeFeed`] owns that task and aborts it on drop.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use taskflow_proto::change::{self, ChangeEvent, SubscribeRequest};

use super::{BackendError, ChangeFeed};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Capacity of the channel between the reader task and the feed.
const FEED_BUFFER: usize = 256;

/// Connects to `url` and subscribes with `request`.
///
/// # Errors
///
/// - [`BackendError::Timeout`] if the handshake does not finish within
///   `connect_timeout`.
/// - [`BackendError::Unsupported`] if `url` is not a `ws` or `wss` URL.
/// - [`BackendError::ConnectionClosed`] if the socket cannot be opened or the
///   subscribe frame cannot be sent.
/// - [`BackendError::Decode`] if the request cannot be serialized.
pub async fn connect(
    url: &str,
    request: &SubscribeRequest,
    connect_timeout: Duration,
) -> Result<ChangeFeed, BackendError> {
    let (mut ws, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
        .await
        .map_err(|_| {
            tracing::warn!(url, "change feed connect timed out");
            BackendError::Timeout
        })?
        .map_err(|e| {
            tracing::warn!(url, err = %e, "change feed connect failed");
            connect_error(e)
        })?;

    let frame = serde_json::to_string(request).map_err(|e| BackendError::Decode(e.to_string()))?;
    ws.send(Message::Text(frame.into())).await.map_err(|e| {
        tracing::warn!(err = %e, "failed to send subscribe frame");
        BackendError::ConnectionClosed
    })?;
    tracing::info!(url, user_id = %request.user_id, "subscribed to change feed");

    let (tx, rx) = mpsc::channel(FEED_BUFFER);
    let reader = tokio::spawn(reader_loop(ws, tx));
    Ok(ChangeFeed::with_reader(rx, reader))
}

/// A malformed or unsupported URL can never connect; anything else is a
/// failed attempt that may succeed later.
fn connect_error(err: WsError) -> BackendError {
    match err {
        WsError::Url(e) => BackendError::Unsupported(format!("change feed url: {e}")),
        _ => BackendError::ConnectionClosed,
    }
}

/// Decodes frames until the socket closes or the feed is dropped.
///
/// Malformed frames are logged and skipped; they never end the feed.
async fn reader_loop(mut ws: WsStream, tx: mpsc::Sender<ChangeEvent>) {
    while let Some(msg) = ws.next().await {
        let decoded = match msg {
            Ok(Message::Text(text)) => change::decode(text.as_str().as_bytes()),
            Ok(Message::Binary(data)) => change::decode(&data),
            Ok(Message::Close(_)) => {
                tracing::info!("change feed closed by server");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(err = %e, "change feed read error");
                break;
            }
        };
        match decoded {
            Ok(event) => {
                tracing::debug!(kind = event.kind(), task_id = %event.task_id(), "change received");
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(err = %e, "malformed change frame, skipping"),
        }
    }
    tracing::info!("change feed reader exiting");
}
