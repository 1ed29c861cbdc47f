//! `WebSocket` push transport.
//!
//! Connects to the API's `/ws/state` stream with `tokio-tungstenite` and
//! exposes it as a [`PushStream`] of message texts. Ping and pong frames
//! are answered by tungstenite and never surface; a close frame from the
//! server ends the stream. When the session shuts the stream down, a close
//! frame is sent before the stream ends.

use std::time::Duration;

use futures::{StreamExt, stream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::transport::{PushConnector, PushStream};

/// Upper bound on the close handshake once shutdown is requested.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`PushConnector`] backed by a real `WebSocket`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new connector.
    pub const fn new() -> Self {
        Self
    }
}

impl PushConnector for WsConnector {
    async fn connect(
        &self,
        endpoint: &str,
        shutdown: CancellationToken,
    ) -> Result<PushStream, SyncError> {
        debug!(endpoint, "opening state stream");
        let (socket, response) = connect_async(endpoint).await.map_err(|e| {
            SyncError::TransportUnavailable(format!("failed to connect to {endpoint}: {e}"))
        })?;
        info!(endpoint, status = %response.status(), "state stream connected");

        let frames = stream::unfold((socket, shutdown), |(mut socket, shutdown)| async move {
            loop {
                let received = tokio::select! {
                    biased;
                    () = shutdown.cancelled() => None,
                    received = socket.next() => Some(received),
                };
                let Some(received) = received else {
                    close(&mut socket).await;
                    return None;
                };
                match received {
                    None | Some(Ok(Message::Close(_))) => return None,
                    Some(message) => {
                        if let Some(item) = frame_text(message) {
                            return Some((item, (socket, shutdown)));
                        }
                    }
                }
            }
        });
        Ok(frames.boxed())
    }
}

/// Send a close frame and wait briefly for the server to acknowledge it.
async fn close(socket: &mut Socket) {
    let handshake = async {
        socket.close(None).await?;
        while let Some(Ok(_)) = socket.next().await {}
        Ok::<_, tokio_tungstenite::tungstenite::Error>(())
    };
    match tokio::time::timeout(CLOSE_TIMEOUT, handshake).await {
        Ok(Ok(())) => debug!("state stream closed"),
        Ok(Err(e)) => debug!(error = %e, "state stream close failed"),
        Err(_) => debug!("state stream close timed out"),
    }
}

/// Map one received frame to a stream item, skipping control frames.
fn frame_text(
    message: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<String, SyncError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => Some(
            String::from_utf8(bytes.to_vec())
                .map_err(|e| SyncError::MalformedPayload(format!("binary frame is not UTF-8: {e}"))),
        ),
        Ok(_) => None,
        Err(e) => Some(Err(SyncError::TransportRuntime(e.to_string()))),
    }
}
