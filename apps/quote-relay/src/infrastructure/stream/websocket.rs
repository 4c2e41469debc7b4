//! WebSocket Transport
//!
//! [`StreamConnector`] over `tokio-tungstenite`. Only text frames are
//! surfaced; ping/pong is answered by tungstenite itself and a close frame
//! ends the stream with [`TransportError::Closed`].

use async_trait::async_trait;
use futures::future;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::{FrameSink, FrameStream, StreamConnector, TransportError};

/// Connects to a `ws://` or `wss://` price-distribution endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Create a connector for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl StreamConnector for WebSocketConnector {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<(FrameSink, FrameStream), TransportError> {
        tracing::info!(url = %self.url, "Connecting to price stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportError::Io(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Server sent close frame");
                    Some(Err(TransportError::Closed))
                }
                // Ping/pong/binary
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Io(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_the_url() {
        let connector = WebSocketConnector::new("wss://prices.example.com/ws");
        assert_eq!(connector.endpoint(), "wss://prices.example.com/ws");
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        // Nothing listens on port 9 of localhost in test environments
        let connector = WebSocketConnector::new("ws://127.0.0.1:9/ws");

        let result = connector.connect().await;

        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
