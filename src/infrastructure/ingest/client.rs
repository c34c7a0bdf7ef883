//! Upstream WebSocket Client
//!
//! Maintains, indefinitely, exactly one live connection to the upstream
//! market data feed and forwards validated records into the bounded queue.
//!
//! # Connect Protocol
//!
//! 1. Dial the configured URL with an `x-api-key` header.
//! 2. Send one subscribe frame: `{"event":"subscribe","symbols":[…]}`.
//! 3. Reset the backoff and enter the read loop.
//!
//! Any failure along the way closes the connection, sleeps the current
//! backoff, and starts over. Enqueueing blocks when the queue is full, which
//! pauses upstream reads; this is the backpressure contract.

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::market_data::{MarketData, exchange_for_symbol};
use crate::infrastructure::metrics::{
    ErrorKind, record_error, record_message_received, record_reconnect,
};
use crate::infrastructure::pipeline::queue::QueueSender;

/// Header carrying the upstream API key.
const API_KEY_HEADER: &str = "x-api-key";

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the ingest client.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// WebSocket error (dial, read, or write).
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The API key is not a valid header value.
    #[error("api key is not a valid header value")]
    InvalidApiKey,

    /// Subscribe frame could not be encoded.
    #[error("failed to encode subscribe frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// Server closed the connection or the stream ended.
    #[error("connection closed")]
    ConnectionClosed,

    /// The pipeline queue is gone; the process is shutting down.
    #[error("queue closed")]
    QueueClosed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the ingest client.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Upstream WebSocket URL.
    pub url: String,
    /// API key sent in the connect handshake.
    pub api_key: String,
    /// Symbols requested in the subscribe frame.
    pub symbols: Vec<String>,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

/// The outbound subscription frame.
#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    event: &'static str,
    symbols: &'a [String],
}

impl<'a> SubscribeRequest<'a> {
    const fn new(symbols: &'a [String]) -> Self {
        Self {
            event: "subscribe",
            symbols,
        }
    }
}

// =============================================================================
// Ingest Client
// =============================================================================

/// Upstream WebSocket client.
///
/// Owns the connection lifecycle: handshake, subscription, validation, and
/// automatic reconnection with doubling backoff.
pub struct IngestClient {
    config: IngestConfig,
    queue: QueueSender,
    cancel: CancellationToken,
}

impl IngestClient {
    /// Create a new ingest client.
    #[must_use]
    pub const fn new(config: IngestConfig, queue: QueueSender, cancel: CancellationToken) -> Self {
        Self {
            config,
            queue,
            cancel,
        }
    }

    /// Run the connection loop until cancelled.
    pub async fn run(self) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("ingest client cancelled");
                return;
            }

            match self.connect_and_run(&mut policy).await {
                Ok(()) => {
                    tracing::info!("ingest client stopped");
                    return;
                }
                Err(IngestError::QueueClosed) => {
                    tracing::info!("pipeline queue closed, stopping ingest client");
                    return;
                }
                Err(e) => {
                    record_error(ErrorKind::WsConnect);
                    tracing::warn!(error = %e, "upstream connection error");

                    let delay = policy.next_delay();
                    record_reconnect();
                    tracing::info!(
                        attempt = policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "reconnecting to upstream feed"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("ingest client cancelled during reconnect delay");
                            return;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect, subscribe, and read until an error or cancellation.
    async fn connect_and_run(&self, policy: &mut ReconnectPolicy) -> Result<(), IngestError> {
        tracing::info!(url = %self.config.url, "connecting to upstream feed");

        let mut request = self.config.url.as_str().into_client_request()?;
        request.headers_mut().insert(
            API_KEY_HEADER,
            HeaderValue::from_str(&self.config.api_key)
                .map_err(|_| IngestError::InvalidApiKey)?,
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();

        let frame = serde_json::to_string(&SubscribeRequest::new(&self.config.symbols))?;
        write.send(Message::Text(frame.into())).await?;
        tracing::info!(
            symbols = self.config.symbols.len(),
            "subscribed to upstream feed"
        );

        policy.reset();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(text.as_str()).await?;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("upstream sent close frame");
                            return Err(IngestError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Ignore other message types
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("upstream stream ended");
                            return Err(IngestError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Parse, validate, and enqueue one text frame.
    ///
    /// Frames that fail to parse or validate are counted and dropped; only a
    /// closed queue propagates as an error.
    async fn handle_frame(&self, text: &str) -> Result<(), IngestError> {
        let mut data: MarketData = match serde_json::from_str(text) {
            Ok(data) => data,
            Err(e) => {
                record_error(ErrorKind::Unmarshal);
                tracing::warn!(error = %e, "discarding undecodable frame");
                return Ok(());
            }
        };

        if let Err(e) = data.validate() {
            record_error(ErrorKind::Validation);
            tracing::warn!(error = %e, "discarding invalid record");
            return Ok(());
        }

        data.exchange = exchange_for_symbol(&data.name).to_string();

        record_message_received();
        self.queue
            .send(data)
            .await
            .map_err(|_| IngestError::QueueClosed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_encoding() {
        let symbols = vec!["USDSGD".to_string(), "EURUSD".to_string()];
        let frame = serde_json::to_string(&SubscribeRequest::new(&symbols)).unwrap();
        assert_eq!(
            frame,
            r#"{"event":"subscribe","symbols":["USDSGD","EURUSD"]}"#
        );
    }
}
