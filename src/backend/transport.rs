//! # Backend Transport
//!
//! The seam between the connection manager and the wire.
//!
//! [`Transport`] establishes one authenticated connection and splits it into a
//! writing half ([`BackendSink`]) and a reading half ([`BackendStream`]). The
//! manager never looks at frames or headers; everything protocol specific
//! lives behind these traits. [`WebSocketTransport`] is the production
//! implementation.
//!
//! ## Cancellation:
//! `BackendStream::next_audio` is polled inside `tokio::select!` and may be
//! dropped at any await point, so implementations must not lose a message
//! they already took off the wire.

use crate::backend::protocol::{
    classify_server_error, parse_server_text, validate_audio_payload, ClientMessage, ServerMessage,
};
use crate::config::ServiceConfig;
use crate::error::{DenoiseError, DenoiseResult};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Establishes authenticated connections to the denoise backend.
pub trait Transport: Send + Sync + 'static {
    type Sink: BackendSink;
    type Stream: BackendStream;

    /// Connect and authenticate.
    ///
    /// ## Returns:
    /// - **Ok((sink, stream))**: handshake complete, audio may flow
    /// - **Err(Auth)**: credential rejected
    /// - **Err(Connect)**: anything else that kept the connection from coming up
    fn connect(
        &self,
        config: &ServiceConfig,
    ) -> impl Future<Output = DenoiseResult<(Self::Sink, Self::Stream)>> + Send;
}

/// Writing half of a backend connection.
pub trait BackendSink: Send + 'static {
    /// Send one PCM batch as one message.
    fn send_audio(&mut self, pcm: Vec<u8>) -> impl Future<Output = DenoiseResult<()>> + Send;

    /// Close the connection. Errors are swallowed; the connection is gone either way.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Reading half of a backend connection.
pub trait BackendStream: Send + 'static {
    /// Next denoised PCM batch.
    ///
    /// `None` means the backend closed the stream cleanly.
    fn next_audio(&mut self) -> impl Future<Output = Option<DenoiseResult<Vec<u8>>>> + Send;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket client for the denoise backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

/// Writing half of a websocket connection.
pub struct WebSocketSink {
    inner: SplitSink<WsStream, Message>,
}

/// Reading half of a websocket connection.
pub struct WebSocketSource {
    inner: SplitStream<WsStream>,
}

impl Transport for WebSocketTransport {
    type Sink = WebSocketSink;
    type Stream = WebSocketSource;

    async fn connect(&self, config: &ServiceConfig) -> DenoiseResult<(WebSocketSink, WebSocketSource)> {
        let mut request = config.backend_url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| DenoiseError::Config("api_key contains invalid header characters".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, response) = connect_async(request).await?;
        debug!(status = %response.status(), url = %config.backend_url, "Websocket upgraded");

        let (mut sink, mut stream) = ws.split();

        let start = serde_json::to_string(&ClientMessage::start(&config.api_key))
            .map_err(|e| DenoiseError::Connect(format!("failed to encode start message: {}", e)))?;
        sink.send(Message::Text(start)).await?;

        let backend_rate = await_ready(&mut stream).await?;
        if let Some(rate) = backend_rate {
            if rate != config.backend_sample_rate {
                warn!(
                    announced = rate,
                    configured = config.backend_sample_rate,
                    "Backend announced a different sample rate than configured"
                );
            }
        }

        info!(url = %config.backend_url, "Denoise backend session ready");
        Ok((WebSocketSink { inner: sink }, WebSocketSource { inner: stream }))
    }
}

/// Wait for the backend's answer to the `start` message.
async fn await_ready(stream: &mut SplitStream<WsStream>) -> DenoiseResult<Option<u32>> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match parse_server_text(&text) {
                Ok(ServerMessage::Ready { session_id, sample_rate }) => {
                    debug!(session_id = ?session_id, "Backend accepted session");
                    return Ok(sample_rate);
                }
                Ok(ServerMessage::Error { code, message }) => {
                    return Err(classify_server_error(&code, &message));
                }
                Err(err) => {
                    return Err(DenoiseError::Connect(format!("unexpected handshake reply: {}", err)));
                }
            },
            Some(Ok(Message::Binary(_))) => {
                return Err(DenoiseError::Connect("audio received before ready".to_string()));
            }
            Some(Ok(Message::Close(frame))) => return Err(close_error(frame)),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err.into()),
            None => return Err(DenoiseError::Connect("closed during handshake".to_string())),
        }
    }
}

/// Close codes 4001/4003 are how the backend refuses a key after the upgrade.
fn close_error(frame: Option<CloseFrame<'_>>) -> DenoiseError {
    match frame {
        Some(frame) => match frame.code {
            CloseCode::Library(4001) | CloseCode::Library(4003) | CloseCode::Policy => {
                DenoiseError::Auth(format!("closed by backend: {}", frame.reason))
            }
            code => DenoiseError::Connect(format!(
                "closed by backend ({}): {}",
                u16::from(code),
                frame.reason
            )),
        },
        None => DenoiseError::Connect("closed by backend".to_string()),
    }
}

impl BackendSink for WebSocketSink {
    async fn send_audio(&mut self, pcm: Vec<u8>) -> DenoiseResult<()> {
        self.inner.send(Message::Binary(pcm)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Ok(stop) = serde_json::to_string(&ClientMessage::Stop) {
            let _ = self.inner.send(Message::Text(stop)).await;
        }
        if let Err(err) = self.inner.close().await {
            debug!(error = %err, "Websocket close did not complete cleanly");
        }
    }
}

impl BackendStream for WebSocketSource {
    async fn next_audio(&mut self) -> Option<DenoiseResult<Vec<u8>>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(err) => return Some(Err(err.into())),
            };

            match message {
                Message::Binary(payload) => {
                    return Some(validate_audio_payload(&payload).map(|_| payload));
                }
                Message::Text(text) => {
                    return Some(Err(match parse_server_text(&text) {
                        Ok(ServerMessage::Error { code, message }) => {
                            classify_server_error(&code, &message)
                        }
                        Ok(other) => DenoiseError::Decode(format!("unexpected control message: {:?}", other)),
                        Err(err) => err,
                    }));
                }
                Message::Close(frame) => {
                    debug!(frame = ?frame, "Backend closed the websocket");
                    return None;
                }
                // Pings are answered by tungstenite on the next write/flush
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_close_codes() {
        let refused = close_error(Some(CloseFrame {
            code: CloseCode::Library(4001),
            reason: Cow::Borrowed("invalid key"),
        }));
        assert_eq!(refused.kind(), "auth_error");

        let away = close_error(Some(CloseFrame {
            code: CloseCode::Away,
            reason: Cow::Borrowed("restarting"),
        }));
        assert_eq!(away.kind(), "connect_error");

        assert_eq!(close_error(None).kind(), "connect_error");
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        // Bind and drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ServiceConfig::new("key").with_backend_url(format!("ws://127.0.0.1:{}", port));
        let err = WebSocketTransport.connect(&config).await.err().unwrap();
        assert_eq!(err.kind(), "connect_error");
    }
}
