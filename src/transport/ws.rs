use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::from_str;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{BoxFuture, Transport};
use crate::protocol::{BackendEvent, BackendRequest};
use crate::realtime::{Backend, RealtimeCapabilities};
use crate::utils::safe_truncate;
use crate::{Error, Result};

const TRACE_LOG_MAX_BYTES: usize = 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// JSON-over-WebSocket transport: one request or event per text frame.
#[derive(Debug)]
pub struct WsTransport {
    stream: WsStream,
}

/// Establish a WebSocket connection to a realtime backend.
///
/// # Errors
/// Returns an error if the URL is invalid, not `ws`/`wss`, or the handshake fails.
pub async fn connect(url: &str, api_key: Option<&str>) -> Result<WsTransport> {
    let url = Url::parse(url)?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(Error::BackendUnavailable(format!(
            "unsupported URL scheme: {}",
            url.scheme()
        )));
    }

    let mut req = url.as_str().into_client_request()?;
    if let Some(key) = api_key {
        let auth_header = HeaderValue::from_str(&format!("Bearer {key}"))?;
        req.headers_mut().insert(header::AUTHORIZATION, auth_header);
    }
    let (stream, _) = connect_async(req).await?;

    tracing::info!(host = url.host_str().unwrap_or_default(), "Connected to realtime backend");

    Ok(WsTransport { stream })
}

impl Transport for WsTransport {
    fn send(&mut self, request: BackendRequest) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let json = serde_json::to_string(&request)?;
            tracing::trace!("Sending request: {}", safe_truncate(&json, TRACE_LOG_MAX_BYTES));
            self.stream.send(Message::Text(json.into())).await?;
            Ok(())
        })
    }

    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<BackendEvent>>> {
        Box::pin(async move {
            while let Some(msg) = self.stream.next().await {
                match msg? {
                    Message::Text(text) => {
                        tracing::trace!("Received event: {}", safe_truncate(&text, TRACE_LOG_MAX_BYTES));
                        return Ok(Some(from_str::<BackendEvent>(&text)?));
                    }
                    Message::Close(_) => {
                        tracing::info!("WebSocket connection closed by backend");
                        return Ok(None);
                    }
                    Message::Ping(payload) => {
                        tracing::debug!("Received Ping, sending Pong");
                        self.stream.send(Message::Pong(payload)).await?;
                    }
                    _ => (),
                }
            }
            Ok(None)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match self.stream.close(None).await {
                Ok(())
                | Err(
                    tokio_tungstenite::tungstenite::Error::ConnectionClosed
                    | tokio_tungstenite::tungstenite::Error::AlreadyClosed,
                ) => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
    }
}

/// A backend reachable over [`WsTransport`]; every session opens its own socket.
#[derive(Clone)]
pub struct WsBackend {
    url: String,
    api_key: Option<String>,
    capabilities: RealtimeCapabilities,
}

impl WsBackend {
    #[must_use]
    pub fn new(url: impl Into<String>, capabilities: RealtimeCapabilities) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            capabilities,
        }
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

impl std::fmt::Debug for WsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsBackend")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[async_trait]
impl Backend for WsBackend {
    fn capabilities(&self) -> RealtimeCapabilities {
        self.capabilities
    }

    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let transport = connect(&self.url, self.api_key.as_deref())
            .await
            .map_err(|err| match err {
                Error::BackendUnavailable(_) => err,
                other => Error::BackendUnavailable(other.to_string()),
            })?;
        Ok(Box::new(transport))
    }
}
