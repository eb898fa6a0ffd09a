//! WebSocket transport.
//!
//! Each protocol frame travels as one binary WebSocket message. Text
//! messages are a connection error. Both sides negotiate the `sftp`
//! subprotocol.

use super::{Channel, Connector, MessageSink, MessageStream, TransportError};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

/// Subprotocol requested by clients and echoed by servers.
pub const SUBPROTOCOL: &str = "sftp";

const PROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

struct WsSink<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

struct WsStream<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait::async_trait]
impl<S> MessageSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, message: Vec<u8>) -> Result<(), TransportError> {
        self.sink.send(Message::Binary(message)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl<S> MessageStream for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Binary(data)) => return Some(Ok(data)),
                Ok(Message::Text(_)) => return Some(Err(TransportError::NonBinaryMessage)),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Wrap an established WebSocket.
pub fn from_websocket<S>(ws: WebSocketStream<S>) -> Channel
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    Channel::new(Box::new(WsSink { sink }), Box::new(WsStream { stream }))
}

/// Connect to a `ws://` or `wss://` URL.
pub async fn connect(url: &str) -> Result<Channel, TransportError> {
    let mut request = url.into_client_request()?;
    request
        .headers_mut()
        .insert(PROTOCOL_HEADER, HeaderValue::from_static(SUBPROTOCOL));

    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| match e {
            WsError::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                TransportError::ConnectionRefused
            }
            other => TransportError::WebSocket(other),
        })?;
    tracing::debug!(target: "sftp-pipe::ws", url, "connected");
    Ok(from_websocket(ws))
}

/// Complete the server side of the handshake on an accepted stream.
pub async fn accept<S>(stream: S) -> Result<Channel, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let echo_subprotocol = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
        let requested = req
            .headers()
            .get_all(PROTOCOL_HEADER)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|p| p.trim() == SUBPROTOCOL);
        if requested {
            resp.headers_mut()
                .insert(PROTOCOL_HEADER, HeaderValue::from_static(SUBPROTOCOL));
        }
        Ok(resp)
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, echo_subprotocol).await?;
    Ok(from_websocket(ws))
}

/// Reconnectable client endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Channel, TransportError> {
        connect(&self.url).await
    }
}

/// Accept WebSocket connections on a TCP stream.
pub async fn accept_tcp(stream: TcpStream) -> Result<Channel, TransportError> {
    stream.set_nodelay(true)?;
    accept(stream).await
}
