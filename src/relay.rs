//! A single WebSocket connection to one relay.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{
    client_async_tls, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::message::{ClientMessage, RelayMessage};

/// Default budget for connect, write, and acknowledgement reads.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How relay connections are established.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Bound applied separately to connecting, each write, and timed reads.
    pub timeout: Duration,
    /// Optional SOCKS5 proxy (host:port), e.g. a local Tor daemon.
    pub proxy: Option<String>,
}

type RelayStream = WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>;

/// Open connection to one relay. Never shared between tasks.
pub struct RelayConnection {
    url: String,
    ws: RelayStream,
    timeout: Duration,
}

impl RelayConnection {
    /// Connect to `relay` (ws:// or wss://) within the configured timeout.
    pub async fn connect(relay: &str, opts: &ConnectOptions) -> Result<Self> {
        let ws = timeout(opts.timeout, connect_ws(relay, opts.proxy.as_deref()))
            .await
            .map_err(|_| Error::peer(relay, "connect timed out"))??;
        debug!(relay, "connected");
        Ok(Self {
            url: relay.to_string(),
            ws,
            timeout: opts.timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one frame, bounded by the write timeout.
    pub async fn send(&mut self, msg: &ClientMessage<'_>) -> Result<()> {
        let text = msg.to_json()?;
        debug!(relay = %self.url, frame = %text, "send");
        timeout(self.timeout, self.ws.send(Message::Text(text)))
            .await
            .map_err(|_| Error::peer(&self.url, "write timed out"))?
            .map_err(|e| Error::peer(&self.url, e))
    }

    /// Wait for the next text frame.
    ///
    /// Returns `Ok(None)` once the relay closed the connection. A frame that
    /// cannot be decoded yields [`Error::Protocol`]; the connection stays usable.
    pub async fn recv(&mut self) -> Result<Option<RelayMessage>> {
        while let Some(msg) = self.ws.next().await {
            match msg.map_err(|e| Error::peer(&self.url, e))? {
                Message::Text(txt) => {
                    debug!(relay = %self.url, frame = %txt, "recv");
                    return RelayMessage::parse(&txt)
                        .map(Some)
                        .map_err(|reason| Error::protocol(&self.url, reason));
                }
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    /// [`recv`](Self::recv) bounded by the read timeout.
    pub async fn recv_timeout(&mut self) -> Result<Option<RelayMessage>> {
        timeout(self.timeout, self.recv())
            .await
            .map_err(|_| Error::peer(&self.url, "read timed out"))?
    }

    /// Close the socket, ignoring errors from an already dead peer.
    pub async fn close(mut self) {
        let _ = timeout(Duration::from_secs(1), self.ws.close(None)).await;
    }
}

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
async fn connect_ws(relay: &str, proxy: Option<&str>) -> Result<RelayStream> {
    let url = Url::parse(relay).map_err(|e| Error::peer(relay, e))?;
    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(Error::peer(relay, "relay URL must use ws:// or wss://"));
    }
    let host = url
        .host_str()
        .ok_or_else(|| Error::peer(relay, "missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::peer(relay, "missing port"))?;
    let req = relay
        .into_client_request()
        .map_err(|e| Error::peer(relay, e))?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = proxy {
        Box::new(
            Socks5Stream::connect(proxy, (host, port))
                .await
                .map_err(|e| Error::peer(relay, e))?,
        )
    } else {
        Box::new(
            TcpStream::connect((host, port))
                .await
                .map_err(|e| Error::peer(relay, e))?,
        )
    };
    let (ws, _) = client_async_tls(req, stream)
        .await
        .map_err(|e| Error::peer(relay, e))?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::spawn_relay;
    use tokio_tungstenite::tungstenite::Message as TMsg;

    fn opts(ms: u64) -> ConnectOptions {
        ConnectOptions {
            timeout: Duration::from_millis(ms),
            proxy: None,
        }
    }

    #[tokio::test]
    async fn send_and_receive_frames() {
        let url = spawn_relay(|mut ws| async move {
            if let Some(Ok(TMsg::Text(txt))) = ws.next().await {
                assert_eq!(txt, r#"["CLOSE","s"]"#);
            }
            ws.send(TMsg::Text(r#"["NOTICE","hello"]"#.into()))
                .await
                .unwrap();
            ws.send(TMsg::Text("garbage".into())).await.unwrap();
            ws.send(TMsg::Text(r#"["EOSE","s"]"#.into())).await.unwrap();
            ws.close(None).await.ok();
        })
        .await;

        let mut conn = RelayConnection::connect(&url, &opts(2000)).await.unwrap();
        assert_eq!(conn.url(), url);
        conn.send(&ClientMessage::Close("s")).await.unwrap();
        assert_eq!(
            conn.recv().await.unwrap(),
            Some(RelayMessage::Notice {
                message: "hello".into()
            })
        );
        assert!(matches!(conn.recv().await, Err(Error::Protocol { .. })));
        assert!(matches!(
            conn.recv().await.unwrap(),
            Some(RelayMessage::Eose { .. })
        ));
        assert_eq!(conn.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_timeout_is_peer_error() {
        let url = spawn_relay(|mut ws| async move {
            while ws.next().await.is_some() {}
        })
        .await;
        let mut conn = RelayConnection::connect(&url, &opts(200)).await.unwrap();
        let err = conn.recv_timeout().await.unwrap_err();
        assert!(err.to_string().contains("read timed out"));
        conn.close().await;
    }

    #[tokio::test]
    async fn connect_refused_is_peer_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = RelayConnection::connect(&format!("ws://{addr}"), &opts(1000))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Peer { .. }));
    }

    #[tokio::test]
    async fn stalled_handshake_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let started = std::time::Instant::now();
        let err = RelayConnection::connect(&format!("ws://{addr}"), &opts(200))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("connect timed out"));
        assert!(started.elapsed() < Duration::from_secs(2));
        hold.abort();
    }

    #[tokio::test]
    async fn rejects_non_websocket_scheme() {
        let err = RelayConnection::connect("http://127.0.0.1:1", &opts(500))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("ws://"));
    }
}
