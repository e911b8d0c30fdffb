//! WebSocket dialing and the download/upload transfer connections.

use super::worker::{Connector, Transfer, WorkerKind};
use super::ServerEndpoints;
use crate::config::{LocalBind, TestConfiguration};
use crate::error::{Error, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::debug;
use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use url::Url;

/// Size of one upload message: below common per-frame limits, large enough
/// to keep framing overhead negligible.
pub const UPLOAD_MESSAGE_SIZE: usize = 64_500;

/// Read and write buffer size of every connection.
pub const BUFFER_SIZE: usize = 16 * 1024;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections with the configured headers and local binding.
#[derive(Debug, Clone)]
pub struct Dialer {
    headers: Vec<(String, String)>,
    local_bind: LocalBind,
    connect_timeout: Duration,
}

impl Dialer {
    pub fn new(config: &TestConfiguration) -> Self {
        Self {
            headers: config.request_headers(),
            local_bind: config.local_bind.clone(),
            connect_timeout: config.connect_timeout,
        }
    }

    pub async fn dial(&self, url: &Url) -> Result<WsStream> {
        timeout(self.connect_timeout, self.handshake(url))
            .await
            .map_err(|_| Error::Connectivity(format!("timed out connecting to {}", url)))?
    }

    async fn handshake(&self, url: &Url) -> Result<WsStream> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Config(format!("invalid WebSocket URL {}: {}", url, e)))?;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("invalid header name {:?}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("invalid value for header {}: {}", name, e)))?;
            request.headers_mut().append(name, value);
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("URL has no host: {}", url)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::Config(format!("URL has no port: {}", url)))?;
        let tcp = self.connect_tcp(host, port).await?;

        let (stream, response) =
            client_async_tls_with_config(request, tcp, Some(websocket_config()), None)
                .await
                .map_err(|e| Error::Connectivity(format!("handshake with {} failed: {}", url, e)))?;
        debug!("connected to {} ({})", url, response.status());
        Ok(stream)
    }

    async fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addrs = lookup_host((host, port))
            .await
            .map_err(|e| Error::Connectivity(format!("cannot resolve {}: {}", host, e)))?;

        let local = self.local_bind.local_ip()?;

        let mut last_error = None;
        for addr in addrs {
            match self.connect_addr(addr, local).await {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    debug!("connecting to {} failed: {}", addr, err);
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| Error::Connectivity(format!("no usable address for {}", host))))
    }

    async fn connect_addr(&self, addr: SocketAddr, local: Option<IpAddr>) -> Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| Error::Connectivity(format!("cannot open socket: {}", e)))?;

        if let Some(ip) = local {
            if ip.is_ipv4() != addr.is_ipv4() {
                return Err(Error::Connectivity(format!(
                    "local address {} cannot reach {}",
                    ip, addr
                )));
            }
            socket
                .bind(SocketAddr::new(ip, 0))
                .map_err(|e| Error::Connectivity(format!("cannot bind to {}: {}", ip, e)))?;
        }

        let stream = socket
            .connect(addr)
            .await
            .map_err(|e| Error::Connectivity(format!("cannot connect to {}: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::Connectivity(e.to_string()))?;
        Ok(stream)
    }
}

fn websocket_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.read_buffer_size = BUFFER_SIZE;
    config.write_buffer_size = BUFFER_SIZE;
    config
}

/// Connects transfer workers to the download and upload endpoints.
pub struct WsConnector {
    dialer: Dialer,
    download_url: Url,
    upload_url: Url,
}

impl WsConnector {
    pub fn new(endpoints: &ServerEndpoints, config: &TestConfiguration) -> Self {
        Self {
            dialer: Dialer::new(config),
            download_url: endpoints.download_url().clone(),
            upload_url: endpoints.upload_url().clone(),
        }
    }
}

impl Connector for WsConnector {
    type Conn = WsTransfer;

    async fn connect(&self, kind: WorkerKind) -> Result<WsTransfer> {
        let url = match kind {
            WorkerKind::Download => &self.download_url,
            WorkerKind::Upload => &self.upload_url,
        };
        let stream = self.dialer.dial(url).await?;
        Ok(WsTransfer::new(stream, kind))
    }
}

pub struct WsTransfer {
    stream: WsStream,
    kind: WorkerKind,
    filler: Bytes,
}

impl WsTransfer {
    fn new(stream: WsStream, kind: WorkerKind) -> Self {
        let filler = match kind {
            WorkerKind::Download => Bytes::new(),
            WorkerKind::Upload => filler_buffer(),
        };
        Self {
            stream,
            kind,
            filler,
        }
    }

    async fn receive(&mut self) -> Result<u64> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(data.len() as u64),
                Some(Ok(Message::Text(text))) => return Ok(text.len() as u64),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(Error::Transfer("connection closed by server".into()))
                }
                // ping, pong and raw frames carry no payload worth counting
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(Error::Transfer(e.to_string())),
            }
        }
    }

    async fn send(&mut self) -> Result<u64> {
        self.stream
            .send(Message::Binary(self.filler.clone()))
            .await
            .map_err(|e| Error::Transfer(e.to_string()))?;
        Ok(self.filler.len() as u64)
    }
}

impl Transfer for WsTransfer {
    async fn transfer(&mut self) -> Result<u64> {
        match self.kind {
            WorkerKind::Download => self.receive().await,
            WorkerKind::Upload => self.send().await,
        }
    }

    async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}

fn filler_buffer() -> Bytes {
    let mut data = vec![0u8; UPLOAD_MESSAGE_SIZE];
    rand::thread_rng().fill(&mut data[..]);
    Bytes::from(data)
}
