//! Socket transport to the emulator's monitor endpoint.
//!
//! - Unix: Unix Domain Socket (the emulator's default)
//! - Any platform: TCP, selected with a `tcp:HOST:PORT` endpoint
//!
//! # Example
//!
//! ```ignore
//! use a800mon_client::transport::{Endpoint, SocketTransport, Transport};
//!
//! let mut transport = SocketTransport::new(Endpoint::parse("/tmp/atari.sock"));
//! transport.connect().await?;
//! let (status, data) = transport.send(1, &[]).await?;
//! ```

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{BoxFuture, Transport};
use crate::error::{MonitorError, Result};
use crate::protocol::{build_request, payload, Command, CommandTable, ReplyHeader, HEADER_SIZE};

/// Default deadline for each individual I/O operation.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(500);

/// Opcode of the capability probe sent right after connecting.
const PROBE_OPCODE: u8 = 27;

/// Where the emulator listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket path.
    #[cfg(unix)]
    Unix(std::path::PathBuf),
    /// `host:port` address.
    Tcp(String),
}

impl Endpoint {
    /// Parse an endpoint string.
    ///
    /// `tcp:HOST:PORT` selects TCP; anything else is a socket path
    /// (or a TCP address on platforms without Unix sockets).
    pub fn parse(s: &str) -> Self {
        if let Some(addr) = s.strip_prefix("tcp:") {
            return Endpoint::Tcp(addr.to_string());
        }
        #[cfg(unix)]
        {
            Endpoint::Unix(std::path::PathBuf::from(s))
        }
        #[cfg(not(unix))]
        {
            Endpoint::Tcp(s.to_string())
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// Per-operation deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Deadline for opening the socket.
    pub connect_timeout: Duration,
    /// Deadline for writing and flushing one request frame.
    pub write_timeout: Duration,
    /// Deadline for each exact read (header, then payload).
    pub read_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_IO_TIMEOUT,
            write_timeout: DEFAULT_IO_TIMEOUT,
            read_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

// ============================================================================
// Connection stream
// ============================================================================

/// A connected stream of either kind.
enum Connection {
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    Tcp(TcpStream),
}

impl Connection {
    async fn open(endpoint: &Endpoint) -> std::io::Result<Self> {
        match endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Connection::Unix(tokio::net::UnixStream::connect(path).await?)),
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(Connection::Tcp(stream))
            }
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            Connection::Unix(s) => Pin::new(s).poll_read(cx, buf),
            Connection::Tcp(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            #[cfg(unix)]
            Connection::Unix(s) => Pin::new(s).poll_write(cx, buf),
            Connection::Tcp(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            Connection::Unix(s) => Pin::new(s).poll_flush(cx),
            Connection::Tcp(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            Connection::Unix(s) => Pin::new(s).poll_shutdown(cx),
            Connection::Tcp(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Socket-backed [`Transport`].
pub struct SocketTransport {
    endpoint: Endpoint,
    config: TransportConfig,
    stream: Option<Connection>,
    caps: Vec<u16>,
    table: CommandTable,
    /// Set while a frame exchange is in progress. Still set on entry means
    /// the previous exchange was dropped mid-frame.
    in_exchange: bool,
}

impl SocketTransport {
    /// Create a disconnected transport with default deadlines.
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_config(endpoint, TransportConfig::default())
    }

    /// Create a disconnected transport with custom deadlines.
    pub fn with_config(endpoint: Endpoint, config: TransportConfig) -> Self {
        Self {
            endpoint,
            config,
            stream: None,
            caps: Vec::new(),
            table: CommandTable::static_subset(),
            in_exchange: false,
        }
    }

    /// The endpoint this transport connects to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn dial(&self) -> Result<Connection> {
        match timeout(self.config.connect_timeout, Connection::open(&self.endpoint)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(MonitorError::Connection(format!(
                "Cannot connect to socket {}: {}",
                self.endpoint, e
            ))),
            Err(_) => Err(MonitorError::Connection(format!(
                "Cannot connect to socket {}: timed out",
                self.endpoint
            ))),
        }
    }

    async fn open(&mut self) -> Result<()> {
        self.close().await;
        self.stream = Some(self.dial().await?);
        tracing::debug!("Connected to {}", self.endpoint);

        if !self.probe().await {
            // stream position is unknown after an I/O failure; start over unprobed
            self.close().await;
            self.stream = Some(self.dial().await?);
            self.table = CommandTable::from_capabilities(&[]);
            tracing::debug!("Reconnected to {} without capabilities", self.endpoint);
        }
        Ok(())
    }

    /// Query build features. Advisory: every failure leaves caps empty.
    ///
    /// Returns false when the probe failed on I/O and the stream can no
    /// longer be trusted.
    async fn probe(&mut self) -> bool {
        self.in_exchange = true;
        let reply = self.exchange(PROBE_OPCODE, &[]).await;
        self.in_exchange = false;

        let caps = match reply {
            Ok((0, data)) => match payload::decode_capabilities(&data) {
                Ok(caps) => caps,
                Err(e) => {
                    tracing::warn!("Ignoring malformed capability reply: {}", e);
                    Vec::new()
                }
            },
            Ok((status, _)) => {
                tracing::debug!("Capability probe returned status {}", status);
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Capability probe failed: {}", e);
                return false;
            }
        };
        tracing::debug!("Peer capabilities: {:?}", caps);
        self.table = CommandTable::from_capabilities(&caps);
        self.caps = caps;
        true
    }

    async fn close(&mut self) {
        self.caps.clear();
        self.table = CommandTable::static_subset();
        if let Some(mut stream) = self.stream.take() {
            let _ = timeout(self.config.write_timeout, stream.shutdown()).await;
            tracing::debug!("Disconnected from {}", self.endpoint);
        }
    }

    /// Write one frame and read exactly one reply, without reconnect logic.
    async fn exchange(&mut self, opcode: u8, body: &[u8]) -> Result<(u8, Bytes)> {
        let frame = build_request(opcode, body)?;
        let config = self.config;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| MonitorError::Connection("Socket not connected".to_string()))?;

        timeout(config.write_timeout, async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| MonitorError::Timeout("Write"))??;

        let mut header = [0u8; HEADER_SIZE];
        read_exact(stream, &mut header, config.read_timeout).await?;
        let header = ReplyHeader::decode(&header)
            .ok_or_else(|| MonitorError::Connection("Incorrect data frame".to_string()))?;

        if header.payload_length == 0 {
            return Ok((header.status, Bytes::new()));
        }
        let mut data = vec![0u8; header.payload_length as usize];
        read_exact(stream, &mut data, config.read_timeout).await?;
        Ok((header.status, Bytes::from(data)))
    }

    async fn send_frame(&mut self, opcode: u8, body: &[u8]) -> Result<(u8, Bytes)> {
        if self.in_exchange {
            tracing::debug!("Previous exchange was abandoned, reconnecting");
            self.in_exchange = false;
            self.close().await;
        }
        if self.stream.is_none() {
            self.open().await?;
        }
        self.in_exchange = true;
        let result = self.exchange(opcode, body).await;
        self.in_exchange = false;
        match result {
            Ok(reply) => Ok(reply),
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }
}

/// Fill `buf` completely or fail; a short read is a broken frame.
async fn read_exact<S>(stream: &mut S, buf: &mut [u8], deadline: Duration) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    match timeout(deadline, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(MonitorError::Connection("Incorrect data frame".to_string()))
        }
        Ok(Err(e)) => Err(MonitorError::Io(e)),
        Err(_) => Err(MonitorError::Timeout("Packet")),
    }
}

impl Transport for SocketTransport {
    fn translate(&self, command: Command) -> Result<u8> {
        self.table.translate(command)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn capabilities(&self) -> &[u16] {
        &self.caps
    }

    fn connect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.open())
    }

    fn send<'a>(&'a mut self, opcode: u8, payload: &'a [u8]) -> BoxFuture<'a, Result<(u8, Bytes)>> {
        Box::pin(self.send_frame(opcode, payload))
    }

    fn disconnect(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(self.close())
    }
}
