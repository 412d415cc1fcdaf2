//! TCP transport implementation

use std::future::Future;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use berkeley_core::{SyncError, SyncResult, MAX_MESSAGE_SIZE};

/// Default deadline for a single read or write
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Listening endpoint of the coordinator
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpAcceptor {
    /// Bind and listen. Failure here is the one fatal error of a cycle.
    pub async fn bind(addr: &str) -> SyncResult<Self> {
        let bind_error = |e: io::Error| SyncError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        };

        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        Ok(TcpAcceptor {
            listener,
            local_addr,
        })
    }

    /// Get local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait at most `wait` for one connection.
    /// `Ok(None)` means the poll interval elapsed with nobody connecting.
    pub async fn accept_within(&self, wait: Duration) -> SyncResult<Option<Connection>> {
        match timeout(wait, self.listener.accept()).await {
            Err(_) => Ok(None),
            Ok(Ok((stream, peer))) => Ok(Some(Connection::new(stream, peer))),
            Ok(Err(e)) => Err(SyncError::TransportError(e.to_string())),
        }
    }
}

/// One client connection; every operation is bounded by `io_timeout`
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    io_timeout: Duration,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        // Payloads are tiny; Nagle would only add latency to the RTT
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "cannot disable Nagle: {}", e);
        }
        Connection {
            stream,
            peer,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Connect to a remote endpoint within `connect_timeout`
    pub async fn connect(addr: &str, connect_timeout: Duration) -> SyncResult<Self> {
        let stream = deadline(connect_timeout, TcpStream::connect(addr)).await?;
        let peer = stream.peer_addr().map_err(map_io_error)?;
        Ok(Connection::new(stream, peer))
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// Write a whole payload
    pub async fn send(&mut self, payload: &[u8]) -> SyncResult<()> {
        deadline(self.io_timeout, self.stream.write_all(payload)).await
    }

    /// Read one message: a single read of at most `MAX_MESSAGE_SIZE` bytes.
    /// A peer that closes instead of answering yields `Disconnected`.
    pub async fn recv(&mut self) -> SyncResult<Bytes> {
        let mut buf = BytesMut::with_capacity(MAX_MESSAGE_SIZE);
        let n = deadline(self.io_timeout, self.stream.read_buf(&mut buf)).await?;
        if n == 0 {
            return Err(SyncError::Disconnected);
        }
        Ok(buf.freeze())
    }

    /// Read until the peer half-closes. May be empty.
    pub async fn recv_until_close(&mut self) -> SyncResult<Bytes> {
        let mut buf = BytesMut::with_capacity(MAX_MESSAGE_SIZE);
        loop {
            let n = deadline(self.io_timeout, self.stream.read_buf(&mut buf)).await?;
            if n == 0 {
                return Ok(buf.freeze());
            }
            if buf.len() > MAX_MESSAGE_SIZE {
                return Err(SyncError::MalformedPayload(format!(
                    "payload exceeds {} bytes",
                    MAX_MESSAGE_SIZE
                )));
            }
        }
    }

    /// Half-close the write side, then the read side, then drop the socket
    pub async fn close(self) -> SyncResult<()> {
        let Connection {
            mut stream,
            io_timeout,
            ..
        } = self;

        deadline(io_timeout, stream.shutdown()).await?;

        let std_stream = stream.into_std().map_err(map_io_error)?;
        match std_stream.shutdown(Shutdown::Read) {
            // Peer already gone: nothing left to shut down
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(map_io_error(e)),
            _ => Ok(()),
        }
    }
}

/// Run an I/O future under a deadline
async fn deadline<T>(
    limit: Duration,
    fut: impl Future<Output = io::Result<T>>,
) -> SyncResult<T> {
    match timeout(limit, fut).await {
        Ok(result) => result.map_err(map_io_error),
        Err(_) => Err(SyncError::ConnectionTimeout(limit)),
    }
}

fn map_io_error(e: io::Error) -> SyncError {
    match e.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => SyncError::Disconnected,
        _ => SyncError::TransportError(e.to_string()),
    }
}
