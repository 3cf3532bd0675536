//! Tokio UDP transport.

use crate::transport::{StatsCounters, Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;

/// Socket buffer size requested from the kernel.
const SOCKET_BUFFER_SIZE: usize = 512 * 1024;

/// UDP transport shared by all overlays of a node.
///
/// Cloning is cheap; clones share the socket, the counters and the closed
/// state. Closing wakes every pending `recv_from`.
///
/// # Examples
///
/// ```no_run
/// use ipv8_transport::{Transport, UdpTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = UdpTransport::bind("0.0.0.0:8090".parse()?).await?;
/// transport.send_to(b"hello", "127.0.0.1:8091".parse()?).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    stats: Arc<StatsCounters>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl UdpTransport {
    /// Bind a UDP socket on `addr`. Port 0 picks a free port.
    ///
    /// # Errors
    /// Returns [`TransportError::BindFailed`] if the socket cannot be created,
    /// configured, or bound.
    pub async fn bind(addr: SocketAddr) -> TransportResult<Self> {
        let fail = |e: std::io::Error| TransportError::BindFailed {
            addr,
            reason: e.to_string(),
        };

        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };
        let socket = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
            .map_err(fail)?;
        socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE).map_err(fail)?;
        socket.set_send_buffer_size(SOCKET_BUFFER_SIZE).map_err(fail)?;
        socket.bind(&addr.into()).map_err(fail)?;
        socket.set_nonblocking(true).map_err(fail)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket).map_err(fail)?;
        tracing::debug!(%addr, "UDP transport bound");

        Ok(Self::from_socket(socket))
    }

    /// Wrap an already bound Tokio socket.
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            socket: Arc::new(socket),
            stats: Arc::new(StatsCounters::default()),
            shutdown: Arc::new(shutdown),
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        match self.socket.send_to(buf, addr).await {
            Ok(sent) => {
                self.stats.record_send(sent);
                Ok(sent)
            }
            Err(e) => {
                self.stats.record_send_error();
                Err(TransportError::Io(e))
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        let mut closed = self.shutdown.subscribe();
        if *closed.borrow() {
            return Err(TransportError::Closed);
        }

        tokio::select! {
            result = self.socket.recv_from(buf) => match result {
                Ok((size, from)) => {
                    self.stats.record_recv(size);
                    Ok((size, from))
                }
                Err(e) => {
                    self.stats.record_recv_error();
                    Err(TransportError::Io(e))
                }
            },
            _ = closed.changed() => Err(TransportError::Closed),
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) -> TransportResult<()> {
        self.shutdown.send_replace(true);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}
