//! In-process datagram switch.
//!
//! [`MemoryNetwork`] routes datagrams between [`MemoryTransport`]s by socket
//! address, so a whole overlay can run inside one test without sockets.
//! Datagrams to an address nobody is bound to are dropped, as UDP would.

use crate::transport::{StatsCounters, Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use tokio::sync::{Mutex, mpsc, watch};

type Datagram = (Vec<u8>, SocketAddr);

/// First port handed out for binds on port 0.
const EPHEMERAL_PORT_START: u16 = 49_152;

/// Shared switch that owns the address table.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    routes: Arc<DashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>>,
    next_port: Arc<AtomicU16>,
}

impl MemoryNetwork {
    /// Create an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a transport at `addr`. Port 0 picks an unused port.
    ///
    /// # Errors
    /// Returns [`TransportError::BindFailed`] if the address is taken.
    pub fn bind(&self, addr: SocketAddr) -> TransportResult<MemoryTransport> {
        let addr = if addr.port() == 0 {
            self.ephemeral(addr)
        } else {
            addr
        };

        let (tx, rx) = mpsc::unbounded_channel();
        match self.routes.entry(addr) {
            Entry::Occupied(_) => {
                return Err(TransportError::BindFailed {
                    addr,
                    reason: "address in use".into(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }

        let (shutdown, _) = watch::channel(false);
        Ok(MemoryTransport {
            addr,
            network: self.clone(),
            inbox: Arc::new(Mutex::new(rx)),
            stats: Arc::new(StatsCounters::default()),
            shutdown: Arc::new(shutdown),
        })
    }

    /// Number of bound transports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no transport is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn ephemeral(&self, addr: SocketAddr) -> SocketAddr {
        loop {
            let offset = self.next_port.fetch_add(1, Ordering::Relaxed);
            let mut candidate = addr;
            candidate.set_port(EPHEMERAL_PORT_START.wrapping_add(offset).max(1));
            if !self.routes.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, data: &[u8]) -> bool {
        match self.routes.get(&to) {
            Some(route) => route.send((data.to_vec(), from)).is_ok(),
            None => false,
        }
    }
}

/// One endpoint on a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    addr: SocketAddr,
    network: MemoryNetwork,
    inbox: Arc<Mutex<mpsc::UnboundedReceiver<Datagram>>>,
    stats: Arc<StatsCounters>,
    shutdown: Arc<watch::Sender<bool>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if !self.network.deliver(self.addr, addr, buf) {
            tracing::trace!(from = %self.addr, to = %addr, "datagram dropped, no route");
        }
        self.stats.record_send(buf.len());
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        let mut closed = self.shutdown.subscribe();
        if *closed.borrow() {
            return Err(TransportError::Closed);
        }

        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            datagram = inbox.recv() => match datagram {
                Some((data, from)) => {
                    let size = data.len().min(buf.len());
                    buf[..size].copy_from_slice(&data[..size]);
                    self.stats.record_recv(size);
                    Ok((size, from))
                }
                None => Err(TransportError::Closed),
            },
            _ = closed.changed() => Err(TransportError::Closed),
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.addr)
    }

    async fn close(&self) -> TransportResult<()> {
        self.network.routes.remove(&self.addr);
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
