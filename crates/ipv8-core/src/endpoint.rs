//! Outbound side of a transport, as seen by an overlay.

use crate::address::Address;
use ipv8_transport::{MAX_DATAGRAM_SIZE, Transport};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Fire-and-forget datagram sink.
///
/// Send failures are the endpoint's business: they are logged and never
/// reach the protocol state machine.
pub trait Endpoint: Send + Sync {
    /// Queue `data` for delivery to `address`.
    fn send(&self, address: Address, data: Vec<u8>);

    /// Whether the endpoint can still send.
    fn is_open(&self) -> bool;
}

/// [`Endpoint`] over an async [`Transport`]; every send runs as its own task.
pub struct TransportEndpoint {
    transport: Arc<dyn Transport>,
    handle: Handle,
}

impl TransportEndpoint {
    /// Wrap `transport`, spawning sends on `handle`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, handle: Handle) -> Self {
        Self { transport, handle }
    }

    /// The wrapped transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl Endpoint for TransportEndpoint {
    fn send(&self, address: Address, data: Vec<u8>) {
        if address.is_empty() {
            tracing::trace!("Not sending {} bytes to empty address", data.len());
            return;
        }
        if data.len() > MAX_DATAGRAM_SIZE {
            tracing::warn!(
                "Dropping oversized datagram to {}: {} bytes",
                address,
                data.len()
            );
            return;
        }

        let transport = Arc::clone(&self.transport);
        self.handle.spawn(async move {
            if let Err(e) = transport.send_to(&data, address.to_socket_addr()).await {
                tracing::warn!("Send to {} failed: {}", address, e);
            }
        });
    }

    fn is_open(&self) -> bool {
        !self.transport.is_closed()
    }
}
