//! The node runtime.
//!
//! [`Ipv8`] runs any number of overlays over one transport and one shared
//! [`Network`]. Once started it drives three tasks:
//!
//! ```text
//! receive loop   transport.recv_from -> spawn per datagram -> every overlay's on_packet
//! tick loop      every walker_interval -> lifecycle lock -> each strategy's take_step
//! LAN loop       every lan_estimation_interval -> on_estimated_lan_changed
//! ```
//!
//! The packet path never takes the lifecycle lock. Adding or removing an
//! overlay, stopping, and running a tick all take it, so a tick never runs
//! against a half-removed overlay.

use crate::address::Address;
use crate::community::{Community, CommunityBuilder};
use crate::config::{Ipv8Config, OverlayConfig};
use crate::endpoint::{Endpoint, TransportEndpoint};
use crate::error::{Ipv8Error, Result};
use crate::network::Network;
use crate::packet::{Packet, ServiceId};
use crate::peer::Peer;
use crate::strategy::{self, DiscoveryStrategy};
use ipv8_crypto::PrivateKey;
use ipv8_transport::{
    MAX_DATAGRAM_SIZE, Transport, TransportError, TransportStats, UdpTransport, lan,
};
use std::any::Any;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// State guarded by the lifecycle lock.
#[derive(Default)]
struct Lifecycle {
    endpoint: Option<Arc<dyn Endpoint>>,
    strategies: Vec<Box<dyn DiscoveryStrategy>>,
}

#[derive(Default)]
struct Tasks {
    receive: Option<JoinHandle<()>>,
    tick: Option<JoinHandle<()>>,
    lan: Option<JoinHandle<()>>,
}

struct Ipv8Inner {
    config: Ipv8Config,
    key: Arc<PrivateKey>,
    my_peer: Peer,
    transport: Arc<dyn Transport>,
    network: Arc<Network>,
    running: AtomicBool,
    overlays: RwLock<Vec<Arc<Community>>>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    tasks: Mutex<Tasks>,
}

/// An IPv8 node.
///
/// Cheap to clone; clones share the same node. A stopped node has closed
/// its transport and cannot be started again.
#[derive(Clone)]
pub struct Ipv8 {
    inner: Arc<Ipv8Inner>,
}

impl Ipv8 {
    /// Create a node on an existing transport.
    ///
    /// # Errors
    ///
    /// Returns [`Ipv8Error::InvalidConfig`] or
    /// [`Ipv8Error::DuplicateOverlay`] if `config` does not validate.
    pub fn new(
        config: Ipv8Config,
        key: impl Into<Arc<PrivateKey>>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let key = key.into();
        let my_peer = Peer::new(Arc::clone(&key), Address::EMPTY, false);

        Ok(Self {
            inner: Arc::new(Ipv8Inner {
                config,
                key,
                my_peer,
                transport,
                network: Arc::new(Network::new()),
                running: AtomicBool::new(false),
                overlays: RwLock::new(Vec::new()),
                lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
                tasks: Mutex::new(Tasks::default()),
            }),
        })
    }

    /// Create a node on a UDP socket bound to `config.listen_addr`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the socket cannot be bound.
    pub async fn bind(config: Ipv8Config, key: impl Into<Arc<PrivateKey>>) -> Result<Self> {
        let transport = UdpTransport::bind(config.listen_addr).await?;
        Self::new(config, key, Arc::new(transport))
    }

    /// Start the configured overlays and the background loops.
    ///
    /// # Errors
    ///
    /// Returns [`Ipv8Error::AlreadyStarted`] if running, or a transport
    /// error if the transport was already closed.
    pub async fn start(&self) -> Result<()> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Ipv8Error::AlreadyStarted);
        }
        if self.inner.transport.is_closed() {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(TransportError::Closed.into());
        }

        tracing::info!(
            "Starting IPv8 node {} on {}",
            self.inner.my_peer.mid(),
            self.local_addr()
                .map_or_else(|_| "unknown address".to_string(), |addr| addr.to_string())
        );

        let endpoint: Arc<dyn Endpoint> = Arc::new(TransportEndpoint::new(
            Arc::clone(&self.inner.transport),
            Handle::current(),
        ));
        {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            lifecycle.endpoint = Some(endpoint);
            for overlay in self.inner.config.overlays.clone() {
                if let Err(e) = self.inner.load_overlay(&mut lifecycle, overlay) {
                    drop(lifecycle);
                    self.inner.running.store(false, Ordering::SeqCst);
                    self.inner.unload_all().await;
                    return Err(e);
                }
            }
        }
        self.inner.estimate_lan();

        let mut tasks = self.inner.tasks();
        tasks.receive = Some(tokio::spawn(receive_loop(Arc::clone(&self.inner))));
        tasks.tick = Some(tokio::spawn(tick_loop(Arc::clone(&self.inner))));
        tasks.lan = Some(tokio::spawn(lan_estimation_loop(Arc::clone(&self.inner))));
        drop(tasks);

        tracing::info!("IPv8 node started with {} overlays", self.overlays().len());
        Ok(())
    }

    /// Stop ticking, unload every overlay and close the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Ipv8Error::NotRunning`] if the node is not running.
    pub async fn stop(&self) -> Result<()> {
        if self
            .inner
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Ipv8Error::NotRunning);
        }

        let tasks = std::mem::take(&mut *self.inner.tasks());

        // No tick may run against a closed transport.
        if let Some(tick) = tasks.tick {
            tick.abort();
            let _ = tick.await;
        }
        if let Some(lan) = tasks.lan {
            lan.abort();
            let _ = lan.await;
        }

        self.inner.unload_all().await;

        if let Err(e) = self.inner.transport.close().await {
            tracing::warn!("Error closing transport: {}", e);
        }
        if let Some(receive) = tasks.receive {
            receive.abort();
            let _ = receive.await;
        }

        tracing::info!("IPv8 node stopped");
        Ok(())
    }

    /// Start an overlay on a running node.
    ///
    /// # Errors
    ///
    /// Returns [`Ipv8Error::NotRunning`], [`Ipv8Error::DuplicateOverlay`],
    /// or [`Ipv8Error::InvalidConfig`].
    pub async fn add_overlay(&self, config: OverlayConfig) -> Result<Arc<Community>> {
        let community = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            if !self.is_started() {
                return Err(Ipv8Error::NotRunning);
            }
            self.inner.load_overlay(&mut lifecycle, config)?
        };
        self.inner.estimate_lan();
        Ok(community)
    }

    /// Stop one overlay and its strategies.
    ///
    /// # Errors
    ///
    /// Returns [`Ipv8Error::UnknownOverlay`] if no overlay has this id.
    pub async fn remove_overlay(&self, service_id: &ServiceId) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        let community = {
            let mut overlays = self.inner.overlays_mut();
            let index = overlays
                .iter()
                .position(|overlay| overlay.service_id() == *service_id)
                .ok_or(Ipv8Error::UnknownOverlay(*service_id))?;
            overlays.remove(index)
        };

        let (mut removed, kept): (Vec<_>, Vec<_>) = lifecycle
            .strategies
            .drain(..)
            .partition(|strategy| Arc::ptr_eq(strategy.overlay(), &community));
        lifecycle.strategies = kept;
        for strategy in &mut removed {
            strategy.unload();
        }
        community.unload();
        Ok(())
    }

    /// Run one walk step of every strategy now, as the periodic tick does.
    pub async fn tick(&self) {
        self.inner.tick().await;
    }

    /// The overlay with this id.
    #[must_use]
    pub fn overlay(&self, service_id: &ServiceId) -> Option<Arc<Community>> {
        self.inner
            .overlays()
            .iter()
            .find(|overlay| overlay.service_id() == *service_id)
            .cloned()
    }

    /// Every running overlay.
    #[must_use]
    pub fn overlays(&self) -> Vec<Arc<Community>> {
        self.inner.overlays().clone()
    }

    /// The registry shared by all overlays.
    #[must_use]
    pub fn network(&self) -> &Arc<Network> {
        &self.inner.network
    }

    /// The local node.
    #[must_use]
    pub fn my_peer(&self) -> &Peer {
        &self.inner.my_peer
    }

    /// Node configuration.
    #[must_use]
    pub fn config(&self) -> &Ipv8Config {
        &self.inner.config
    }

    /// Whether the node is running.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Address the transport is bound to.
    ///
    /// # Errors
    ///
    /// Propagates the transport's failure.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.transport.local_addr()?)
    }

    /// Traffic counters of the transport.
    #[must_use]
    pub fn transport_stats(&self) -> TransportStats {
        self.inner.transport.stats()
    }
}

impl Ipv8Inner {
    fn overlays(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Community>>> {
        self.overlays.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn overlays_mut(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<Community>>> {
        self.overlays.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_overlay(&self, lifecycle: &mut Lifecycle, config: OverlayConfig) -> Result<Arc<Community>> {
        let service_id = config.settings.service_id;
        if self
            .overlays()
            .iter()
            .any(|overlay| overlay.service_id() == service_id)
        {
            return Err(Ipv8Error::DuplicateOverlay(service_id));
        }
        config.settings.validate()?;
        let endpoint = lifecycle.endpoint.clone().ok_or(Ipv8Error::NotRunning)?;

        let mut builder = CommunityBuilder::new(
            config.settings,
            Arc::clone(&self.key),
            Arc::clone(&self.network),
            endpoint,
        );
        for (message_id, handler) in config.handlers {
            builder = builder.shared_handler(message_id, handler);
        }
        let community = Arc::new(builder.build());
        community.load();

        for walker in &config.walkers {
            let mut strategy = strategy::from_config(Arc::clone(&community), walker);
            strategy.load();
            lifecycle.strategies.push(strategy);
        }
        self.overlays_mut().push(Arc::clone(&community));
        Ok(community)
    }

    async fn unload_all(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        for mut strategy in lifecycle.strategies.drain(..) {
            strategy.unload();
        }
        lifecycle.endpoint = None;
        for overlay in self.overlays_mut().drain(..) {
            overlay.unload();
        }
    }

    fn dispatch(&self, packet: &Packet) {
        let overlays = self.overlays().clone();
        for overlay in overlays {
            overlay.on_packet(packet);
        }
    }

    async fn tick(&self) {
        if self.transport.is_closed() {
            return;
        }
        let mut lifecycle = self.lifecycle.lock().await;
        for strategy in &mut lifecycle.strategies {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| strategy.take_step())) {
                tracing::warn!(
                    "Discovery strategy of overlay {} failed: {}",
                    strategy.overlay().service_id(),
                    panic_message(panic.as_ref())
                );
            }
        }
    }

    fn estimate_lan(&self) {
        let Ok(bound) = self.transport.local_addr() else {
            return;
        };
        let Some(lan) = lan::estimate_lan(bound) else {
            tracing::debug!("Could not estimate LAN address for {}", bound);
            return;
        };
        let lan = Address::from(lan);
        for overlay in self.overlays().iter() {
            overlay.on_estimated_lan_changed(lan);
        }
    }
}

async fn receive_loop(inner: Arc<Ipv8Inner>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        match inner.transport.recv_from(&mut buf).await {
            Ok((size, from)) => {
                let Some(source) = Address::from_socket_addr(from) else {
                    tracing::trace!("Ignoring datagram from {}", from);
                    continue;
                };
                let packet = Packet::new(source, buf[..size].to_vec());
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    inner.dispatch(&packet);
                });
            }
            Err(TransportError::Closed) => break,
            Err(e) => {
                tracing::warn!("Error receiving packet: {}", e);
            }
        }
    }
    tracing::debug!("Receive loop finished");
}

async fn tick_loop(inner: Arc<Ipv8Inner>) {
    let mut interval = tokio::time::interval(inner.config.walker_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        inner.tick().await;
    }
}

async fn lan_estimation_loop(inner: Arc<Ipv8Inner>) {
    let mut interval = tokio::time::interval(inner.config.lan_estimation_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and start() already estimated.
    interval.tick().await;
    loop {
        interval.tick().await;
        inner.estimate_lan();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalkerConfig;
    use ipv8_transport::MemoryNetwork;
    use rand_core::OsRng;
    use std::time::Duration;

    const SERVICE: &str = "7e313685c1912a141279f8248fc8db5899c5df5a";

    fn service() -> ServiceId {
        SERVICE.parse().unwrap()
    }

    fn node(net: &MemoryNetwork, port: u16) -> Ipv8 {
        let transport = net
            .bind(SocketAddr::from(([127, 0, 0, 1], port)))
            .unwrap();
        let mut overlay = OverlayConfig::new(service());
        overlay.walkers.clear();
        let config = Ipv8Config {
            overlays: vec![overlay],
            ..Default::default()
        };
        Ipv8::new(config, PrivateKey::generate(&mut OsRng), Arc::new(transport)).unwrap()
    }

    async fn eventually(condition: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_start_stop() {
        let net = MemoryNetwork::new();
        let ipv8 = node(&net, 9001);

        ipv8.start().await.unwrap();
        assert!(ipv8.is_started());
        assert!(ipv8.overlay(&service()).is_some());
        assert!(matches!(ipv8.start().await, Err(Ipv8Error::AlreadyStarted)));

        ipv8.stop().await.unwrap();
        assert!(!ipv8.is_started());
        assert!(ipv8.overlays().is_empty());
        assert!(matches!(ipv8.stop().await, Err(Ipv8Error::NotRunning)));
        assert!(ipv8.start().await.is_err());
    }

    #[tokio::test]
    async fn test_walk_verifies_both_sides() {
        let net = MemoryNetwork::new();
        let a = node(&net, 9011);
        let b = node(&net, 9012);
        a.start().await.unwrap();
        b.start().await.unwrap();

        let overlay = a.overlay(&service()).unwrap();
        overlay.walk_to("127.0.0.1:9012".parse().unwrap());

        let b_mid = b.my_peer().mid();
        let a_mid = a.my_peer().mid();
        assert!(eventually(|| a.network().get_verified_by_mid(&b_mid).is_some()).await);
        assert!(eventually(|| b.network().get_verified_by_mid(&a_mid).is_some()).await);
        assert_eq!(
            a.network().get_verified_by_mid(&b_mid).unwrap().address(),
            "127.0.0.1:9012".parse().unwrap()
        );

        let sent = a.transport_stats();
        let received = b.transport_stats();
        assert!(sent.packets_sent >= 1);
        assert!(received.packets_received >= 1);
        assert!(received.bytes_received > 0);
        assert_eq!(received.recv_errors, 0);

        a.stop().await.unwrap();
        b.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_overlay_management() {
        let net = MemoryNetwork::new();
        let ipv8 = node(&net, 9021);

        let other = ServiceId::from_bytes([9; 20]);
        assert!(matches!(
            ipv8.add_overlay(OverlayConfig::new(other)).await,
            Err(Ipv8Error::NotRunning)
        ));

        ipv8.start().await.unwrap();
        ipv8.add_overlay(OverlayConfig::new(other)).await.unwrap();
        assert_eq!(ipv8.overlays().len(), 2);
        assert!(matches!(
            ipv8.add_overlay(OverlayConfig::new(other)).await,
            Err(Ipv8Error::DuplicateOverlay(_))
        ));

        ipv8.tick().await;
        ipv8.remove_overlay(&other).await.unwrap();
        assert!(ipv8.overlay(&other).is_none());
        assert!(matches!(
            ipv8.remove_overlay(&other).await,
            Err(Ipv8Error::UnknownOverlay(_))
        ));

        ipv8.stop().await.unwrap();
    }

    struct Panicking(Arc<Community>);

    impl DiscoveryStrategy for Panicking {
        fn take_step(&mut self) {
            panic!("walk failed");
        }

        fn overlay(&self) -> &Arc<Community> {
            &self.0
        }
    }

    #[tokio::test]
    async fn test_failing_strategy_does_not_stop_ticks() {
        let net = MemoryNetwork::new();
        let ipv8 = node(&net, 9031);
        ipv8.start().await.unwrap();

        let overlay = ipv8.overlay(&service()).unwrap();
        ipv8.inner
            .lifecycle
            .lock()
            .await
            .strategies
            .push(Box::new(Panicking(overlay)));

        ipv8.tick().await;
        ipv8.tick().await;
        assert!(ipv8.is_started());

        ipv8.stop().await.unwrap();
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(3);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let net = MemoryNetwork::new();
        let transport = net.bind(SocketAddr::from(([127, 0, 0, 1], 9041))).unwrap();
        let config = Ipv8Config {
            overlays: vec![
                OverlayConfig::new(service()),
                OverlayConfig {
                    walkers: vec![WalkerConfig::default()],
                    ..OverlayConfig::new(service())
                },
            ],
            ..Default::default()
        };
        assert!(
            Ipv8::new(config, PrivateKey::generate(&mut OsRng), Arc::new(transport)).is_err()
        );
    }
}
