//! Runtime configuration

use crate::address::Address;
use crate::community::MessageHandler;
use crate::error::{Ipv8Error, Result};
use crate::packet::ServiceId;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Default cap on verified peers per overlay.
pub const DEFAULT_MAX_PEERS: usize = 30;

/// Settings of one overlay.
#[derive(Debug, Clone)]
pub struct CommunitySettings {
    /// Overlay identifier, also the packet prefix
    pub service_id: ServiceId,

    /// Refuse introduction requests beyond this many peers, `None` for no limit
    pub max_peers: Option<usize>,

    /// Well-known nodes contacted when no peer is known
    pub bootstrap_addresses: Vec<Address>,

    /// Minimum time between two bootstraps
    pub bootstrap_interval: Duration,

    /// Chance of walking to a bootstrap node instead of a known peer
    pub reset_chance: f64,
}

impl CommunitySettings {
    /// Default settings for `service_id`.
    #[must_use]
    pub fn new(service_id: ServiceId) -> Self {
        Self {
            service_id,
            max_peers: Some(DEFAULT_MAX_PEERS),
            bootstrap_addresses: Vec::new(),
            bootstrap_interval: Duration::from_secs(5),
            reset_chance: 0.5,
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Ipv8Error::InvalidConfig`] for a reset chance outside
    /// `0.0..=1.0` or an empty bootstrap address.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.reset_chance) {
            return Err(Ipv8Error::InvalidConfig(
                format!("reset chance must be within 0..=1, got {}", self.reset_chance).into(),
            ));
        }
        if self.bootstrap_addresses.iter().any(Address::is_empty) {
            return Err(Ipv8Error::InvalidConfig(
                "bootstrap address must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Random walk tuning
#[derive(Debug, Clone)]
pub struct RandomWalkConfig {
    /// Forget unanswered walks after this long
    pub timeout: Duration,

    /// Maximum outstanding walks
    pub window_size: usize,

    /// Minimum time between walks
    pub target_interval: Duration,

    /// Stop walking at this many peers, `None` to walk forever
    pub peers: Option<usize>,
}

impl Default for RandomWalkConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            window_size: 5,
            target_interval: Duration::ZERO,
            peers: Some(20),
        }
    }
}

/// Discovery policy attached to an overlay
#[derive(Debug, Clone)]
pub enum WalkerConfig {
    /// Walk to random addresses the overlay has learned of
    RandomWalk(RandomWalkConfig),
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self::RandomWalk(RandomWalkConfig::default())
    }
}

/// An overlay to run: settings, discovery policies, application handlers.
#[derive(Clone)]
pub struct OverlayConfig {
    /// Overlay settings
    pub settings: CommunitySettings,

    /// Discovery policies ticked by the runtime
    pub walkers: Vec<WalkerConfig>,

    /// Application message handlers, keyed by message id
    pub handlers: Vec<(u8, MessageHandler)>,
}

impl OverlayConfig {
    /// An overlay with default settings and a single random walk.
    #[must_use]
    pub fn new(service_id: ServiceId) -> Self {
        Self {
            settings: CommunitySettings::new(service_id),
            walkers: vec![WalkerConfig::default()],
            handlers: Vec::new(),
        }
    }
}

impl fmt::Debug for OverlayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handler_ids: Vec<u8> = self.handlers.iter().map(|(id, _)| *id).collect();
        f.debug_struct("OverlayConfig")
            .field("settings", &self.settings)
            .field("walkers", &self.walkers)
            .field("handlers", &handler_ids)
            .finish()
    }
}

/// Node configuration
#[derive(Debug, Clone)]
pub struct Ipv8Config {
    /// Address the UDP transport binds to
    pub listen_addr: SocketAddr,

    /// Period of the walk tick
    pub walker_interval: Duration,

    /// Period of LAN address re-estimation
    pub lan_estimation_interval: Duration,

    /// Overlays started with the node
    pub overlays: Vec<OverlayConfig>,
}

impl Default for Ipv8Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            walker_interval: Duration::from_secs(5),
            lan_estimation_interval: Duration::from_secs(60),
            overlays: Vec::new(),
        }
    }
}

impl Ipv8Config {
    /// Check intervals and every overlay.
    ///
    /// # Errors
    ///
    /// Returns [`Ipv8Error::InvalidConfig`] for a zero interval, an invalid
    /// overlay, or two overlays sharing a service id.
    pub fn validate(&self) -> Result<()> {
        if self.walker_interval.is_zero() {
            return Err(Ipv8Error::InvalidConfig("walker interval must be positive".into()));
        }
        if self.lan_estimation_interval.is_zero() {
            return Err(Ipv8Error::InvalidConfig(
                "LAN estimation interval must be positive".into(),
            ));
        }
        for (i, overlay) in self.overlays.iter().enumerate() {
            overlay.settings.validate()?;
            if self.overlays[..i]
                .iter()
                .any(|other| other.settings.service_id == overlay.settings.service_id)
            {
                return Err(Ipv8Error::DuplicateOverlay(overlay.settings.service_id));
            }
        }
        Ok(())
    }
}
