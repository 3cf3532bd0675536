//! Discovery strategies.
//!
//! A strategy decides when an overlay walks. The runtime calls
//! [`DiscoveryStrategy::take_step`] once per tick, under the lifecycle lock.

use crate::address::Address;
use crate::community::Community;
use crate::config::{RandomWalkConfig, WalkerConfig};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Policy driving the walk of one overlay.
pub trait DiscoveryStrategy: Send {
    /// Called once before the first step.
    fn load(&mut self) {}

    /// One walk step.
    fn take_step(&mut self);

    /// Called once after the last step.
    fn unload(&mut self) {}

    /// The overlay this strategy walks.
    fn overlay(&self) -> &Arc<Community>;
}

/// Build the strategy described by `config` for `overlay`.
#[must_use]
pub fn from_config(overlay: Arc<Community>, config: &WalkerConfig) -> Box<dyn DiscoveryStrategy> {
    match config {
        WalkerConfig::RandomWalk(config) => Box::new(RandomWalk::new(overlay, config.clone())),
    }
}

/// Walk to random addresses the overlay has learned of.
///
/// Each step asks a known peer (or a bootstrap node) for a new introduction
/// and walks to one walkable address. Walks that stay unanswered longer than
/// the timeout are forgotten, and so is their address if it never verified.
pub struct RandomWalk {
    overlay: Arc<Community>,
    config: RandomWalkConfig,
    intro_timeouts: HashMap<Address, Instant>,
    last_step: Option<Instant>,
}

impl RandomWalk {
    /// Create a walker for `overlay`.
    #[must_use]
    pub fn new(overlay: Arc<Community>, config: RandomWalkConfig) -> Self {
        Self {
            overlay,
            config,
            intro_timeouts: HashMap::new(),
            last_step: None,
        }
    }

    /// Walks still waiting for an answer.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.intro_timeouts.len()
    }

    fn expire_walks(&mut self, now: Instant) {
        let timeout = self.config.timeout;
        let expired: Vec<Address> = self
            .intro_timeouts
            .iter()
            .filter(|(_, sent)| now.saturating_duration_since(**sent) >= timeout)
            .map(|(address, _)| *address)
            .collect();

        let network = self.overlay.network();
        for address in expired {
            self.intro_timeouts.remove(&address);
            if network.get_verified_by_address(address).is_none() {
                tracing::debug!("Walk to {} timed out, forgetting address", address);
                network.remove_by_address(address);
            }
        }
    }
}

impl DiscoveryStrategy for RandomWalk {
    fn take_step(&mut self) {
        if self
            .config
            .peers
            .is_some_and(|target| self.overlay.get_peers().len() >= target)
        {
            return;
        }

        let now = Instant::now();
        self.expire_walks(now);

        let interval = self.config.target_interval;
        if !interval.is_zero()
            && self
                .last_step
                .is_some_and(|last| now.saturating_duration_since(last) < interval)
        {
            return;
        }

        if self.config.window_size > 0 && self.intro_timeouts.len() >= self.config.window_size {
            return;
        }

        let available: Vec<Address> = self
            .overlay
            .get_walkable_addresses()
            .into_iter()
            .filter(|address| !self.intro_timeouts.contains_key(address))
            .collect();

        self.overlay.get_new_introduction(None);

        if let Some(address) = available.choose(&mut rand::thread_rng()).copied() {
            self.overlay.walk_to(address);
            self.intro_timeouts.insert(address, Instant::now());
        }

        self.last_step = Some(Instant::now());
    }

    fn overlay(&self) -> &Arc<Community> {
        &self.overlay
    }
}
