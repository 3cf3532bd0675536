//! Configuration file for the `ipv8` binary.

use ipv8_core::{
    Address, CommunitySettings, Ipv8Config, OverlayConfig, RandomWalkConfig, ServiceId,
    WalkerConfig,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service id of the peer discovery overlay every node runs by default.
pub const DISCOVERY_SERVICE_ID: &str = "7e313685c1912a141279f8248fc8db5899c5df5a";

/// IPv8 node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity
    #[serde(default)]
    pub node: NodeConfig,
    /// Transport and timers
    #[serde(default)]
    pub network: NetworkConfig,
    /// Overlays to run
    #[serde(default = "default_overlays")]
    pub overlays: Vec<OverlayEntry>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Private key file path
    #[serde(default = "default_private_key_path")]
    pub private_key_file: PathBuf,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Seconds between walk steps
    #[serde(default = "default_walker_interval")]
    pub walker_interval_secs: u64,
    /// Seconds between LAN address estimations
    #[serde(default = "default_lan_estimation_interval")]
    pub lan_estimation_interval_secs: u64,
}

/// One overlay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayEntry {
    /// 40 hex characters
    pub service_id: String,
    /// Peer cap; negative for no limit
    #[serde(default = "default_max_peers")]
    pub max_peers: i64,
    /// Bootstrap nodes as `ip:port`
    #[serde(default)]
    pub bootstrap: Vec<String>,
    /// Random walk tuning
    #[serde(default)]
    pub random_walk: RandomWalkEntry,
}

/// Random walk tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomWalkEntry {
    /// Walk at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds before an unanswered walk is forgotten
    #[serde(default = "default_walk_timeout")]
    pub timeout_secs: f64,
    /// Maximum walks in flight
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Minimum seconds between walks, 0 for every tick
    #[serde(default)]
    pub target_interval_secs: u64,
    /// Stop walking at this many peers; negative for never
    #[serde(default = "default_target_peers")]
    pub peers: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_private_key_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".ipv8/private_key")
}

fn default_listen_addr() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_walker_interval() -> u64 {
    5
}

fn default_lan_estimation_interval() -> u64 {
    60
}

fn default_overlays() -> Vec<OverlayEntry> {
    vec![OverlayEntry {
        service_id: DISCOVERY_SERVICE_ID.to_string(),
        max_peers: default_max_peers(),
        bootstrap: Vec::new(),
        random_walk: RandomWalkEntry::default(),
    }]
}

fn default_max_peers() -> i64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_walk_timeout() -> f64 {
    3.0
}

fn default_window_size() -> usize {
    5
}

fn default_target_peers() -> i64 {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            network: NetworkConfig::default(),
            overlays: default_overlays(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            private_key_file: default_private_key_path(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            walker_interval_secs: default_walker_interval(),
            lan_estimation_interval_secs: default_lan_estimation_interval(),
        }
    }
}

impl Default for RandomWalkEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_walk_timeout(),
            window_size: default_window_size(),
            target_interval_secs: 0,
            peers: default_target_peers(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("ipv8/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Parse listen address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.network.listen_addr.parse()?)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_listen_addr()?;

        if self.network.walker_interval_secs == 0 {
            anyhow::bail!("Walker interval must be at least 1 second");
        }
        if self.network.lan_estimation_interval_secs == 0 {
            anyhow::bail!("LAN estimation interval must be at least 1 second");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        // Full conversion catches bad ids, addresses and duplicates.
        self.to_ipv8_config()?.validate()?;
        Ok(())
    }

    /// Build the runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for an unparseable listen address, service id or
    /// bootstrap address, or a negative walk timeout.
    pub fn to_ipv8_config(&self) -> anyhow::Result<Ipv8Config> {
        let overlays = self
            .overlays
            .iter()
            .map(OverlayEntry::to_overlay_config)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Ipv8Config {
            listen_addr: self.parse_listen_addr()?,
            walker_interval: Duration::from_secs(self.network.walker_interval_secs),
            lan_estimation_interval: Duration::from_secs(
                self.network.lan_estimation_interval_secs,
            ),
            overlays,
        })
    }
}

impl OverlayEntry {
    fn to_overlay_config(&self) -> anyhow::Result<OverlayConfig> {
        let service_id: ServiceId = self
            .service_id
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid service id '{}': {}", self.service_id, e))?;

        let bootstrap_addresses = self
            .bootstrap
            .iter()
            .map(|addr| {
                addr.parse::<Address>()
                    .map_err(|e| anyhow::anyhow!("Invalid bootstrap address '{}': {}", addr, e))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut settings = CommunitySettings::new(service_id);
        settings.max_peers = usize::try_from(self.max_peers).ok();
        settings.bootstrap_addresses = bootstrap_addresses;

        let walkers = if self.random_walk.enabled {
            vec![WalkerConfig::RandomWalk(self.random_walk.to_config()?)]
        } else {
            Vec::new()
        };

        Ok(OverlayConfig {
            settings,
            walkers,
            handlers: Vec::new(),
        })
    }
}

impl RandomWalkEntry {
    fn to_config(&self) -> anyhow::Result<RandomWalkConfig> {
        let timeout = Duration::try_from_secs_f64(self.timeout_secs)
            .map_err(|_| anyhow::anyhow!("Invalid walk timeout: {}", self.timeout_secs))?;

        Ok(RandomWalkConfig {
            timeout,
            window_size: self.window_size,
            target_interval: Duration::from_secs(self.target_interval_secs),
            peers: usize::try_from(self.peers).ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.listen_addr, "0.0.0.0:8090");
        assert_eq!(config.network.walker_interval_secs, 5);
        assert_eq!(config.overlays.len(), 1);
        assert_eq!(config.overlays[0].service_id, DISCOVERY_SERVICE_ID);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        config.overlays[0].service_id = "abcd".to_string();
        assert!(config.validate().is_err());

        config.overlays[0].service_id = DISCOVERY_SERVICE_ID.to_string();
        config.overlays[0].bootstrap = vec!["localhost:1".to_string()];
        assert!(config.validate().is_err());

        config.overlays[0].bootstrap = vec!["131.180.27.161:6427".to_string()];
        assert!(config.validate().is_ok());

        config.overlays.push(config.overlays[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_minimal_file() {
        let config: Config = toml::from_str(
            r#"
            [network]
            listen_addr = "127.0.0.1:9000"

            [[overlays]]
            service_id = "7e313685c1912a141279f8248fc8db5899c5df5a"
            max_peers = -1
            bootstrap = ["1.2.3.4:5"]

            [overlays.random_walk]
            peers = 5
            "#,
        )
        .unwrap();

        let runtime = config.to_ipv8_config().unwrap();
        assert_eq!(runtime.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(runtime.walker_interval, Duration::from_secs(5));

        let overlay = &runtime.overlays[0];
        assert_eq!(overlay.settings.max_peers, None);
        assert_eq!(overlay.settings.bootstrap_addresses, vec!["1.2.3.4:5".parse().unwrap()]);
        match &overlay.walkers[..] {
            [WalkerConfig::RandomWalk(walk)] => {
                assert_eq!(walk.peers, Some(5));
                assert_eq!(walk.timeout, Duration::from_secs(3));
            }
            other => panic!("unexpected walkers: {other:?}"),
        }
    }

    #[test]
    fn test_disabled_walk() {
        let mut config = Config::default();
        config.overlays[0].random_walk.enabled = false;
        assert!(config.to_ipv8_config().unwrap().overlays[0].walkers.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.network.walker_interval_secs = 2;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.network.walker_interval_secs, 2);
        assert_eq!(loaded.overlays[0].service_id, DISCOVERY_SERVICE_ID);
    }
}
