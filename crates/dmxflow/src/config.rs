//! Receiver configuration file
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! sACN receiver on universe 1.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use dmxflow_control::{listener_plan, EngineConfig, ListenerConfig, WebServerConfig};
use dmxflow_core::{
    LogConfig, MergeEngine, MergeStrategy, PatchEntry, PatchRegistry, Protocol, Universe,
    ZeroSourcePolicy,
};

/// Which protocols to listen for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolSelection {
    #[default]
    Sacn,
    Artnet,
    Both,
}

impl ProtocolSelection {
    pub fn protocols(self) -> &'static [Protocol] {
        match self {
            ProtocolSelection::Sacn => &[Protocol::Sacn],
            ProtocolSelection::Artnet => &[Protocol::ArtNet],
            ProtocolSelection::Both => &[Protocol::Sacn, Protocol::ArtNet],
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DmxflowConfig {
    pub protocol: ProtocolSelection,
    /// Interface used for binding and multicast membership
    pub interface: Ipv4Addr,
    pub universes: Vec<Universe>,
    /// Sender timeout in milliseconds
    pub timeout_ms: u64,
    pub merge: MergeStrategy,
    pub zero_source: ZeroSourcePolicy,
    pub heartbeat_ms: u64,
    pub web: WebServerConfig,
    pub log: LogConfig,
    #[serde(rename = "fixture")]
    pub fixtures: Vec<PatchEntry>,
}

impl Default for DmxflowConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolSelection::default(),
            interface: Ipv4Addr::UNSPECIFIED,
            universes: vec![Universe::FIRST],
            timeout_ms: 2500,
            merge: MergeStrategy::default(),
            zero_source: ZeroSourcePolicy::default(),
            heartbeat_ms: 1000,
            web: WebServerConfig::default(),
            log: LogConfig::default(),
            fixtures: Vec::new(),
        }
    }
}

impl DmxflowConfig {
    /// Load from a TOML file. `None` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&text)
            .map(Some)
            .with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Parse and validate TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that parse but cannot work
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        if self.heartbeat_ms == 0 {
            bail!("heartbeat_ms must be greater than zero");
        }
        if self.universes.is_empty() && self.fixtures.is_empty() {
            bail!("no universes configured and no fixtures patched");
        }
        Ok(())
    }

    /// Configured universes plus every universe a fixture is patched into
    pub fn listen_universes(&self) -> Vec<Universe> {
        let mut universes = self.universes.clone();
        universes.extend(self.fixtures.iter().map(|f| f.universe));
        universes.sort();
        universes.dedup();
        universes
    }

    /// Listener sockets to open
    pub fn listeners(&self) -> Vec<ListenerConfig> {
        listener_plan(
            self.protocol.protocols(),
            &self.listen_universes(),
            self.interface,
        )
    }

    /// Patch built from the `[[fixture]]` tables
    pub fn patch(&self) -> Result<PatchRegistry> {
        PatchRegistry::from_entries(self.fixtures.iter().cloned())
            .context("Fixture patch is inconsistent")
    }

    /// Runtime settings for the engine
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            source_timeout: Duration::from_millis(self.timeout_ms),
            merge: MergeEngine::new(self.merge, self.zero_source),
            heartbeat_interval: Duration::from_millis(self.heartbeat_ms),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
protocol = "both"
interface = "192.168.1.10"
universes = [1, 2]
timeout_ms = 1000
merge = "ltp"
zero_source = "blackout"
heartbeat_ms = 500

[web]
host = "0.0.0.0"
port = 8080

[log]
level = "debug"

[[fixture]]
fixture_id = "f1"
fixture_type = "RGB"
universe = 1
start_address = 1
footprint = 3

[[fixture]]
fixture_id = "spot"
fixture_type = "Dimmer"
universe = 7
start_address = 10
footprint = 1
"#;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DmxflowConfig::from_toml("").unwrap();
        assert_eq!(config, DmxflowConfig::default());
        assert_eq!(config.protocol, ProtocolSelection::Sacn);
        assert_eq!(config.timeout_ms, 2500);
        assert_eq!(config.zero_source, ZeroSourcePolicy::HoldLast);
        assert_eq!(config.web.port, 3000);
    }

    #[test]
    fn test_full_config() {
        let config = DmxflowConfig::from_toml(FULL).unwrap();
        assert_eq!(config.protocol, ProtocolSelection::Both);
        assert_eq!(config.interface, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(config.merge, MergeStrategy::Ltp);
        assert_eq!(config.web.host, "0.0.0.0");
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.fixtures.len(), 2);

        let engine = config.engine_config();
        assert_eq!(engine.source_timeout, Duration::from_millis(1000));
        assert_eq!(engine.merge.zero_source, ZeroSourcePolicy::Blackout);
    }

    #[test]
    fn test_fixture_universes_are_listened_to() {
        let config = DmxflowConfig::from_toml(FULL).unwrap();
        let universes: Vec<u16> = config.listen_universes().iter().map(|u| u.get()).collect();
        assert_eq!(universes, vec![1, 2, 7]);

        // Three sACN sockets plus one shared Art-Net socket
        let listeners = config.listeners();
        assert_eq!(listeners.len(), 4);
        assert_eq!(
            listeners
                .iter()
                .filter(|l| l.protocol == Protocol::ArtNet)
                .count(),
            1
        );
    }

    #[test]
    fn test_invalid_universe_rejected() {
        assert!(DmxflowConfig::from_toml("universes = [0]").is_err());
        assert!(DmxflowConfig::from_toml("universes = [64000]").is_err());
    }

    #[test]
    fn test_validation() {
        assert!(DmxflowConfig::from_toml("timeout_ms = 0").is_err());
        assert!(DmxflowConfig::from_toml("universes = []").is_err());
        assert!(DmxflowConfig::from_toml("unknown_key = 1").is_err());
    }

    #[test]
    fn test_conflicting_fixtures_rejected() {
        let text = r#"
[[fixture]]
fixture_id = "a"
fixture_type = "RGB"
universe = 1
start_address = 1
footprint = 3

[[fixture]]
fixture_id = "b"
fixture_type = "RGB"
universe = 1
start_address = 3
footprint = 3
"#;
        let config = DmxflowConfig::from_toml(text).unwrap();
        assert!(config.patch().is_err());
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = DmxflowConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dmxflow.toml");
        std::fs::write(&path, FULL).unwrap();
        let config = DmxflowConfig::load(&path).unwrap().unwrap();
        assert_eq!(config.universes.len(), 2);
    }
}
