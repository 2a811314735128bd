//! Configuration data model.
//!
//! All structs derive `Serialize`/`Deserialize` for TOML persistence.
//! Every field has a sensible default so the engine works out of the box;
//! hard constraints (non-empty passive pool, usable destination) are checked
//! by [`EngineConfig::validate`] before the engine starts.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::error::EngineError;

use super::nickname::generate_nickname;

/// Root engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// IRC server the bundled adapter connects to.
    #[serde(default)]
    pub server: ServerConfig,
    /// Nickname the engine claims on IRC.
    #[serde(default = "default_nickname")]
    pub nick: String,
    /// Destination directory for received files. `None` switches the engine
    /// to pipe mode: bytes are handed to the caller instead of hitting disk.
    #[serde(default = "default_download_dir", skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
    /// Port pool for passive (reverse) DCC listeners.
    #[serde(default = "default_passive_ports")]
    pub passive_ports: PortRange,
    /// Address advertised to bots when this side listens.
    #[serde(default = "default_public_ip")]
    pub public_ip: Ipv4Addr,
    /// Retry attempts per pack after the first try.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Seconds to wait for a DCC offer after `XDCC SEND`.
    #[serde(default = "default_offer_timeout")]
    pub offer_timeout_secs: u64,
    /// Seconds to wait for the data connection to come up.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Seconds of data-channel silence tolerated mid-transfer.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Drop offers whose sender nick differs from the requested bot.
    #[serde(default = "default_true")]
    pub require_matching_nick: bool,
    /// Reject offers pointing at private/loopback addresses.
    #[serde(default)]
    pub reject_private_ips: bool,
    /// Reject offers larger than this many bytes (0 = unlimited).
    #[serde(default)]
    pub max_file_size: u64,
    /// Emit `Downloading` progress events.
    #[serde(default = "default_true")]
    pub progress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            nick: default_nickname(),
            download_dir: default_download_dir(),
            passive_ports: default_passive_ports(),
            public_ip: default_public_ip(),
            retry_limit: default_retry_limit(),
            offer_timeout_secs: default_offer_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            require_matching_nick: true,
            reject_private_ips: false,
            max_file_size: 0,
            progress: true,
        }
    }
}

impl EngineConfig {
    /// Check the engine-level constraints. Called by `Engine::start`; server
    /// fields are only validated when the bundled IRC adapter is used.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.nick.trim().is_empty() {
            return Err(EngineError::Config("nickname must not be empty".into()));
        }
        if self.passive_ports.first == 0 || self.passive_ports.first > self.passive_ports.last {
            return Err(EngineError::Config(format!(
                "passive port range {}-{} is empty",
                self.passive_ports.first, self.passive_ports.last
            )));
        }
        if self.offer_timeout_secs == 0 {
            return Err(EngineError::Config(
                "offer timeout must be at least one second".into(),
            ));
        }
        Ok(())
    }

    /// Check the fields the bundled IRC adapter needs.
    pub fn validate_server(&self) -> Result<(), EngineError> {
        if self.server.host.trim().is_empty() {
            return Err(EngineError::Config("server host must not be empty".into()));
        }
        if self.server.port == 0 {
            return Err(EngineError::Config("server port must not be zero".into()));
        }
        for chan in &self.server.channels {
            if !chan.starts_with('#') && !chan.starts_with('&') {
                return Err(EngineError::Config(format!(
                    "'{}' is not a channel name",
                    chan
                )));
            }
        }
        Ok(())
    }
}

/// IRC server settings consumed by the bundled adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname or IP address of the IRC server.
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    /// Channels joined after registration. Many XDCC bots require the
    /// requester to sit in their channel.
    #[serde(default)]
    pub channels: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            tls: false,
            channels: Vec::new(),
        }
    }
}

/// Inclusive port range leased for passive DCC listeners.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortRange {
    pub first: u16,
    pub last: u16,
}

impl PortRange {
    pub fn len(&self) -> usize {
        if self.first > self.last {
            0
        } else {
            (self.last - self.first) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn default_nickname() -> String {
    generate_nickname()
}
fn default_port() -> u16 {
    6667
}
fn default_true() -> bool {
    true
}
fn default_download_dir() -> Option<PathBuf> {
    Some(
        dirs::download_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("crabget"),
    )
}
fn default_passive_ports() -> PortRange {
    PortRange {
        first: 49152,
        last: 49552,
    }
}
fn default_public_ip() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}
fn default_retry_limit() -> u32 {
    1
}
fn default_offer_timeout() -> u64 {
    15
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_pool_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.passive_ports = PortRange { first: 5000, last: 4000 };
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn server_validation_catches_bad_channel() {
        let mut cfg = EngineConfig::default();
        cfg.server.host = "irc.rizon.net".into();
        cfg.server.channels = vec!["not-a-channel".into()];
        assert!(matches!(cfg.validate_server(), Err(EngineError::Config(_))));
    }

    #[test]
    fn toml_roundtrip_keeps_defaults() {
        let cfg = EngineConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let back: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.passive_ports.first, cfg.passive_ports.first);
        assert_eq!(back.retry_limit, cfg.retry_limit);
        assert_eq!(back.require_matching_nick, cfg.require_matching_nick);
    }
}
