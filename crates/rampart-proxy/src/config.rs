use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind address must not be empty")]
    EmptyBind,
    #[error("velocity forwarding requires forwarding.velocity-secret")]
    MissingVelocitySecret,
    #[error("bungeeguard forwarding requires forwarding.bungeeguard-secret")]
    MissingBungeeGuardSecret,
    #[error("{list} references unknown server {name:?}")]
    UnknownServer { list: String, name: String },
    #[error("server {server:?} has an invalid address {addr:?}")]
    InvalidAddress { server: String, addr: String },
    #[error("compression level {0} is outside -1..=9")]
    CompressionLevel(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardingMode {
    None,
    Legacy,
    Velocity,
    #[serde(alias = "bungee-guard")]
    BungeeGuard,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Forwarding {
    #[serde(default = "default_forwarding_mode")]
    pub mode: ForwardingMode,
    #[serde(default)]
    pub velocity_secret: String,
    #[serde(default)]
    pub bungeeguard_secret: String,
}

impl Default for Forwarding {
    fn default() -> Self {
        Self {
            mode: default_forwarding_mode(),
            velocity_secret: String::new(),
            bungeeguard_secret: String::new(),
        }
    }
}

/// Token bucket settings for one limiter.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QuotaSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Sustained events per second, fractions allowed.
    pub ops: f64,
    pub burst: u32,
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Quotas {
    #[serde(default = "default_connection_quota")]
    pub connections: QuotaSettings,
    #[serde(default = "default_login_quota")]
    pub logins: QuotaSettings,
}

impl Default for Quotas {
    fn default() -> Self {
        Self {
            connections: default_connection_quota(),
            logins: default_login_quota(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Compression {
    #[serde(default = "default_compression_threshold")]
    pub threshold: i32,
    #[serde(default = "default_compression_level")]
    pub level: i32,
}

impl Default for Compression {
    fn default() -> Self {
        Self {
            threshold: default_compression_threshold(),
            level: default_compression_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProxyConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_true")]
    pub online_mode: bool,
    #[serde(default)]
    pub online_mode_kick_existing: bool,
    #[serde(default)]
    pub forwarding: Forwarding,
    /// Server name to `host[:port]`.
    #[serde(default)]
    pub servers: BTreeMap<String, String>,
    #[serde(default, rename = "try")]
    pub try_servers: Vec<String>,
    #[serde(default)]
    pub forced_hosts: HashMap<String, Vec<String>>,
    #[serde(default = "default_motd")]
    pub motd: String,
    #[serde(default = "default_show_max_players")]
    pub show_max_players: i32,
    /// Pre-encoded `data:image/png;base64,...` URI.
    #[serde(default)]
    pub favicon: Option<String>,
    #[serde(default)]
    pub announce_forge: bool,
    #[serde(default)]
    pub prevent_client_proxy_connections: bool,
    #[serde(default = "default_true")]
    pub failover_on_unexpected_server_disconnect: bool,
    /// Milliseconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
    #[serde(default)]
    pub quota: Quotas,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub proxy_protocol: bool,
    #[serde(default)]
    pub proxy_protocol_backend: bool,
    #[serde(default = "default_true")]
    pub bungee_plugin_channel_enabled: bool,
    #[serde(default = "default_true")]
    pub force_key_authentication: bool,
    #[serde(default)]
    pub accept_transfers: bool,
    #[serde(default = "default_shutdown_reason")]
    pub shutdown_reason: String,
    #[serde(default)]
    pub debug: bool,
}

fn default_true() -> bool {
    true
}

fn default_bind() -> String {
    "0.0.0.0:25565".into()
}

fn default_forwarding_mode() -> ForwardingMode {
    ForwardingMode::Legacy
}

fn default_motd() -> String {
    "§bA Rampart Proxy".into()
}

fn default_show_max_players() -> i32 {
    1000
}

fn default_connection_timeout() -> u64 {
    5000
}

fn default_read_timeout() -> u64 {
    30000
}

fn default_write_timeout() -> u64 {
    20000
}

fn default_max_entries() -> u64 {
    1000
}

fn default_connection_quota() -> QuotaSettings {
    QuotaSettings {
        enabled: true,
        ops: 3.0,
        burst: 10,
        max_entries: default_max_entries(),
    }
}

fn default_login_quota() -> QuotaSettings {
    QuotaSettings {
        enabled: true,
        ops: 0.4,
        burst: 3,
        max_entries: default_max_entries(),
    }
}

fn default_compression_threshold() -> i32 {
    256
}

fn default_compression_level() -> i32 {
    -1
}

fn default_shutdown_reason() -> String {
    "§cRampart proxy is shutting down...\nPlease reconnect in a moment!".into()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            online_mode: true,
            online_mode_kick_existing: false,
            forwarding: Forwarding::default(),
            servers: BTreeMap::new(),
            try_servers: Vec::new(),
            forced_hosts: HashMap::new(),
            motd: default_motd(),
            show_max_players: default_show_max_players(),
            favicon: None,
            announce_forge: false,
            prevent_client_proxy_connections: false,
            failover_on_unexpected_server_disconnect: true,
            connection_timeout: default_connection_timeout(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
            quota: Quotas::default(),
            compression: Compression::default(),
            proxy_protocol: false,
            proxy_protocol_backend: false,
            bungee_plugin_channel_enabled: true,
            force_key_authentication: true,
            accept_transfers: false,
            shutdown_reason: default_shutdown_reason(),
            debug: false,
        }
    }
}

impl ProxyConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<ProxyConfig>(&contents)?
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.trim().is_empty() {
            return Err(ConfigError::EmptyBind);
        }
        match self.forwarding.mode {
            ForwardingMode::Velocity if self.forwarding.velocity_secret.is_empty() => {
                return Err(ConfigError::MissingVelocitySecret)
            }
            ForwardingMode::BungeeGuard if self.forwarding.bungeeguard_secret.is_empty() => {
                return Err(ConfigError::MissingBungeeGuardSecret)
            }
            _ => {}
        }
        for (name, addr) in &self.servers {
            if split_host_port(addr).is_none() {
                return Err(ConfigError::InvalidAddress {
                    server: name.clone(),
                    addr: addr.clone(),
                });
            }
        }
        for name in &self.try_servers {
            if !self.has_server(name) {
                return Err(ConfigError::UnknownServer {
                    list: "try".into(),
                    name: name.clone(),
                });
            }
        }
        for (host, names) in &self.forced_hosts {
            for name in names {
                if !self.has_server(name) {
                    return Err(ConfigError::UnknownServer {
                        list: format!("forced-hosts.{}", host),
                        name: name.clone(),
                    });
                }
            }
        }
        if !(-1..=9).contains(&self.compression.level) {
            return Err(ConfigError::CompressionLevel(self.compression.level));
        }
        Ok(())
    }

    fn has_server(&self, name: &str) -> bool {
        self.servers.keys().any(|s| s.eq_ignore_ascii_case(name))
    }

    /// Forced-host candidates for a cleaned virtual hostname.
    pub fn forced_host(&self, host: &str) -> Option<&Vec<String>> {
        self.forced_hosts
            .iter()
            .find(|(h, _)| h.eq_ignore_ascii_case(host))
            .map(|(_, v)| v)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout)
    }
}

/// Split `host[:port]`, defaulting the port to 25565. Bracketed IPv6 literals
/// are accepted.
pub fn split_host_port(addr: &str) -> Option<(String, u16)> {
    let addr = addr.trim();
    if addr.is_empty() {
        return None;
    }
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None if tail.is_empty() => 25565,
            None => return None,
        };
        return Some((host.to_string(), port));
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            if host.is_empty() {
                return None;
            }
            Some((host.to_string(), port.parse().ok()?))
        }
        Some(_) => Some((addr.to_string(), 25565)),
        None => Some((addr.to_string(), 25565)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.bind, "0.0.0.0:25565");
        assert!(config.online_mode);
        assert_eq!(config.forwarding.mode, ForwardingMode::Legacy);
        assert_eq!(config.compression.threshold, 256);
        assert_eq!(config.compression.level, -1);
        assert_eq!(config.connection_timeout(), Duration::from_secs(5));
        assert_eq!(config.quota.logins.burst, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_kebab_case() {
        let config: ProxyConfig = toml::from_str(
            r#"
            bind = "127.0.0.1:25577"
            online-mode = false
            try = ["lobby"]

            [servers]
            lobby = "localhost:25566"
            Games = "10.0.0.2"

            [forced-hosts]
            "games.example.com" = ["games", "lobby"]

            [forwarding]
            mode = "velocity"
            velocity-secret = "s3cret"

            [quota.logins]
            ops = 1.5
            burst = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.bind, "127.0.0.1:25577");
        assert!(!config.online_mode);
        assert_eq!(config.try_servers, vec!["lobby"]);
        assert_eq!(config.forwarding.mode, ForwardingMode::Velocity);
        assert_eq!(config.quota.logins.ops, 1.5);
        assert_eq!(config.quota.logins.max_entries, 1000);
        assert!(config.quota.connections.enabled);
        assert_eq!(
            config.forced_host("GAMES.example.com").map(|v| v.len()),
            Some(2)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = ProxyConfig::default();
        config.forwarding.mode = ForwardingMode::Velocity;
        assert_eq!(config.validate(), Err(ConfigError::MissingVelocitySecret));

        let mut config = ProxyConfig::default();
        config.try_servers.push("missing".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownServer { .. })
        ));

        let mut config = ProxyConfig::default();
        config.servers.insert("bad".into(), "host:notaport".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAddress { .. })
        ));

        let mut config = ProxyConfig::default();
        config.compression.level = 10;
        assert_eq!(config.validate(), Err(ConfigError::CompressionLevel(10)));

        let mut config = ProxyConfig::default();
        config.bind = " ".into();
        assert_eq!(config.validate(), Err(ConfigError::EmptyBind));
    }

    #[test]
    fn test_unknown_forwarding_mode_fails_to_parse() {
        let parsed = toml::from_str::<ProxyConfig>("[forwarding]\nmode = \"carrier-pigeon\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("localhost"), Some(("localhost".into(), 25565)));
        assert_eq!(split_host_port("1.2.3.4:25566"), Some(("1.2.3.4".into(), 25566)));
        assert_eq!(split_host_port("[::1]:25570"), Some(("::1".into(), 25570)));
        assert_eq!(split_host_port("::1"), Some(("::1".into(), 25565)));
        assert_eq!(split_host_port(":25565"), None);
        assert_eq!(split_host_port("host:99999"), None);
        assert_eq!(split_host_port(""), None);
    }
}
