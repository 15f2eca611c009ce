//! Process-wide proxy state: servers, players, quotas and lifecycle.

use crate::auth::{Authenticator, KeyPair};
use crate::config::ProxyConfig;
use crate::events::{
    PreShutdownEvent, ReadyEvent, ServerRegisteredEvent, ServerUnregisteredEvent, ShutdownEvent,
};
use crate::messages;
use crate::network;
use crate::player::ConnectedPlayer;
use crate::ratelimit::AddrQuota;
use crate::server::{RegisteredServer, ServerInfo};
use anyhow::Context;
use parking_lot::RwLock;
use rampart_events::EventBus;
use rampart_protocol_core::{ConnConfig, Registries};
use rampart_types::TextComponent;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Extension point for embedding code. Plugins run before the listener is
/// bound and typically subscribe to events or register servers.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn init(&self, proxy: &Arc<Proxy>) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("server {} is already registered", .0.name())]
    AlreadyExists(Arc<RegisteredServer>),
    #[error("another server named {} is already registered", .0.name())]
    NameTaken(Arc<RegisteredServer>),
}

#[derive(Default)]
struct Players {
    by_id: HashMap<Uuid, Arc<ConnectedPlayer>>,
    by_name: HashMap<String, Arc<ConnectedPlayer>>,
}

pub struct Proxy {
    config: Arc<ProxyConfig>,
    events: EventBus,
    registries: &'static Registries,
    authenticator: Authenticator,
    key_pair: KeyPair,
    servers: RwLock<HashMap<String, Arc<RegisteredServer>>>,
    config_servers: RwLock<HashSet<String>>,
    players: RwLock<Players>,
    connection_quota: Option<AddrQuota>,
    login_quota: Option<AddrQuota>,
    shutdown: CancellationToken,
}

impl Proxy {
    pub fn new(config: ProxyConfig) -> anyhow::Result<Arc<Self>> {
        Self::with_authenticator(config, Authenticator::new()?)
    }

    pub fn with_authenticator(config: ProxyConfig, authenticator: Authenticator) -> anyhow::Result<Arc<Self>> {
        config.validate()?;
        let registries = Registries::global().context("building packet registries")?;
        let key_pair = KeyPair::generate().context("generating the login key pair")?;
        let proxy = Arc::new(Self {
            connection_quota: AddrQuota::from_settings(&config.quota.connections),
            login_quota: AddrQuota::from_settings(&config.quota.logins),
            config: Arc::new(config),
            events: EventBus::new(),
            registries,
            authenticator,
            key_pair,
            servers: RwLock::new(HashMap::new()),
            config_servers: RwLock::new(HashSet::new()),
            players: RwLock::new(Players::default()),
            shutdown: CancellationToken::new(),
        });
        proxy.register_config_servers();
        Ok(proxy)
    }

    fn register_config_servers(&self) {
        for (name, addr) in &self.config.servers {
            let Some(info) = ServerInfo::new(name.clone(), addr) else {
                warn!(server = %name, %addr, "skipping server with invalid address");
                continue;
            };
            match self.register(info) {
                Ok(_) => {
                    self.config_servers.write().insert(name.to_lowercase());
                }
                Err(e) => warn!("could not register server from config: {}", e),
            }
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registries(&self) -> &'static Registries {
        self.registries
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn connection_quota(&self) -> Option<&AddrQuota> {
        self.connection_quota.as_ref()
    }

    pub fn login_quota(&self) -> Option<&AddrQuota> {
        self.login_quota.as_ref()
    }

    pub fn conn_config(&self) -> ConnConfig {
        ConnConfig {
            read_timeout: self.config.read_timeout(),
            write_timeout: self.config.write_timeout(),
            compression_level: self.config.compression.level,
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // Servers

    pub fn register(&self, info: ServerInfo) -> Result<Arc<RegisteredServer>, RegisterError> {
        let key = info.name().to_lowercase();
        let server = {
            let mut servers = self.servers.write();
            if let Some(existing) = servers.get(&key) {
                return Err(if *existing.info() == info {
                    RegisterError::AlreadyExists(existing.clone())
                } else {
                    RegisterError::NameTaken(existing.clone())
                });
            }
            let server = Arc::new(RegisteredServer::new(info));
            servers.insert(key, server.clone());
            server
        };
        info!(server = %server.info(), "registered server");
        self.events.fire(&mut ServerRegisteredEvent {
            server: server.clone(),
        });
        Ok(server)
    }

    /// Remove a server; only an exact name and address match counts.
    pub fn unregister(&self, info: &ServerInfo) -> bool {
        let key = info.name().to_lowercase();
        let removed = {
            let mut servers = self.servers.write();
            match servers.get(&key) {
                Some(existing) if existing.info() == info => servers.remove(&key),
                _ => None,
            }
        };
        let Some(server) = removed else {
            return false;
        };
        self.config_servers.write().remove(&key);
        info!(server = %server.info(), "unregistered server");
        self.events.fire(&mut ServerUnregisteredEvent { server });
        true
    }

    pub fn server(&self, name: &str) -> Option<Arc<RegisteredServer>> {
        self.servers.read().get(&name.to_lowercase()).cloned()
    }

    pub fn servers(&self) -> Vec<Arc<RegisteredServer>> {
        self.servers.read().values().cloned().collect()
    }

    /// Whether the server came from the config file.
    pub fn is_config_server(&self, name: &str) -> bool {
        self.config_servers.read().contains(&name.to_lowercase())
    }

    // Players

    pub fn player(&self, id: Uuid) -> Option<Arc<ConnectedPlayer>> {
        self.players.read().by_id.get(&id).cloned()
    }

    pub fn player_by_name(&self, name: &str) -> Option<Arc<ConnectedPlayer>> {
        self.players.read().by_name.get(&name.to_lowercase()).cloned()
    }

    pub fn players(&self) -> Vec<Arc<ConnectedPlayer>> {
        self.players.read().by_id.values().cloned().collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.read().by_id.len()
    }

    /// Whether a player with this id or name could join now.
    pub fn can_register_connection(&self, player: &ConnectedPlayer) -> bool {
        if self.config.online_mode_kick_existing {
            return true;
        }
        let players = self.players.read();
        !players.by_id.contains_key(&player.id())
            && !players.by_name.contains_key(&player.username().to_lowercase())
    }

    /// Add a player to the tables. With `online-mode-kick-existing` an
    /// existing player with the same id is kicked first.
    pub async fn register_connection(&self, player: &Arc<ConnectedPlayer>) -> bool {
        let name = player.username().to_lowercase();
        loop {
            let existing = {
                let mut players = self.players.write();
                let existing = players
                    .by_id
                    .get(&player.id())
                    .or_else(|| players.by_name.get(&name))
                    .cloned();
                match existing {
                    None => {
                        players.by_id.insert(player.id(), player.clone());
                        players.by_name.insert(name.clone(), player.clone());
                        return true;
                    }
                    Some(existing) if !self.config.online_mode_kick_existing || existing.id() != player.id() => {
                        return false;
                    }
                    Some(existing) => existing,
                }
            };
            existing.mark_duplicate_disconnect();
            existing
                .disconnect(&messages::translatable("multiplayer.disconnect.duplicate_login", Vec::new()))
                .await;
            existing.teardown().await;
        }
    }

    /// Remove a player; false if the tables held someone else (or nobody).
    pub fn unregister_connection(&self, player: &Arc<ConnectedPlayer>) -> bool {
        let mut players = self.players.write();
        let mut removed = false;
        if players.by_id.get(&player.id()).is_some_and(|p| Arc::ptr_eq(p, player)) {
            players.by_id.remove(&player.id());
            removed = true;
        }
        let name = player.username().to_lowercase();
        if players.by_name.get(&name).is_some_and(|p| Arc::ptr_eq(p, player)) {
            players.by_name.remove(&name);
        }
        removed
    }

    // Lifecycle

    /// Initialize plugins, bind and serve until shutdown.
    pub async fn run(self: &Arc<Self>, plugins: Vec<Box<dyn Plugin>>) -> anyhow::Result<()> {
        for plugin in &plugins {
            plugin
                .init(self)
                .with_context(|| format!("initializing plugin {}", plugin.name()))?;
            info!(plugin = plugin.name(), "plugin initialized");
        }
        let listener = TcpListener::bind(&self.config.bind)
            .await
            .with_context(|| format!("binding {}", self.config.bind))?;
        let addr = listener.local_addr()?;
        info!(%addr, online_mode = self.config.online_mode, "listening for connections");
        self.events.fire(&mut ReadyEvent { addr });
        network::accept_loop(self.clone(), listener).await;
        Ok(())
    }

    /// Stop accepting, kick everyone and fire the shutdown events. Only the
    /// first call does anything.
    pub async fn shutdown(&self, reason: Option<TextComponent>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        info!("shutting down");
        let mut pre = PreShutdownEvent {
            reason: reason.unwrap_or_else(|| messages::from_legacy(&self.config.shutdown_reason)),
        };
        self.events.fire(&mut pre);
        let players = self.players();
        futures::future::join_all(players.iter().map(|p| p.disconnect(&pre.reason))).await;
        self.events.fire(&mut ShutdownEvent);
        info!(players = players.len(), "shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Conn, Inbound};
    use rampart_protocol_core::{Direction, Handshake, Intent};
    use rampart_types::GameProfile;
    use std::collections::BTreeMap;
    use tokio::net::TcpStream;

    fn config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.servers = BTreeMap::from([("lobby".to_string(), "127.0.0.1:30066".to_string())]);
        config.try_servers = vec!["lobby".into()];
        config
    }

    async fn player(proxy: &Arc<Proxy>, name: &str, id: Uuid) -> (Arc<ConnectedPlayer>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let conn = Conn::new(accepted.unwrap().0, Direction::ServerBound, proxy.registries(), proxy.conn_config())
            .unwrap();
        let handshake = Handshake {
            protocol_version: 763,
            server_address: "play.example.com".into(),
            port: 25565,
            next_status: 2,
        };
        let inbound = Arc::new(Inbound::new(conn, handshake, Intent::Login));
        let player = Arc::new(ConnectedPlayer::new(
            proxy.clone(),
            inbound,
            GameProfile::new(id, name),
            false,
            None,
        ));
        (player, client.unwrap())
    }

    #[tokio::test]
    async fn test_register_server_twice() {
        let proxy = Proxy::new(config()).unwrap();
        let lobby = proxy.server("LOBBY").unwrap();
        assert!(proxy.is_config_server("lobby"));

        let same = ServerInfo::new("lobby", "127.0.0.1:30066").unwrap();
        match proxy.register(same.clone()) {
            Err(RegisterError::AlreadyExists(existing)) => assert!(Arc::ptr_eq(&existing, &lobby)),
            other => panic!("unexpected {:?}", other.map(|s| s.name().to_string())),
        }
        let other = ServerInfo::new("Lobby", "127.0.0.1:30067").unwrap();
        assert!(matches!(proxy.register(other.clone()), Err(RegisterError::NameTaken(_))));

        assert!(!proxy.unregister(&other));
        assert!(proxy.unregister(&same));
        assert!(proxy.server("lobby").is_none());
        assert!(!proxy.unregister(&same));
    }

    #[tokio::test]
    async fn test_duplicate_login_rejected() {
        let proxy = Proxy::new(config()).unwrap();
        let id = Uuid::new_v4();
        let (first, _c1) = player(&proxy, "Alice", id).await;
        let (second, _c2) = player(&proxy, "alice", Uuid::new_v4()).await;
        assert!(proxy.register_connection(&first).await);
        assert!(!proxy.can_register_connection(&second));
        assert!(!proxy.register_connection(&second).await);
        assert_eq!(proxy.player_count(), 1);
        assert!(Arc::ptr_eq(&proxy.player_by_name("ALICE").unwrap(), &first));

        assert!(!proxy.unregister_connection(&second));
        assert!(proxy.unregister_connection(&first));
        assert!(proxy.player(id).is_none());
    }

    #[tokio::test]
    async fn test_duplicate_login_kicks_existing() {
        let mut config = config();
        config.online_mode_kick_existing = true;
        let proxy = Proxy::new(config).unwrap();
        let id = Uuid::new_v4();
        let (first, _c1) = player(&proxy, "Alice", id).await;
        let (second, _c2) = player(&proxy, "Alice", id).await;
        assert!(proxy.register_connection(&first).await);
        assert!(proxy.register_connection(&second).await);
        assert!(!first.active());
        assert!(Arc::ptr_eq(&proxy.player(id).unwrap(), &second));
        assert_eq!(proxy.player_count(), 1);
    }

    #[tokio::test]
    async fn test_next_server_to_try() {
        let mut config = config();
        config.servers.insert("hub".into(), "127.0.0.1:30068".into());
        config.servers.insert("event".into(), "127.0.0.1:30069".into());
        config.try_servers = vec!["lobby".into(), "hub".into()];
        config.forced_hosts = HashMap::from([("play.example.com".to_string(), vec!["event".to_string(), "hub".to_string()])]);
        let proxy = Proxy::new(config).unwrap();
        let (player, _client) = player(&proxy, "Bob", Uuid::new_v4()).await;

        let first = player.next_server_to_try(None).unwrap();
        assert_eq!(first.name(), "event");
        let hub = proxy.server("hub").unwrap();
        // the server being left is skipped
        assert!(player.next_server_to_try(Some(&hub)).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_once() {
        let proxy = Proxy::new(config()).unwrap();
        let (player, _client) = player(&proxy, "Carol", Uuid::new_v4()).await;
        assert!(proxy.register_connection(&player).await);
        proxy.shutdown(None).await;
        assert!(proxy.is_shutting_down());
        assert!(!player.active());
        // a second call is a no-op
        proxy.shutdown(None).await;
    }
}
