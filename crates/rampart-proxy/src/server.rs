//! Backend servers known to the proxy.

use crate::config::split_host_port;
use crate::player::ConnectedPlayer;
use parking_lot::RwLock;
use rampart_protocol_core::PluginMessage;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Name and address of a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    name: String,
    host: String,
    port: u16,
}

impl ServerInfo {
    /// `None` if `addr` is not a valid `host[:port]`.
    pub fn new(name: impl Into<String>, addr: &str) -> Option<Self> {
        let (host, port) = split_host_port(addr)?;
        Some(Self {
            name: name.into(),
            host,
            port,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address in a form `TcpStream::connect` accepts.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.addr())
    }
}

/// A registered backend and the players currently on it. Players are held
/// weakly; the proxy's player table owns them.
pub struct RegisteredServer {
    info: ServerInfo,
    players: RwLock<HashMap<Uuid, Weak<ConnectedPlayer>>>,
}

impl RegisteredServer {
    pub fn new(info: ServerInfo) -> Self {
        Self {
            info,
            players: RwLock::new(HashMap::new()),
        }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        self.info.name()
    }

    pub fn players(&self) -> Vec<Arc<ConnectedPlayer>> {
        self.players.read().values().filter_map(Weak::upgrade).collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.read().values().filter(|p| p.strong_count() > 0).count()
    }

    pub(crate) fn add_player(&self, player: &Arc<ConnectedPlayer>) {
        self.players.write().insert(player.id(), Arc::downgrade(player));
    }

    pub(crate) fn remove_player(&self, id: Uuid) {
        self.players.write().remove(&id);
    }

    /// Send a plugin message to this server through any connected player.
    /// Returns false when nobody is connected.
    pub async fn send_plugin_message(&self, channel: &str, data: Vec<u8>) -> bool {
        for player in self.players() {
            let Some(backend) = player.connected_server() else {
                continue;
            };
            let Some(conn) = backend.conn() else {
                continue;
            };
            if conn.write_packet(PluginMessage::new(channel, data.clone())).await.is_ok() {
                return true;
            }
        }
        false
    }
}

impl fmt::Debug for RegisteredServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredServer").field("info", &self.info).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_addr() {
        let info = ServerInfo::new("lobby", "10.0.0.2").unwrap();
        assert_eq!(info.port(), 25565);
        assert_eq!(info.addr(), "10.0.0.2:25565");
        let v6 = ServerInfo::new("v6", "[::1]:25570").unwrap();
        assert_eq!(v6.host(), "::1");
        assert_eq!(v6.addr(), "[::1]:25570");
        assert!(ServerInfo::new("bad", "").is_none());
    }

    #[test]
    fn test_empty_server() {
        let server = RegisteredServer::new(ServerInfo::new("lobby", "127.0.0.1:25566").unwrap());
        assert_eq!(server.name(), "lobby");
        assert_eq!(server.player_count(), 0);
        assert!(server.players().is_empty());
    }
}
