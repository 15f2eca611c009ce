use super::Inbound;
use crate::events::PingEvent;
use crate::forge::ModInfo;
use crate::messages;
use crate::proxy::Proxy;
use rampart_protocol_core::{version, Packet, PacketContext, Protocol, StatusPing, StatusResponse};
use rampart_types::TextComponent;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct PingVersion {
    pub name: String,
    pub protocol: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SamplePlayer {
    pub name: String,
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingPlayers {
    pub online: i32,
    pub max: i32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sample: Vec<SamplePlayer>,
}

/// The JSON answer to a status request.
#[derive(Debug, Clone, Serialize)]
pub struct ServerPing {
    pub version: PingVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub players: Option<PingPlayers>,
    pub description: TextComponent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(rename = "modinfo", skip_serializing_if = "Option::is_none")]
    pub mod_info: Option<ModInfo>,
}

impl ServerPing {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub struct StatusSession {
    proxy: Arc<Proxy>,
    inbound: Arc<Inbound>,
    received_request: AtomicBool,
}

impl StatusSession {
    pub fn new(proxy: Arc<Proxy>, inbound: Arc<Inbound>) -> Self {
        Self {
            proxy,
            inbound,
            received_request: AtomicBool::new(false),
        }
    }

    pub async fn handle(self: Arc<Self>, pc: PacketContext) {
        match pc.packet {
            Some(Packet::StatusRequest(_)) => self.handle_status_request().await,
            Some(Packet::StatusPing(ping)) => self.handle_status_ping(ping).await,
            _ => self.inbound.conn().close(),
        }
    }

    fn initial_ping(&self) -> ServerPing {
        let config = self.proxy.config();
        let protocol = self.inbound.protocol();
        let shown = if protocol.is_supported() { protocol } else { Protocol::MAXIMUM };
        ServerPing {
            version: PingVersion {
                name: format!("Rampart {}", version::supported_range_string()),
                protocol: shown.0,
            },
            players: Some(PingPlayers {
                online: self.proxy.player_count() as i32,
                max: config.show_max_players,
                sample: Vec::new(),
            }),
            description: messages::from_legacy(&config.motd),
            favicon: config.favicon.clone(),
            mod_info: config.announce_forge.then(|| ModInfo::fml(Vec::new())),
        }
    }

    async fn handle_status_request(&self) {
        let conn = self.inbound.conn();
        if self.received_request.swap(true, Ordering::SeqCst) {
            conn.close();
            return;
        }
        let mut event = PingEvent {
            inbound: self.inbound.clone(),
            ping: Some(self.initial_ping()),
        };
        self.proxy.events().fire(&mut event);
        let Some(ping) = event.ping else {
            debug!(addr = %conn.remote_addr(), "ping cleared, sending no response");
            conn.close();
            return;
        };
        if !self.inbound.active() {
            return;
        }
        match ping.to_json() {
            Ok(status) => {
                if let Err(e) = conn.write_packet(StatusResponse { status }).await {
                    debug!(addr = %conn.remote_addr(), "could not send status: {}", e);
                }
            }
            Err(e) => {
                error!("could not encode ping response: {}", e);
                conn.close();
            }
        }
    }

    async fn handle_status_ping(&self, ping: StatusPing) {
        self.inbound.conn().close_with(ping).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_json_shape() {
        let ping = ServerPing {
            version: PingVersion {
                name: "Rampart 1.7.2-1.21.4".into(),
                protocol: 765,
            },
            players: Some(PingPlayers {
                online: 0,
                max: 1000,
                sample: Vec::new(),
            }),
            description: TextComponent::plain("hello"),
            favicon: None,
            mod_info: None,
        };
        let json: serde_json::Value = serde_json::from_str(&ping.to_json().unwrap()).unwrap();
        assert_eq!(json["version"]["protocol"], 765);
        assert_eq!(json["players"]["max"], 1000);
        assert_eq!(json["players"]["online"], 0);
        assert!(json["players"].get("sample").is_none());
        assert_eq!(json["description"]["text"], "hello");
        assert!(json.get("favicon").is_none());
        assert!(json.get("modinfo").is_none());
    }
}
