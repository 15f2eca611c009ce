use super::initial_login::InitialLoginSession;
use super::status::StatusSession;
use super::{Conn, Inbound, Session};
use crate::config::ForwardingMode;
use crate::events::ConnectionHandshakeEvent;
use crate::messages;
use crate::proxy::Proxy;
use rampart_protocol_core::{Disconnect, Handshake, Intent, Packet, PacketContext, Protocol, State};
use std::sync::Arc;
use tracing::debug;

/// First handler of every client connection; waits for the handshake.
pub struct HandshakeSession {
    proxy: Arc<Proxy>,
    conn: Arc<Conn>,
}

impl HandshakeSession {
    pub fn new(proxy: Arc<Proxy>, conn: Arc<Conn>) -> Self {
        Self { proxy, conn }
    }

    pub async fn handle(self: Arc<Self>, pc: PacketContext) {
        match pc.packet {
            Some(Packet::Handshake(handshake)) => self.handle_handshake(handshake).await,
            _ => self.conn.close(),
        }
    }

    async fn handle_handshake(&self, handshake: Handshake) {
        let Some(intent) = Intent::from_handshake_next(handshake.next_status) else {
            debug!(addr = %self.conn.remote_addr(), next = handshake.next_status, "invalid handshake intent");
            self.conn.close();
            return;
        };
        let protocol = Protocol(handshake.protocol_version);
        self.conn.set_protocol(protocol);
        let inbound = Arc::new(Inbound::new(self.conn.clone(), handshake, intent));

        if intent == Intent::Status {
            self.conn.set_state(State::Status);
            self.fire_handshake(&inbound);
            self.conn
                .set_session_handler(Session::Status(Arc::new(StatusSession::new(self.proxy.clone(), inbound))))
                .await;
            return;
        }

        self.conn.set_state(State::Login);
        if let Some(reason) = self.login_denial(&inbound) {
            self.conn.close_with(Disconnect::from_text(&reason)).await;
            return;
        }
        self.fire_handshake(&inbound);
        self.conn
            .set_session_handler(Session::InitialLogin(Arc::new(InitialLoginSession::new(
                self.proxy.clone(),
                inbound,
            ))))
            .await;
    }

    fn login_denial(&self, inbound: &Inbound) -> Option<rampart_types::TextComponent> {
        let config = self.proxy.config();
        let protocol = inbound.protocol();
        if inbound.intent() == Intent::Transfer && !config.accept_transfers {
            return Some(messages::translatable("multiplayer.disconnect.transfers_disabled", Vec::new()));
        }
        if !protocol.is_supported() {
            return Some(messages::outdated_client());
        }
        if let Some(quota) = self.proxy.login_quota() {
            if quota.blocked(inbound.remote_addr().ip()) {
                return Some(messages::logging_in_too_fast());
            }
        }
        if config.forwarding.mode == ForwardingMode::Velocity && protocol < Protocol::V1_13 {
            return Some(messages::velocity_requires_1_13());
        }
        None
    }

    fn fire_handshake(&self, inbound: &Arc<Inbound>) {
        self.proxy.events().fire(&mut ConnectionHandshakeEvent {
            inbound: inbound.clone(),
            intent: inbound.intent(),
        });
    }
}
