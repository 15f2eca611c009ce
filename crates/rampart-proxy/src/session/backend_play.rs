use super::backend_config::BackendConfigSession;
use super::Session;
use crate::backend::ServerConnection;
use crate::bungeecord;
use crate::events::{CookieRequestEvent, CookieStoreEvent, MessageEndpoint, PluginMessageEvent, PreTransferEvent};
use crate::forge;
use crate::messages;
use crate::phase::{BackendStep, ConnectionType};
use crate::player::ConnectedPlayer;
use crate::plugin_message;
use rampart_protocol_core::channel;
use rampart_protocol_core::{
    CookieRequest, FinishedUpdate, Packet, PacketContext, PluginMessage, Protocol, State, StoreCookie, Transfer,
};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Relays a joined backend to the client.
pub struct BackendPlaySession {
    server_conn: Arc<ServerConnection>,
}

impl BackendPlaySession {
    pub fn new(server_conn: Arc<ServerConnection>) -> Self {
        Self { server_conn }
    }

    pub async fn handle(self: Arc<Self>, pc: PacketContext) {
        if !self.server_conn.active() {
            return;
        }
        let player = self.server_conn.player();
        let Some(packet) = pc.packet.as_ref() else {
            forward_to_player(player, &pc).await;
            return;
        };
        match packet {
            Packet::KeepAlive(keep_alive) => {
                self.server_conn.record_ping(keep_alive.random_id);
                forward_to_player(player, &pc).await;
            }
            Packet::Disconnect(disconnect) => {
                let server = self.server_conn.server().clone();
                self.server_conn.disconnect();
                tokio::spawn(
                    player
                        .clone()
                        .handle_disconnect_with_reason(server, disconnect.reason.to_text(), true),
                );
            }
            Packet::PluginMessage(msg) => self.handle_plugin_message(msg.clone()).await,
            Packet::StartUpdate(_) => self.handle_start_update().await,
            Packet::Transfer(transfer) => handle_transfer(player, transfer.clone()).await,
            Packet::StoreCookie(cookie) => handle_store_cookie(player, cookie.clone()).await,
            Packet::CookieRequest(request) => handle_cookie_request(player, request.clone()).await,
            Packet::LegacyPlayerListItem(_)
            | Packet::UpsertPlayerInfo(_)
            | Packet::RemovePlayerInfo(_)
            | Packet::BossBar(_) => {
                player.tab_list().observe(packet);
                forward_to_player(player, &pc).await;
            }
            _ => forward_to_player(player, &pc).await,
        }
    }

    async fn handle_plugin_message(&self, msg: PluginMessage) {
        let player = self.server_conn.player();
        if bungeecord::handle(&self.server_conn, &msg).await {
            return;
        }
        if channel::is_brand(&msg.channel) {
            let rewritten = plugin_message::rewrite_brand(&msg, player.protocol());
            if let Err(e) = player.conn().write_packet(rewritten).await {
                trace!(player = %player, "could not forward brand: {}", e);
            }
            return;
        }
        if !self.server_conn.phase().considered_complete() {
            if let Some(step) = self.server_conn.with_phase(|phase| phase.handle(&msg)) {
                apply_backend_step(player, step).await;
                if let Err(e) = player.conn().write_packet(msg).await {
                    trace!(player = %player, "could not forward forge handshake: {}", e);
                }
                return;
            }
        }

        let mut event = PluginMessageEvent {
            source: MessageEndpoint::Server(self.server_conn.server().clone()),
            target: MessageEndpoint::Player(player.clone()),
            identifier: msg.channel,
            data: msg.data,
            forward: true,
        };
        player.proxy().events().fire(&mut event);
        if event.forward {
            let msg = PluginMessage::new(event.identifier, event.data);
            if let Err(e) = player.conn().write_packet(msg).await {
                trace!(player = %player, "could not forward plugin message: {}", e);
            }
        }
    }

    /// The backend wants to reconfigure the client (1.20.2+).
    async fn handle_start_update(&self) {
        let Some(conn) = self.server_conn.ensure_connected() else {
            return;
        };
        let player = self.server_conn.player().clone();
        conn.set_auto_reading(false);
        conn.set_reader_state(State::Config);
        let acknowledged = player.switch_to_config().await;
        let server_conn = self.server_conn.clone();
        tokio::spawn(async move {
            if acknowledged.await.is_err() {
                return;
            }
            // the client's acknowledgement goes out as the last play packet
            if let Err(e) = conn.write_packet(FinishedUpdate).await {
                debug!(player = %player, "could not acknowledge config to backend: {}", e);
                return;
            }
            conn.set_writer_state(State::Config);
            conn.set_session_handler(Session::BackendConfig(Arc::new(BackendConfigSession::new(server_conn))))
                .await;
            conn.set_auto_reading(true);
        });
    }

    pub async fn disconnected(self: Arc<Self>) {
        server_closed(&self.server_conn).await;
    }
}

/// Forward the backend frame to the client unchanged.
pub(super) async fn forward_to_player(player: &ConnectedPlayer, pc: &PacketContext) {
    if let Err(e) = player.conn().write_raw(&pc.payload).await {
        trace!(player = %player, id = pc.packet_id, "could not forward packet: {}", e);
    }
}

/// React to the backend turning out to be legacy Forge.
pub(super) async fn apply_backend_step(player: &Arc<ConnectedPlayer>, step: BackendStep) {
    if !step.became_legacy_forge {
        return;
    }
    player.set_connection_type(ConnectionType::LegacyForge);
    if player.with_phase(|phase| phase.reset()) {
        if let Err(e) = player.conn().write_packet(forge::reset_packet()).await {
            debug!(player = %player, "could not reset forge handshake: {}", e);
        }
    }
}

/// The backend closed without the proxy asking it to.
pub(super) async fn server_closed(server_conn: &Arc<ServerConnection>) {
    if server_conn.graceful_disconnect() {
        return;
    }
    let player = server_conn.player().clone();
    let server = server_conn.server().clone();
    server_conn.disconnect();
    if !player.active() {
        return;
    }
    if player.proxy().config().failover_on_unexpected_server_disconnect {
        tokio::spawn(player.handle_disconnect_with_reason(
            server,
            messages::internal_server_connection_error(),
            true,
        ));
    } else {
        player.disconnect(&messages::internal_server_connection_error()).await;
    }
}

pub(super) async fn handle_transfer(player: &Arc<ConnectedPlayer>, transfer: Transfer) {
    if player.protocol() < Protocol::V1_20_5 {
        return;
    }
    let mut event = PreTransferEvent {
        player: player.clone(),
        host: transfer.host,
        port: transfer.port,
        denied: false,
    };
    player.proxy().events().fire(&mut event);
    if event.denied {
        debug!(player = %player, "transfer denied by event handler");
        return;
    }
    info!(player = %player, host = %event.host, port = event.port, "transferring player");
    let transfer = Transfer {
        host: event.host,
        port: event.port,
    };
    if let Err(e) = player.conn().write_packet(transfer).await {
        debug!(player = %player, "could not send transfer: {}", e);
    }
}

pub(super) async fn handle_store_cookie(player: &Arc<ConnectedPlayer>, cookie: StoreCookie) {
    let mut event = CookieStoreEvent {
        player: player.clone(),
        key: cookie.key,
        payload: cookie.payload,
        forward: true,
    };
    player.proxy().events().fire(&mut event);
    if !event.forward {
        return;
    }
    let cookie = StoreCookie {
        key: event.key,
        payload: event.payload,
    };
    if let Err(e) = player.conn().write_packet(cookie).await {
        debug!(player = %player, "could not store cookie: {}", e);
    }
}

pub(super) async fn handle_cookie_request(player: &Arc<ConnectedPlayer>, request: CookieRequest) {
    let mut event = CookieRequestEvent {
        player: player.clone(),
        key: request.key,
        forward: true,
    };
    player.proxy().events().fire(&mut event);
    if !event.forward {
        return;
    }
    if let Err(e) = player.conn().write_packet(CookieRequest { key: event.key }).await {
        debug!(player = %player, "could not request cookie: {}", e);
    }
}

/// Whether the proxy announces the BungeeCord channel to backends.
pub(super) fn announces_bungee_channel(player: &ConnectedPlayer) -> bool {
    player.proxy().config().bungee_plugin_channel_enabled
}
