use super::client_play::{handle_cookie_response, handle_resource_pack_response, ClientPlaySession};
use super::{forward_keep_alive, forward_packet_to_server, forward_to_server, Session};
use crate::player::ConnectedPlayer;
use crate::plugin_message;
use rampart_protocol_core::channel;
use rampart_protocol_core::{Packet, PacketContext, PluginMessage, State};
use std::sync::Arc;
use tracing::debug;

/// Client handler while the client is in the config state (1.20.2+).
pub struct ClientConfigSession {
    player: Arc<ConnectedPlayer>,
}

impl ClientConfigSession {
    pub fn new(player: Arc<ConnectedPlayer>) -> Self {
        Self { player }
    }

    pub async fn handle(self: Arc<Self>, pc: PacketContext) {
        let player = &self.player;
        let Some(packet) = pc.packet.clone() else {
            forward_to_server(player, &pc).await;
            return;
        };
        match packet {
            Packet::KeepAlive(keep_alive) => forward_keep_alive(player, keep_alive).await,
            Packet::ClientSettings(settings) => {
                player.set_settings(settings.clone());
                forward_packet_to_server(player, settings).await;
            }
            Packet::ResourcePackResponse(response) => handle_resource_pack_response(player, response).await,
            Packet::CookieResponse(cookie) => handle_cookie_response(player, cookie).await,
            Packet::FinishedUpdate(_) => self.handle_finished_update().await,
            Packet::PluginMessage(msg) => self.handle_plugin_message(msg).await,
            _ => forward_to_server(player, &pc).await,
        }
    }

    /// The client confirmed the end of config; it is in play from here on.
    async fn handle_finished_update(&self) {
        let conn = self.player.conn();
        conn.set_state(State::Play);
        conn.set_session_handler(Session::ClientPlay(Arc::new(ClientPlaySession::new(self.player.clone()))))
            .await;
        self.player.config_acknowledged();
        if let Err(e) = conn.flush_play_queue().await {
            debug!(player = %self.player, "could not flush held play packets: {}", e);
        }
    }

    async fn handle_plugin_message(&self, msg: PluginMessage) {
        let player = &self.player;
        if channel::is_brand(&msg.channel) {
            player.set_client_brand(plugin_message::read_brand(&msg));
        } else if channel::is_register(&msg.channel) {
            player.add_channels(&plugin_message::channels(&msg, player.protocol()));
        } else if channel::is_unregister(&msg.channel) {
            player.remove_channels(&plugin_message::channels(&msg, player.protocol()));
        }
        // a backend still logging in gets it after joining
        let backend_ready = player
            .connection_in_flight()
            .or_else(|| player.connected_server())
            .and_then(|s| s.ensure_connected())
            .is_some_and(|conn| conn.writer_state() != State::Login);
        if backend_ready {
            forward_packet_to_server(player, msg).await;
        } else {
            player.queue_plugin_message(msg);
        }
    }

    pub async fn disconnected(self: Arc<Self>) {
        self.player.teardown().await;
    }
}
