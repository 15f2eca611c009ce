use super::forward_keep_alive;
use crate::plugin_message;
use crate::player::ConnectedPlayer;
use rampart_protocol_core::channel;
use rampart_protocol_core::{Packet, PacketContext, PluginMessage, State};
use std::sync::Arc;
use tracing::trace;

/// Holds a pre-1.20.2 client in Play until its first backend joined.
pub struct InitialConnectSession {
    player: Arc<ConnectedPlayer>,
}

impl InitialConnectSession {
    pub fn new(player: Arc<ConnectedPlayer>) -> Self {
        Self { player }
    }

    pub async fn handle(self: Arc<Self>, pc: PacketContext) {
        match pc.packet {
            Some(Packet::PluginMessage(msg)) => self.handle_plugin_message(msg).await,
            Some(Packet::ClientSettings(settings)) => self.player.set_settings(settings),
            Some(Packet::KeepAlive(keep_alive)) => forward_keep_alive(&self.player, keep_alive).await,
            _ => trace!(player = %self.player, id = pc.packet_id, "ignoring packet before first join"),
        }
    }

    async fn handle_plugin_message(&self, msg: PluginMessage) {
        let player = &self.player;
        let Some(backend) = player.connection_in_flight() else {
            player.queue_plugin_message(msg);
            return;
        };
        if plugin_message::handle_client_forge_message(player, &backend, &msg).await {
            return;
        }
        if channel::is_register(&msg.channel) {
            player.add_channels(&plugin_message::channels(&msg, player.protocol()));
        } else if channel::is_unregister(&msg.channel) {
            player.remove_channels(&plugin_message::channels(&msg, player.protocol()));
        }
        // a backend still logging in cannot take play packets yet
        match backend.ensure_connected() {
            Some(conn) if conn.writer_state() == State::Play => {
                if let Err(e) = conn.write_packet(msg).await {
                    trace!(player = %player, "could not forward plugin message: {}", e);
                }
            }
            _ => player.queue_plugin_message(msg),
        }
    }

    pub async fn disconnected(self: Arc<Self>) {
        self.player.teardown().await;
    }
}
