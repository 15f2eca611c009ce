use super::backend_play::{announces_bungee_channel, apply_backend_step, BackendPlaySession};
use super::client_play::ClientPlaySession;
use super::Session;
use crate::backend::ServerConnection;
use crate::bungeecord;
use crate::connect::{ConnectError, ConnectionResult, ConnectionStatus};
use crate::events::{ServerConnectedEvent, ServerPostConnectEvent};
use crate::messages;
use crate::phase::{BackendPhase, ConnectionType};
use crate::plugin_message;
use parking_lot::Mutex;
use rampart_protocol_core::channel;
use rampart_protocol_core::{JoinGame, KeepAlive, Packet, PacketContext, PluginMessage, Protocol, Respawn};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Waits for the backend's `JoinGame` and moves the client over to it.
pub struct BackendTransitionSession {
    server_conn: Arc<ServerConnection>,
    held_bungee_messages: Mutex<Vec<PluginMessage>>,
}

impl BackendTransitionSession {
    pub fn new(server_conn: Arc<ServerConnection>) -> Self {
        Self {
            server_conn,
            held_bungee_messages: Mutex::new(Vec::new()),
        }
    }

    pub async fn handle(self: Arc<Self>, pc: PacketContext) {
        let Some(packet) = pc.packet else {
            return;
        };
        if !self.server_conn.active() {
            self.server_conn.disconnect();
            return;
        }
        match packet {
            Packet::JoinGame(join) => self.handle_join_game(join).await,
            Packet::KeepAlive(keep_alive) => {
                // the client is not attached yet; answer on its behalf
                if let Some(conn) = self.server_conn.ensure_connected() {
                    let _ = conn.write_packet(keep_alive).await;
                }
            }
            Packet::Disconnect(disconnect) => {
                let player = self.server_conn.player();
                let safe = player.connection_type() != ConnectionType::LegacyForge
                    || self.server_conn.phase().considered_complete();
                let server = self.server_conn.server().clone();
                self.server_conn.complete_request(Ok(ConnectionResult::disconnected(
                    server,
                    disconnect.reason.to_text(),
                    safe,
                )));
                self.server_conn.disconnect();
            }
            Packet::PluginMessage(msg) => self.handle_plugin_message(msg).await,
            other => debug!(
                server = %self.server_conn.server().name(),
                kind = ?other.kind(),
                "unexpected packet while transitioning"
            ),
        }
    }

    async fn handle_plugin_message(&self, msg: PluginMessage) {
        if announces_bungee_channel(self.server_conn.player()) && channel::is_bungee(&msg.channel) {
            self.held_bungee_messages.lock().push(msg);
            return;
        }
        let player = self.server_conn.player();
        if let Some(step) = self.server_conn.with_phase(|phase| phase.handle(&msg)) {
            if step.became_legacy_forge {
                if let Some(existing) = player.connected_server() {
                    if !Arc::ptr_eq(&existing, &self.server_conn) {
                        existing.with_phase(|phase| *phase = BackendPhase::InTransition);
                    }
                }
            }
            apply_backend_step(player, step).await;
        }
        if let Err(e) = player.conn().write_packet(msg).await {
            debug!(player = %player, "could not forward plugin message: {}", e);
        }
    }

    async fn handle_join_game(&self, join: JoinGame) {
        let Some(conn) = self.server_conn.ensure_connected() else {
            return;
        };
        let player = self.server_conn.player().clone();
        let server = self.server_conn.server().clone();
        let protocol = player.protocol();

        let previous = player
            .connected_server()
            .filter(|existing| !Arc::ptr_eq(existing, &self.server_conn));
        if let Some(previous) = &previous {
            player.clear_connected_if(previous);
            previous.disconnect();
        }
        let previous_server = previous.as_ref().map(|p| p.server().clone());

        conn.set_auto_reading(false);
        let mut connected = ServerConnectedEvent {
            player: player.clone(),
            server: server.clone(),
            previous: previous_server.clone(),
            entity_id: join.entity_id,
        };
        player.proxy().events().fire(&mut connected);
        if !player.active() {
            self.fail(ConnectError::Closed("player disconnected".into())).await;
            return;
        }
        match &previous_server {
            None => info!(player = %player, server = %server.name(), "player joining initial server"),
            Some(prev) => info!(
                player = %player,
                server = %server.name(),
                previous = %prev.name(),
                "player switching server"
            ),
        }

        let mut to_client: Vec<Packet> = Vec::new();
        if previous.is_some() {
            to_client.push(
                KeepAlive {
                    random_id: rand::random(),
                }
                .into(),
            );
        }
        // 1.20.2+ clients come out of config with no world loaded
        let first_join = protocol >= Protocol::V1_20_2 || !player.mark_spawned();
        if first_join {
            to_client.push(join.clone().into());
            player.with_phase(|phase| phase.on_first_join());
        } else {
            to_client.extend(player.reset_server_state());
            to_client.extend(switch_packets(&join, protocol));
        }
        if let Some(reset) = player.reset_title_packet() {
            to_client.push(reset);
        }
        if let Err(e) = player.conn().write_packets(to_client).await {
            self.fail(e.into()).await;
            return;
        }

        let backend_protocol = conn.protocol();
        let mut to_server: Vec<Packet> = Vec::new();
        let mut channels = player.known_channels();
        if announces_bungee_channel(&player) {
            let bungee = if backend_protocol >= Protocol::V1_13 {
                channel::BUNGEE_CHANNEL
            } else {
                channel::BUNGEE_CHANNEL_LEGACY
            };
            if !channels.iter().any(|c| c == bungee) {
                channels.push(bungee.to_string());
            }
        }
        if !channels.is_empty() {
            to_server.push(plugin_message::register_packet(backend_protocol, &channels).into());
        }
        to_server.extend(player.drain_plugin_messages().into_iter().map(Packet::from));
        if backend_protocol < Protocol::V1_20_2 {
            if let Some(settings) = player.settings() {
                to_server.push(settings.into());
            }
        }
        if let Err(e) = conn.write_packets(to_server).await {
            self.fail(e.into()).await;
            return;
        }

        self.server_conn.complete_join();
        server.add_player(&player);
        conn.set_session_handler(Session::BackendPlay(Arc::new(BackendPlaySession::new(
            self.server_conn.clone(),
        ))))
        .await;
        player.set_connected_server(Some(self.server_conn.clone()));
        if protocol < Protocol::V1_20_2 && !matches!(player.conn().session_handler(), Session::ClientPlay(_)) {
            player
                .conn()
                .set_session_handler(Session::ClientPlay(Arc::new(ClientPlaySession::new(player.clone()))))
                .await;
        }
        conn.set_auto_reading(true);

        let held = std::mem::take(&mut *self.held_bungee_messages.lock());
        for msg in held {
            bungeecord::handle(&self.server_conn, &msg).await;
        }

        let mut post_connect = ServerPostConnectEvent {
            player: player.clone(),
            previous: previous_server,
        };
        player.proxy().events().fire(&mut post_connect);
        self.server_conn
            .complete_request(Ok(ConnectionResult::new(ConnectionStatus::Success, Some(server))));
    }

    async fn fail(&self, err: ConnectError) {
        let player = self.server_conn.player();
        error!(player = %player, server = %self.server_conn.server().name(), "unable to switch player to new server: {}", err);
        player.disconnect(&messages::internal_server_connection_error()).await;
        self.server_conn.complete_request(Err(err));
    }

    pub async fn disconnected(self: Arc<Self>) {
        self.server_conn.complete_request(Err(ConnectError::Closed(
            "unexpectedly disconnected from remote server".into(),
        )));
    }
}

/// What a client that already has a world loaded receives for a new
/// backend's `JoinGame`: the join itself, then the respawns that force a
/// dimension reload.
fn switch_packets(join: &JoinGame, protocol: Protocol) -> Vec<Packet> {
    let mut packets: Vec<Packet> = vec![join.clone().into()];
    let mut respawn = Respawn::from_join_game(join);
    if protocol < Protocol::V1_16 {
        let real = respawn.dimension;
        respawn.dimension = if real == 0 { -1 } else { 0 };
        packets.push(respawn.clone().into());
        respawn.dimension = real;
    }
    packets.push(respawn.into());
    packets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Proxy;
    use crate::test_support;
    use rampart_protocol_core::{Direction, Disconnect, ServerLoginSuccess, State};
    use rampart_types::TextComponent;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn join(dimension: i32) -> JoinGame {
        JoinGame {
            entity_id: 42,
            dimension,
            ..JoinGame::default()
        }
    }

    fn respawn_dimensions(packets: &[Packet]) -> Vec<i32> {
        packets
            .iter()
            .filter_map(|p| match p {
                Packet::Respawn(r) => Some(r.dimension),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_switch_before_1_16_flips_dimension() {
        let packets = switch_packets(&join(0), Protocol::V1_14);
        assert!(matches!(&packets[0], Packet::JoinGame(j) if j.entity_id == 42));
        assert_eq!(respawn_dimensions(&packets), vec![-1, 0]);

        let packets = switch_packets(&join(-1), Protocol::V1_12_2);
        assert_eq!(respawn_dimensions(&packets), vec![0, -1]);
    }

    #[test]
    fn test_switch_from_1_16_single_respawn() {
        let packets = switch_packets(&join(0), Protocol::V1_16_4);
        assert_eq!(packets.len(), 2);
        assert!(matches!(&packets[0], Packet::JoinGame(_)));
        assert_eq!(respawn_dimensions(&packets), vec![0]);
    }

    #[tokio::test]
    async fn test_legacy_forge_kick_during_switch_is_final() {
        let lobby = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hub = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = Proxy::new(test_support::config(&[
            ("lobby", lobby.local_addr().unwrap()),
            ("hub", hub.local_addr().unwrap()),
        ]))
        .unwrap();
        let (player, client) = test_support::player(&proxy, Protocol::V1_12_2, "play.example.com\0FML\0").await;
        assert_eq!(player.connection_type(), ConnectionType::LegacyForge);
        let (_client, mut client_rx) =
            test_support::capture(client, Direction::ClientBound, Protocol::V1_12_2, State::Login).await;

        let request = player.create_connection_request(proxy.server("lobby").unwrap());
        let connecting = tokio::spawn(async move { request.connect_with_indication().await });

        let (server, mut rx) = test_support::fake_backend(&lobby).await;
        let login = test_support::next_packet(&mut rx, |p| match p {
            Packet::ServerLogin(login) => Some(login),
            _ => None,
        })
        .await;
        server
            .write_packet(ServerLoginSuccess {
                uuid: player.id(),
                username: login.username,
                properties: Vec::new(),
            })
            .await
            .unwrap();
        server.set_state(State::Play);
        // kicked before the Forge handshake got anywhere
        server
            .write_packet(Disconnect::from_text(&TextComponent::plain("server full")))
            .await
            .unwrap();

        assert!(!connecting.await.unwrap());
        test_support::next_packet(&mut client_rx, |p| match p {
            Packet::Disconnect(d) => Some(d),
            _ => None,
        })
        .await;
        assert!(!player.active());
        assert!(player.connected_server().is_none());
        // no failover attempt
        assert!(tokio::time::timeout(Duration::from_millis(200), hub.accept())
            .await
            .is_err());
    }
}
