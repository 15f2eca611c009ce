use super::backend_play::{
    forward_to_player, handle_cookie_request, handle_store_cookie, handle_transfer, server_closed, BackendPlaySession,
};
use super::backend_transition::BackendTransitionSession;
use super::Session;
use crate::backend::ServerConnection;
use crate::connect::{ConnectError, ConnectionResult};
use crate::plugin_message;
use rampart_protocol_core::channel;
use rampart_protocol_core::{FinishedUpdate, KeepAlive, Packet, PacketContext, State};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// A backend in the config state (1.20.2+). The client is configured by
/// the backend directly; the proxy only relays and keeps both sides in step.
pub struct BackendConfigSession {
    server_conn: Arc<ServerConnection>,
}

impl BackendConfigSession {
    pub fn new(server_conn: Arc<ServerConnection>) -> Self {
        Self { server_conn }
    }

    pub async fn activated(self: Arc<Self>) {
        let Some(conn) = self.server_conn.ensure_connected() else {
            return;
        };
        let player = self.server_conn.player().clone();
        if let Some(settings) = player.settings() {
            if let Err(e) = conn.write_packet(settings).await {
                debug!(player = %player, "could not send client settings: {}", e);
            }
        }
        if !matches!(player.conn().session_handler(), Session::ClientPlay(_)) {
            return;
        }

        // switching servers: the client has to leave play first
        if let Some(previous) = player.connected_server() {
            if !Arc::ptr_eq(&previous, &self.server_conn) {
                player.clear_connected_if(&previous);
                previous.disconnect();
                let keep_alive = KeepAlive {
                    random_id: rand::random(),
                };
                if let Err(e) = player.conn().write_packet(keep_alive).await {
                    debug!(player = %player, "could not send keep-alive: {}", e);
                }
            }
        }
        conn.set_auto_reading(false);
        let acknowledged = player.switch_to_config().await;
        tokio::spawn(async move {
            if acknowledged.await.is_ok() {
                conn.set_auto_reading(true);
            }
        });
    }

    pub async fn handle(self: Arc<Self>, pc: PacketContext) {
        let player = self.server_conn.player();
        let Some(packet) = pc.packet.as_ref() else {
            forward_to_player(player, &pc).await;
            return;
        };
        if !self.server_conn.active() {
            self.server_conn.disconnect();
            return;
        }
        match packet {
            Packet::KeepAlive(keep_alive) => {
                self.server_conn.record_ping(keep_alive.random_id);
                forward_to_player(player, &pc).await;
            }
            Packet::FinishedUpdate(_) => self.handle_finished_update().await,
            Packet::PluginMessage(msg) if channel::is_brand(&msg.channel) => {
                let rewritten = plugin_message::rewrite_brand(msg, player.protocol());
                if let Err(e) = player.conn().write_packet(rewritten).await {
                    trace!(player = %player, "could not forward brand: {}", e);
                }
            }
            Packet::Disconnect(disconnect) => {
                let server = self.server_conn.server().clone();
                let reason = disconnect.reason.to_text();
                self.server_conn.disconnect();
                let result = ConnectionResult::disconnected(server.clone(), reason.clone(), true);
                if !self.server_conn.complete_request(Ok(result)) {
                    // reconfiguring an already joined server
                    tokio::spawn(player.clone().handle_disconnect_with_reason(server, reason, true));
                }
            }
            Packet::Transfer(transfer) => handle_transfer(player, transfer.clone()).await,
            Packet::StoreCookie(cookie) => handle_store_cookie(player, cookie.clone()).await,
            Packet::CookieRequest(request) => handle_cookie_request(player, request.clone()).await,
            _ => forward_to_player(player, &pc).await,
        }
    }

    /// The backend is done configuring: wait for the client to confirm,
    /// then confirm to the backend and move both to play.
    async fn handle_finished_update(self: &Arc<Self>) {
        let Some(conn) = self.server_conn.ensure_connected() else {
            return;
        };
        let player = self.server_conn.player().clone();
        if !matches!(player.conn().session_handler(), Session::ClientConfig(_)) {
            let handler = player.conn().session_handler().name();
            error!(player = %player, handler, "client is not in config while the backend finished it");
            self.server_conn.disconnect();
            self.server_conn
                .complete_request(Err(ConnectError::Closed(format!("client in unexpected state {}", handler))));
            return;
        }

        conn.set_reader_state(State::Play);
        let client_done = player.finish_config().await;
        let server_conn = self.server_conn.clone();
        tokio::spawn(async move {
            if client_done.await.is_err() {
                return;
            }
            if let Err(e) = conn.write_packet(FinishedUpdate).await {
                error!(player = %server_conn.player(), "could not finish config with backend: {}", e);
                server_conn.disconnect();
                server_conn.complete_request(Err(e.into()));
                return;
            }
            conn.set_writer_state(State::Play);
            let reconfigured = server_conn
                .player()
                .connected_server()
                .is_some_and(|current| Arc::ptr_eq(&current, &server_conn));
            let next = if reconfigured {
                Session::BackendPlay(Arc::new(BackendPlaySession::new(server_conn)))
            } else {
                Session::BackendTransition(Arc::new(BackendTransitionSession::new(server_conn)))
            };
            conn.set_session_handler(next).await;
        });
    }

    pub async fn disconnected(self: Arc<Self>) {
        let failed_request = self.server_conn.complete_request(Err(ConnectError::Closed(
            "unexpectedly disconnected from remote server".into(),
        )));
        if !failed_request {
            server_closed(&self.server_conn).await;
        }
    }
}
