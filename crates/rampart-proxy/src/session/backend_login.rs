use super::auth::AuthSession;
use super::backend_config::BackendConfigSession;
use super::backend_transition::BackendTransitionSession;
use super::{Conn, Session};
use crate::backend::ServerConnection;
use crate::config::ForwardingMode;
use crate::connect::{ConnectError, ConnectionResult};
use crate::events::ServerLoginPluginMessageEvent;
use crate::forge;
use crate::forwarding;
use rampart_protocol_core::{
    LoginAcknowledged, LoginPluginMessage, LoginPluginResponse, Packet, PacketContext, Protocol, State,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

const LEGACY_FORWARDING_HINT: &str = "The connection to the remote server was unexpectedly closed.\n\
     This is usually because the remote server does not have BungeeCord IP forwarding correctly enabled.";

/// Logs the player into a backend on the proxy's behalf.
pub struct BackendLoginSession {
    server_conn: Arc<ServerConnection>,
    information_forwarded: AtomicBool,
}

impl BackendLoginSession {
    pub fn new(server_conn: Arc<ServerConnection>) -> Self {
        Self {
            server_conn,
            information_forwarded: AtomicBool::new(false),
        }
    }

    pub async fn handle(self: Arc<Self>, pc: PacketContext) {
        let Some(packet) = pc.packet else {
            trace!(server = %self.server_conn.server().name(), id = pc.packet_id, "unknown packet during backend login");
            return;
        };
        match packet {
            Packet::LoginPluginMessage(msg) => self.handle_login_plugin_message(msg).await,
            Packet::Disconnect(disconnect) => {
                let server = self.server_conn.server().clone();
                self.server_conn.complete_request(Ok(ConnectionResult::disconnected(
                    server,
                    disconnect.reason.to_text(),
                    true,
                )));
                self.server_conn.disconnect();
            }
            Packet::EncryptionRequest(_) => {
                self.server_conn.complete_request(Err(ConnectError::ServerOnlineMode));
                self.server_conn.disconnect();
            }
            Packet::SetCompression(compression) => {
                if let Some(conn) = self.server_conn.ensure_connected() {
                    conn.set_compression_threshold(compression.threshold).await;
                }
            }
            Packet::ServerLoginSuccess(_) => self.handle_login_success().await,
            other => debug!(server = %self.server_conn.server().name(), kind = ?other.kind(), "unexpected packet during backend login"),
        }
    }

    async fn handle_login_plugin_message(&self, msg: LoginPluginMessage) {
        let Some(conn) = self.server_conn.ensure_connected() else {
            return;
        };
        let player = self.server_conn.player();
        let config = player.proxy().config();

        let response = if config.forwarding.mode == ForwardingMode::Velocity
            && msg.channel.eq_ignore_ascii_case(forwarding::VELOCITY_CHANNEL)
        {
            let data = forwarding::velocity_data(
                config.forwarding.velocity_secret.as_bytes(),
                player.remote_addr().ip(),
                player.profile(),
            );
            self.information_forwarded.store(true, Ordering::SeqCst);
            LoginPluginResponse {
                id: msg.id,
                success: true,
                data,
            }
        } else if forge::is_login_channel(&msg.channel) {
            if let Some(auth) = self.held_client_login() {
                self.relay_forge_query(auth, conn, msg).await;
                return;
            }
            // the client has already finished its own login
            LoginPluginResponse {
                id: msg.id,
                success: true,
                data: Vec::new(),
            }
        } else {
            let mut event = ServerLoginPluginMessageEvent {
                player: player.clone(),
                server: self.server_conn.server().clone(),
                id: msg.id,
                channel: msg.channel,
                data: msg.data,
                reply: None,
            };
            player.proxy().events().fire(&mut event);
            match event.reply {
                Some(data) => LoginPluginResponse {
                    id: msg.id,
                    success: true,
                    data,
                },
                None => LoginPluginResponse {
                    id: msg.id,
                    success: false,
                    data: Vec::new(),
                },
            }
        };
        if let Err(e) = conn.write_packet(response).await {
            debug!(server = %self.server_conn.server().name(), "could not answer login plugin message: {}", e);
        }
    }

    /// The client's auth session, while it is held in login for us.
    fn held_client_login(&self) -> Option<Arc<AuthSession>> {
        match self.server_conn.player().conn().session_handler() {
            Session::Auth(auth) if auth.holds_login() => Some(auth),
            _ => None,
        }
    }

    async fn relay_forge_query(&self, auth: Arc<AuthSession>, conn: Arc<Conn>, query: LoginPluginMessage) {
        let Some(answer) = auth.relay_login_query(query).await else {
            self.abandon("player left during forge login");
            return;
        };
        let server_conn = self.server_conn.clone();
        tokio::spawn(async move {
            match answer.await {
                Ok(response) => {
                    if let Err(e) = conn.write_packet(response).await {
                        debug!(server = %server_conn.server().name(), "could not pass forge login answer: {}", e);
                    }
                }
                Err(_) => {
                    server_conn.complete_request(Err(ConnectError::Closed("player left during forge login".into())));
                    server_conn.disconnect();
                }
            }
        });
    }

    fn abandon(&self, reason: &str) {
        self.server_conn.complete_request(Err(ConnectError::Closed(reason.into())));
        self.server_conn.disconnect();
    }

    async fn handle_login_success(&self) {
        let Some(conn) = self.server_conn.ensure_connected() else {
            return;
        };
        let player = self.server_conn.player();
        if player.proxy().config().forwarding.mode == ForwardingMode::Velocity
            && !self.information_forwarded.load(Ordering::SeqCst)
        {
            self.server_conn
                .complete_request(Err(ConnectError::MissingVelocityForwarding));
            self.server_conn.disconnect();
            return;
        }

        if let Some(auth) = self.held_client_login() {
            let Some(released) = auth.release_held_login().await else {
                self.abandon("player left during login");
                return;
            };
            if released.await.is_err() {
                self.abandon("player left during login");
                return;
            }
        }

        if conn.protocol() >= Protocol::V1_20_2 {
            if let Err(e) = conn.write_packet(LoginAcknowledged).await {
                self.server_conn.complete_request(Err(e.into()));
                return;
            }
            conn.set_state(State::Config);
            conn.set_session_handler(Session::BackendConfig(Arc::new(BackendConfigSession::new(
                self.server_conn.clone(),
            ))))
            .await;
        } else {
            conn.set_state(State::Play);
            conn.set_session_handler(Session::BackendTransition(Arc::new(BackendTransitionSession::new(
                self.server_conn.clone(),
            ))))
            .await;
        }
    }

    pub async fn disconnected(self: Arc<Self>) {
        let reason = if self.server_conn.player().proxy().config().forwarding.mode == ForwardingMode::Legacy {
            LEGACY_FORWARDING_HINT.to_string()
        } else {
            "unexpectedly disconnected from remote server".to_string()
        };
        self.server_conn.complete_request(Err(ConnectError::Closed(reason)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Proxy;
    use crate::test_support;
    use rampart_protocol_core::ServerLoginSuccess;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_velocity_login_without_forwarding_request() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_support::config(&[("lobby", backend.local_addr().unwrap())]);
        config.forwarding.mode = ForwardingMode::Velocity;
        config.forwarding.velocity_secret = "hunter2".into();
        let proxy = Proxy::new(config).unwrap();
        let (player, _client) = test_support::player(&proxy, Protocol::V1_20_3, "play.example.com").await;
        let server_conn = Arc::new(ServerConnection::new(proxy.server("lobby").unwrap(), player.clone()));

        let connecting = tokio::spawn({
            let server_conn = server_conn.clone();
            async move { server_conn.connect().await }
        });
        let (server, mut rx) = test_support::fake_backend(&backend).await;
        let login = test_support::next_packet(&mut rx, |p| match p {
            Packet::ServerLogin(login) => Some(login),
            _ => None,
        })
        .await;
        assert_eq!(login.username, "Steve");
        // log the player in without ever asking for forwarding data
        server
            .write_packet(ServerLoginSuccess {
                uuid: player.id(),
                username: login.username,
                properties: Vec::new(),
            })
            .await
            .unwrap();

        let result = connecting.await.unwrap();
        assert!(matches!(result, Err(ConnectError::MissingVelocityForwarding)));
        assert!(!server_conn.active());
    }
}
