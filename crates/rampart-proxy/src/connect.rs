//! Moving a player between backends: connection requests, failover and
//! kick handling.

use crate::backend::ServerConnection;
use crate::events::{KickResult, KickedFromServerEvent, ServerPreConnectEvent};
use crate::messages;
use crate::player::ConnectedPlayer;
use crate::server::RegisteredServer;
use futures::future::BoxFuture;
use futures::FutureExt;
use rampart_protocol_core::ConnError;
use rampart_types::TextComponent;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Success,
    AlreadyConnected,
    InProgress,
    Canceled,
    /// The backend refused the player; see the reason.
    ServerDisconnected,
}

#[derive(Debug, Clone)]
pub struct ConnectionResult {
    pub status: ConnectionStatus,
    pub reason: Option<TextComponent>,
    /// Whether the player can be moved elsewhere after a failure.
    pub safe: bool,
    pub attempted: Option<Arc<RegisteredServer>>,
}

impl ConnectionResult {
    pub fn new(status: ConnectionStatus, attempted: Option<Arc<RegisteredServer>>) -> Self {
        Self {
            status,
            reason: None,
            safe: true,
            attempted,
        }
    }

    pub fn disconnected(server: Arc<RegisteredServer>, reason: TextComponent, safe: bool) -> Self {
        Self {
            status: ConnectionStatus::ServerDisconnected,
            reason: Some(reason),
            safe,
            attempted: Some(server),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ConnectionStatus::Success
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("backend server is in online mode")]
    ServerOnlineMode,
    #[error("backend did not request velocity forwarding")]
    MissingVelocityForwarding,
    #[error("timed out connecting to backend")]
    Timeout,
    #[error("backend connection closed: {0}")]
    Closed(String),
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Conn(#[from] ConnError),
}

impl ConnectError {
    /// A message fit for the player, where a specific one exists.
    pub fn friendly_reason(&self) -> Option<TextComponent> {
        match self {
            ConnectError::ServerOnlineMode => Some(messages::online_mode_only()),
            ConnectError::MissingVelocityForwarding => Some(messages::missing_velocity_forwarding()),
            _ => None,
        }
    }
}

/// A request to move a player to a server.
pub struct ConnectionRequest {
    player: Arc<ConnectedPlayer>,
    server: Arc<RegisteredServer>,
}

impl ConnectionRequest {
    pub fn server(&self) -> &Arc<RegisteredServer> {
        &self.server
    }

    /// Connect without telling the player anything.
    pub async fn connect(&self) -> Result<ConnectionResult, ConnectError> {
        self.player.internal_connect(self.server.clone()).await
    }

    /// Connect and report failures to the player. Returns true on success.
    pub async fn connect_with_indication(&self) -> bool {
        let player = &self.player;
        match player.internal_connect(self.server.clone()).await {
            Err(e) => {
                player.clone().handle_connection_err(self.server.clone(), e, true).await;
                false
            }
            Ok(result) => match result.status {
                ConnectionStatus::Success => true,
                ConnectionStatus::AlreadyConnected => {
                    player.send_message(&messages::already_connected()).await;
                    false
                }
                ConnectionStatus::InProgress => {
                    player.send_message(&messages::already_connecting()).await;
                    false
                }
                ConnectionStatus::Canceled => false,
                ConnectionStatus::ServerDisconnected => {
                    let server = result.attempted.unwrap_or_else(|| self.server.clone());
                    let reason = result.reason.unwrap_or_else(messages::internal_server_connection_error);
                    player.clone().handle_disconnect_with_reason(server, reason, result.safe).await;
                    false
                }
            },
        }
    }

    /// Run [`Self::connect_with_indication`] in the background.
    pub fn fire_and_forget(self) {
        tokio::spawn(async move {
            self.connect_with_indication().await;
        });
    }
}

impl ConnectedPlayer {
    pub fn create_connection_request(self: &Arc<Self>, server: Arc<RegisteredServer>) -> ConnectionRequest {
        ConnectionRequest {
            player: self.clone(),
            server,
        }
    }

    fn check_server(&self, server: &Arc<RegisteredServer>) -> Option<ConnectionStatus> {
        if self.connection_in_flight().is_some() {
            return Some(ConnectionStatus::InProgress);
        }
        let connected = self.connected_server()?;
        if !connected.completed_join() {
            return Some(ConnectionStatus::InProgress);
        }
        if Arc::ptr_eq(connected.server(), server) {
            return Some(ConnectionStatus::AlreadyConnected);
        }
        None
    }

    async fn internal_connect(self: &Arc<Self>, server: Arc<RegisteredServer>) -> Result<ConnectionResult, ConnectError> {
        if let Some(status) = self.check_server(&server) {
            return Ok(ConnectionResult::new(status, Some(server)));
        }
        let mut event = ServerPreConnectEvent {
            player: self.clone(),
            original: server.clone(),
            server: Some(server),
        };
        self.proxy().events().fire(&mut event);
        let Some(target) = event.server else {
            return Ok(ConnectionResult::new(ConnectionStatus::Canceled, Some(event.original)));
        };
        if !self.active() {
            return Err(ConnectError::Closed("player disconnected".into()));
        }
        if let Some(status) = self.check_server(&target) {
            return Ok(ConnectionResult::new(status, Some(target)));
        }

        let conn = Arc::new(ServerConnection::new(target.clone(), self.clone()));
        self.set_in_flight(Some(conn.clone()));
        let result = conn.connect().await;
        let succeeded = matches!(&result, Ok(r) if r.is_success());
        if !succeeded {
            self.reset_in_flight_if(&conn);
            conn.disconnect();
        }
        result.map(|mut r| {
            r.attempted.get_or_insert(target);
            r
        })
    }

    /// Failed to reach `server`; pick a message and go through the kick
    /// handling.
    pub(crate) async fn handle_connection_err(self: Arc<Self>, server: Arc<RegisteredServer>, err: ConnectError, safe: bool) {
        if !self.active() {
            return;
        }
        let current = self
            .current_server()
            .is_some_and(|s| Arc::ptr_eq(&s, &server));
        let friendly = if current {
            info!(player = %self, server = %server.name(), "lost connection to server: {}", err);
            messages::connection_error(server.name())
        } else {
            info!(player = %self, server = %server.name(), "unable to connect to server: {}", err);
            messages::unable_to_connect(server.name())
        };
        let kick_reason = err.friendly_reason();
        self.handle_connection_result(server, kick_reason, friendly, safe).await;
    }

    /// The backend sent a disconnect (or closed) with `reason`.
    pub(crate) async fn handle_disconnect_with_reason(
        self: Arc<Self>,
        server: Arc<RegisteredServer>,
        reason: TextComponent,
        safe: bool,
    ) {
        let current = self
            .current_server()
            .is_some_and(|s| Arc::ptr_eq(&s, &server));
        let friendly = if current {
            info!(player = %self, server = %server.name(), "kicked from server: {}", reason.plain_text());
            messages::kicked_from_current(Some(reason.clone()))
        } else {
            warn!(player = %self, server = %server.name(), "disconnected while connecting: {}", reason.plain_text());
            messages::cant_connect(server.name(), Some(reason.clone()))
        };
        self.handle_connection_result(server, Some(reason), friendly, safe).await;
    }

    async fn handle_connection_result(
        self: Arc<Self>,
        server: Arc<RegisteredServer>,
        kick_reason: Option<TextComponent>,
        friendly: TextComponent,
        safe: bool,
    ) {
        if !self.active() {
            return;
        }
        if !safe {
            // the client cannot recover from a broken Forge handshake
            self.disconnect(&friendly).await;
            return;
        }
        let kicked_from_current = self
            .connected_server()
            .map_or(true, |c| Arc::ptr_eq(c.server(), &server));
        let result = if kicked_from_current {
            match self.next_server_to_try(Some(&server)) {
                Some(next) => KickResult::RedirectPlayer {
                    server: next,
                    message: None,
                },
                None => KickResult::DisconnectPlayer(friendly.clone()),
            }
        } else {
            if let Some(in_flight) = self.connection_in_flight() {
                if Arc::ptr_eq(in_flight.server(), &server) {
                    self.reset_in_flight_if(&in_flight);
                }
            }
            KickResult::Notify(friendly.clone())
        };
        let event = KickedFromServerEvent {
            player: self.clone(),
            server,
            original_reason: kick_reason,
            during_server_connect: !kicked_from_current,
            result,
        };
        self.handle_kick_event(event, friendly, kicked_from_current).await;
    }

    /// Boxed: redirects can fail and come back through here.
    fn handle_kick_event(
        self: Arc<Self>,
        mut event: KickedFromServerEvent,
        friendly: TextComponent,
        kicked_from_current: bool,
    ) -> BoxFuture<'static, ()> {
        async move {
            self.proxy().events().fire(&mut event);
            if !self.active() {
                return;
            }
            if let Some(in_flight) = self.connection_in_flight() {
                self.reset_in_flight_if(&in_flight);
            }
            let previous = self.connected_server();
            let previously_connected = previous.is_some();
            if kicked_from_current {
                if let Some(previous) = &previous {
                    self.clear_connected_if(previous);
                }
            }

            match event.result {
                KickResult::DisconnectPlayer(reason) => self.disconnect(&reason).await,
                KickResult::RedirectPlayer { server, message } => {
                    debug!(player = %self, server = %server.name(), "redirecting after kick");
                    match self.internal_connect(server.clone()).await {
                        Err(e) => self.handle_connection_err(server, e, true).await,
                        Ok(result) => match result.status {
                            ConnectionStatus::Canceled => {
                                self.disconnect(&message.unwrap_or(friendly)).await;
                            }
                            ConnectionStatus::ServerDisconnected => {
                                let reason = result
                                    .reason
                                    .unwrap_or_else(messages::internal_server_connection_error);
                                let attempted = result.attempted.unwrap_or(server);
                                self.handle_disconnect_with_reason(attempted, reason, result.safe).await;
                            }
                            ConnectionStatus::Success => {
                                let message = message.unwrap_or(friendly);
                                if !message.plain_text().is_empty() {
                                    self.send_message(&message).await;
                                }
                            }
                            ConnectionStatus::AlreadyConnected | ConnectionStatus::InProgress => {}
                        },
                    }
                }
                KickResult::Notify(message) => {
                    if event.during_server_connect && previously_connected {
                        self.send_message(&message).await;
                    } else {
                        self.disconnect(&message).await;
                    }
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerInfo;

    #[test]
    fn test_disconnected_result() {
        let server = Arc::new(RegisteredServer::new(ServerInfo::new("lobby", "127.0.0.1:25566").unwrap()));
        let result = ConnectionResult::disconnected(server.clone(), TextComponent::plain("full"), false);
        assert_eq!(result.status, ConnectionStatus::ServerDisconnected);
        assert!(!result.safe);
        assert!(!result.is_success());
        assert!(Arc::ptr_eq(result.attempted.as_ref().unwrap(), &server));
        assert!(ConnectionResult::new(ConnectionStatus::Success, None).is_success());
    }

    #[test]
    fn test_friendly_reasons() {
        assert!(ConnectError::ServerOnlineMode.friendly_reason().is_some());
        assert!(ConnectError::MissingVelocityForwarding.friendly_reason().is_some());
        assert!(ConnectError::Timeout.friendly_reason().is_none());
        assert_eq!(
            ConnectError::Closed("gone".into()).to_string(),
            "backend connection closed: gone"
        );
    }
}
