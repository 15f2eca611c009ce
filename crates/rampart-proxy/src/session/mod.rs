//! Per-state packet handlers for client and backend connections.
//!
//! A connection holds exactly one [`Session`] at a time; handlers move the
//! connection forward by installing the next one.

pub mod auth;
pub mod backend_config;
pub mod backend_login;
pub mod backend_play;
pub mod backend_transition;
pub mod client_config;
pub mod client_play;
pub mod handshake;
pub mod initial_connect;
pub mod initial_login;
pub mod status;

use crate::phase::ConnectionType;
use crate::player::ConnectedPlayer;
use futures::future::BoxFuture;
use futures::FutureExt;
use rampart_protocol_core::{
    Handshake, Intent, KeepAlive, MinecraftConn, Packet, PacketContext, Protocol, SessionHandler,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::trace;

pub type Conn = MinecraftConn<Session>;

/// A client connection that has sent its handshake.
pub struct Inbound {
    conn: Arc<Conn>,
    handshake: Handshake,
    virtual_host: String,
    intent: Intent,
    connection_type: ConnectionType,
}

impl Inbound {
    pub fn new(conn: Arc<Conn>, handshake: Handshake, intent: Intent) -> Self {
        Self {
            virtual_host: clean_virtual_host(&handshake.server_address),
            connection_type: ConnectionType::from_handshake(&handshake),
            conn,
            handshake,
            intent,
        }
    }

    pub fn conn(&self) -> &Arc<Conn> {
        &self.conn
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.conn.remote_addr()
    }

    pub fn protocol(&self) -> Protocol {
        Protocol(self.handshake.protocol_version)
    }

    /// The hostname the client connected with, without Forge markers or a
    /// trailing dot.
    pub fn virtual_host(&self) -> &str {
        &self.virtual_host
    }

    /// The server address exactly as sent.
    pub fn raw_virtual_host(&self) -> &str {
        &self.handshake.server_address
    }

    pub fn port(&self) -> u16 {
        self.handshake.port
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    pub fn active(&self) -> bool {
        !self.conn.is_closed()
    }
}

/// Strip everything after the first NUL (Forge and forwarding payloads), a
/// `:port` suffix and the trailing dot of fully qualified names. Lowercased.
pub fn clean_virtual_host(host: &str) -> String {
    let host = host.split('\0').next().unwrap_or_default().trim();
    let host = strip_port(host);
    host.strip_suffix('.').unwrap_or(host).to_ascii_lowercase()
}

fn strip_port(host: &str) -> &str {
    // bracketed IPv6 literal, with or without a port
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.parse::<u16>().is_ok() => name,
        _ => host,
    }
}

/// The backend a client packet should go to: the connection in flight
/// while switching, otherwise the connected one.
fn forward_target(player: &ConnectedPlayer) -> Option<Arc<Conn>> {
    player
        .connection_in_flight()
        .or_else(|| player.connected_server())
        .and_then(|s| s.ensure_connected())
}

/// Pass an unhandled client frame to the backend unchanged.
pub(crate) async fn forward_to_server(player: &ConnectedPlayer, pc: &PacketContext) {
    if let Some(conn) = forward_target(player) {
        if let Err(e) = conn.write_raw(&pc.payload).await {
            trace!(player = %player, id = pc.packet_id, "could not forward packet: {}", e);
        }
    }
}

pub(crate) async fn forward_packet_to_server(player: &ConnectedPlayer, packet: impl Into<Packet>) {
    if let Some(conn) = forward_target(player) {
        if let Err(e) = conn.write_packet(packet).await {
            trace!(player = %player, "could not forward packet: {}", e);
        }
    }
}

/// A client keep-alive only reaches the backend that sent the matching
/// ping.
pub(crate) async fn forward_keep_alive(player: &ConnectedPlayer, keep_alive: KeepAlive) {
    let candidates = [player.connected_server(), player.connection_in_flight()];
    for server in candidates.into_iter().flatten() {
        if let Some(rtt) = server.take_ping(keep_alive.random_id) {
            trace!(player = %player, server = %server.server().name(), ?rtt, "keep-alive answered");
            if let Some(conn) = server.ensure_connected() {
                if let Err(e) = conn.write_packet(keep_alive).await {
                    trace!(player = %player, "could not forward keep-alive: {}", e);
                }
            }
            return;
        }
    }
}

#[derive(Clone)]
pub enum Session {
    Nop,
    Handshake(Arc<handshake::HandshakeSession>),
    Status(Arc<status::StatusSession>),
    InitialLogin(Arc<initial_login::InitialLoginSession>),
    Auth(Arc<auth::AuthSession>),
    InitialConnect(Arc<initial_connect::InitialConnectSession>),
    ClientConfig(Arc<client_config::ClientConfigSession>),
    ClientPlay(Arc<client_play::ClientPlaySession>),
    BackendLogin(Arc<backend_login::BackendLoginSession>),
    BackendConfig(Arc<backend_config::BackendConfigSession>),
    BackendTransition(Arc<backend_transition::BackendTransitionSession>),
    BackendPlay(Arc<backend_play::BackendPlaySession>),
}

impl Session {
    pub fn name(&self) -> &'static str {
        match self {
            Session::Nop => "nop",
            Session::Handshake(_) => "handshake",
            Session::Status(_) => "status",
            Session::InitialLogin(_) => "initial_login",
            Session::Auth(_) => "auth",
            Session::InitialConnect(_) => "initial_connect",
            Session::ClientConfig(_) => "client_config",
            Session::ClientPlay(_) => "client_play",
            Session::BackendLogin(_) => "backend_login",
            Session::BackendConfig(_) => "backend_config",
            Session::BackendTransition(_) => "backend_transition",
            Session::BackendPlay(_) => "backend_play",
        }
    }
}

impl SessionHandler for Session {
    fn handle_packet(&self, pc: PacketContext) -> BoxFuture<'static, ()> {
        match self.clone() {
            Session::Nop => async {}.boxed(),
            Session::Handshake(s) => s.handle(pc).boxed(),
            Session::Status(s) => s.handle(pc).boxed(),
            Session::InitialLogin(s) => s.handle(pc).boxed(),
            Session::Auth(s) => s.handle(pc).boxed(),
            Session::InitialConnect(s) => s.handle(pc).boxed(),
            Session::ClientConfig(s) => s.handle(pc).boxed(),
            Session::ClientPlay(s) => s.handle(pc).boxed(),
            Session::BackendLogin(s) => s.handle(pc).boxed(),
            Session::BackendConfig(s) => s.handle(pc).boxed(),
            Session::BackendTransition(s) => s.handle(pc).boxed(),
            Session::BackendPlay(s) => s.handle(pc).boxed(),
        }
    }

    fn activated(&self) -> BoxFuture<'static, ()> {
        match self.clone() {
            Session::BackendConfig(s) => s.activated().boxed(),
            _ => async {}.boxed(),
        }
    }

    fn disconnected(&self) -> BoxFuture<'static, ()> {
        match self.clone() {
            Session::Nop | Session::Handshake(_) | Session::Status(_) => async {}.boxed(),
            Session::InitialLogin(s) => s.disconnected().boxed(),
            Session::Auth(s) => s.disconnected().boxed(),
            Session::InitialConnect(s) => s.disconnected().boxed(),
            Session::ClientConfig(s) => s.disconnected().boxed(),
            Session::ClientPlay(s) => s.disconnected().boxed(),
            Session::BackendLogin(s) => s.disconnected().boxed(),
            Session::BackendConfig(s) => s.disconnected().boxed(),
            Session::BackendTransition(s) => s.disconnected().boxed(),
            Session::BackendPlay(s) => s.disconnected().boxed(),
        }
    }

    fn nop() -> Self {
        Session::Nop
    }
}
