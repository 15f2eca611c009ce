//! The proxy's own connection to a backend on behalf of a player.

use crate::config::ForwardingMode;
use crate::connect::{ConnectError, ConnectionResult};
use crate::forge;
use crate::forwarding;
use crate::phase::{BackendPhase, ConnectionType};
use crate::player::ConnectedPlayer;
use crate::proxyproto;
use crate::server::RegisteredServer;
use crate::session::backend_login::BackendLoginSession;
use crate::session::{Conn, Session};
use parking_lot::{Mutex, RwLock};
use rampart_protocol_core::{Direction, Handshake, Intent, Protocol, ServerLogin, State};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::debug;

type RequestResult = Result<ConnectionResult, ConnectError>;

pub struct ServerConnection {
    server: Arc<RegisteredServer>,
    player: Arc<ConnectedPlayer>,
    conn: RwLock<Option<Arc<Conn>>>,
    phase: Mutex<BackendPhase>,
    request: Mutex<Option<oneshot::Sender<RequestResult>>>,
    completed_join: AtomicBool,
    graceful_disconnect: AtomicBool,
    last_ping_id: AtomicI64,
    last_ping_sent: Mutex<Option<Instant>>,
}

impl ServerConnection {
    pub fn new(server: Arc<RegisteredServer>, player: Arc<ConnectedPlayer>) -> Self {
        let phase = player.connection_type().initial_backend_phase();
        Self {
            server,
            player,
            conn: RwLock::new(None),
            phase: Mutex::new(phase),
            request: Mutex::new(None),
            completed_join: AtomicBool::new(false),
            graceful_disconnect: AtomicBool::new(false),
            last_ping_id: AtomicI64::new(-1),
            last_ping_sent: Mutex::new(None),
        }
    }

    pub fn server(&self) -> &Arc<RegisteredServer> {
        &self.server
    }

    pub fn player(&self) -> &Arc<ConnectedPlayer> {
        &self.player
    }

    pub fn conn(&self) -> Option<Arc<Conn>> {
        self.conn.read().clone()
    }

    pub fn active(&self) -> bool {
        self.conn().is_some_and(|c| !c.is_closed())
    }

    /// The backend connection, if it is still open.
    pub fn ensure_connected(&self) -> Option<Arc<Conn>> {
        self.conn().filter(|c| !c.is_closed())
    }

    pub fn phase(&self) -> BackendPhase {
        *self.phase.lock()
    }

    pub(crate) fn with_phase<R>(&self, f: impl FnOnce(&mut BackendPhase) -> R) -> R {
        f(&mut self.phase.lock())
    }

    pub fn completed_join(&self) -> bool {
        self.completed_join.load(Ordering::SeqCst)
    }

    pub(crate) fn complete_join(&self) {
        if !self.completed_join.swap(true, Ordering::SeqCst) {
            let mut phase = self.phase.lock();
            if *phase == BackendPhase::Unknown {
                *phase = BackendPhase::Vanilla;
                self.player.set_connection_type(ConnectionType::Vanilla);
            }
        }
    }

    pub fn graceful_disconnect(&self) -> bool {
        self.graceful_disconnect.load(Ordering::SeqCst)
    }

    pub(crate) fn record_ping(&self, id: i64) {
        self.last_ping_id.store(id, Ordering::SeqCst);
        *self.last_ping_sent.lock() = Some(Instant::now());
    }

    /// Clear the pending ping if `id` answers it.
    pub(crate) fn take_ping(&self, id: i64) -> Option<Duration> {
        if self
            .last_ping_id
            .compare_exchange(id, -1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        self.last_ping_sent.lock().take().map(|sent| sent.elapsed())
    }

    /// Resolve the pending connection request. Later results are dropped.
    pub(crate) fn complete_request(&self, result: RequestResult) -> bool {
        match self.request.lock().take() {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    pub(crate) fn has_pending_request(&self) -> bool {
        self.request.lock().is_some()
    }

    /// Close the backend connection on purpose.
    pub fn disconnect(&self) {
        self.graceful_disconnect.store(true, Ordering::SeqCst);
        if let Some(conn) = self.conn.write().take() {
            conn.set_known_disconnect();
            conn.close();
        }
        self.server.remove_player(self.player.id());
    }

    /// The address put into the backend handshake.
    fn handshake_address(&self) -> String {
        let player = &self.player;
        let proxy = player.proxy();
        let config = proxy.config();
        let inbound = player.inbound();
        let vhost = if inbound.virtual_host().is_empty() {
            self.server.info().host().to_string()
        } else {
            inbound.virtual_host().to_string()
        };
        let connection_type = player.connection_type();
        match config.forwarding.mode {
            ForwardingMode::Legacy => {
                let profile = connection_type.add_game_profile_tokens(player.profile().clone(), config.forwarding.mode);
                forwarding::legacy_address(&vhost, player.remote_addr().ip(), &profile)
            }
            ForwardingMode::BungeeGuard => {
                let profile = connection_type.add_game_profile_tokens(player.profile().clone(), config.forwarding.mode);
                let profile = forwarding::with_bungeeguard_token(&profile, &config.forwarding.bungeeguard_secret);
                forwarding::legacy_address(&vhost, player.remote_addr().ip(), &profile)
            }
            _ => match connection_type {
                ConnectionType::LegacyForge => format!("{}{}", vhost, forge::HANDSHAKE_HOSTNAME_TOKEN),
                ConnectionType::ModernForge => format!("{}{}", vhost, forge::modern_token(inbound.raw_virtual_host())),
                _ => vhost,
            },
        }
    }

    fn login_packet(&self) -> ServerLogin {
        let player = &self.player;
        let protocol = player.protocol();
        let mut login = ServerLogin::new(player.username());
        let velocity = player.proxy().config().forwarding.mode == ForwardingMode::Velocity;
        if protocol >= Protocol::V1_20_2 {
            login.holder_uuid = Some(player.id());
        } else if let Some(key) = player.identified_key() {
            if velocity && !key.has_expired() && protocol < Protocol::V1_19_3 {
                login.player_key = Some(key.to_data());
                login.holder_uuid = key.holder();
            }
        }
        login
    }

    /// Dial the backend and run the login. Resolves once the backend
    /// joined (or refused) the player.
    pub(crate) async fn connect(self: &Arc<Self>) -> RequestResult {
        let proxy = self.player.proxy().clone();
        let config = proxy.config();
        let addr = self.server.info().addr();
        debug!(player = %self.player, server = %self.server.name(), %addr, "connecting to backend");

        let mut stream = tokio::time::timeout(config.connection_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| ConnectError::Timeout)??;
        if config.proxy_protocol_backend {
            proxyproto::write_header(&mut stream, self.player.remote_addr()).await?;
        }
        let conn = Conn::new(stream, Direction::ClientBound, proxy.registries(), proxy.conn_config())?;
        conn.set_protocol(self.player.protocol());
        *self.conn.write() = Some(conn.clone());

        let (tx, rx) = oneshot::channel();
        *self.request.lock() = Some(tx);
        conn.set_session_handler(Session::BackendLogin(Arc::new(BackendLoginSession::new(self.clone()))))
            .await;

        conn.write_packet(Handshake {
            protocol_version: self.player.protocol().0,
            server_address: self.handshake_address(),
            port: self.server.info().port(),
            next_status: Intent::Login.as_next(),
        })
        .await?;
        conn.set_state(State::Login);
        conn.write_packet(self.login_packet()).await?;
        tokio::spawn(conn.clone().read_loop());

        let player_gone = self.player.conn().close_token();
        tokio::select! {
            result = rx => result.unwrap_or_else(|_| Err(ConnectError::Closed("login was abandoned".into()))),
            _ = player_gone.cancelled() => {
                self.disconnect();
                Err(ConnectError::Closed("player disconnected".into()))
            }
        }
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("server", &self.server.name())
            .field("player", &self.player.username())
            .finish()
    }
}
