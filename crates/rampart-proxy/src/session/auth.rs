use super::client_config::ClientConfigSession;
use super::initial_connect::InitialConnectSession;
use super::{Inbound, Session};
use crate::config::ForwardingMode;
use crate::crypto::IdentifiedKey;
use crate::events::{
    CookieReceiveEvent, DisconnectEvent, GameProfileRequestEvent, LoginEvent, LoginStatus, PermissionsSetupEvent,
    PlayerChooseInitialServerEvent, PostLoginEvent,
};
use crate::forge::ForgeLoginRelay;
use crate::messages;
use crate::phase::ConnectionType;
use crate::player::ConnectedPlayer;
use crate::proxy::Proxy;
use parking_lot::Mutex;
use rampart_protocol_core::{
    CookieResponse, Disconnect, LoginPluginMessage, LoginPluginResponse, Packet, PacketContext, Protocol,
    ServerLoginSuccess, SetCompression, State,
};
use rampart_types::{offline_uuid, GameProfile, TextComponent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

/// Turns a verified profile into a registered player and sends
/// `LoginSuccess`.
///
/// Modern Forge clients are held in login until a backend accepted them, so
/// the backend's `fml:`/`forge:` login queries can be answered by the client.
pub struct AuthSession {
    proxy: Arc<Proxy>,
    inbound: Arc<Inbound>,
    profile: GameProfile,
    online_mode: bool,
    identified_key: Mutex<Option<IdentifiedKey>>,
    player: Mutex<Option<Arc<ConnectedPlayer>>>,
    awaiting_ack: AtomicBool,
    forge_relay: Option<ForgeLoginRelay>,
    held: AtomicBool,
    held_ack: Mutex<Option<oneshot::Sender<()>>>,
}

impl AuthSession {
    pub fn new(
        proxy: Arc<Proxy>,
        inbound: Arc<Inbound>,
        profile: GameProfile,
        online_mode: bool,
        identified_key: Option<IdentifiedKey>,
    ) -> Self {
        let forge_relay = (inbound.connection_type() == ConnectionType::ModernForge).then(ForgeLoginRelay::new);
        Self {
            proxy,
            inbound,
            profile,
            online_mode,
            identified_key: Mutex::new(identified_key),
            player: Mutex::new(None),
            awaiting_ack: AtomicBool::new(false),
            forge_relay,
            held: AtomicBool::new(false),
            held_ack: Mutex::new(None),
        }
    }

    async fn kick(&self, reason: TextComponent) {
        self.inbound.conn().close_with(Disconnect::from_text(&reason)).await;
    }

    /// Runs once, right after the session was installed.
    pub async fn start(self: Arc<Self>) {
        let conn = self.inbound.conn().clone();
        if conn.is_closed() {
            return;
        }
        let config = self.proxy.config();
        let protocol = self.inbound.protocol();

        let profile = self
            .inbound
            .connection_type()
            .add_game_profile_tokens(self.profile.clone(), config.forwarding.mode);
        let mut event = GameProfileRequestEvent {
            inbound: self.inbound.clone(),
            original: profile,
            online_mode: self.online_mode,
            profile: None,
        };
        self.proxy.events().fire(&mut event);
        let profile = event.game_profile().clone();

        let mut key = self.identified_key.lock().take();
        if let Some(key) = key.as_mut() {
            if !key.internal_add_holder(profile.uuid) {
                self.kick(messages::translatable("multiplayer.disconnect.invalid_public_key", Vec::new()))
                    .await;
                return;
            }
        }

        let player = Arc::new(ConnectedPlayer::new(
            self.proxy.clone(),
            self.inbound.clone(),
            profile,
            self.online_mode,
            key,
        ));
        if !self.proxy.can_register_connection(&player) {
            self.kick(messages::already_connected()).await;
            return;
        }
        info!(player = %player, addr = %player.remote_addr(), online_mode = self.online_mode, "player has connected");

        let mut permissions = PermissionsSetupEvent {
            player: player.clone(),
            permission: Arc::new(|_: &str| false),
        };
        self.proxy.events().fire(&mut permissions);
        player.set_permission(permissions.permission);

        let threshold = config.compression.threshold;
        if threshold >= 0 && protocol >= Protocol::V1_8 {
            if let Err(e) = conn.write_packet(SetCompression { threshold }).await {
                debug!(player = %player, "could not enable compression: {}", e);
                return;
            }
            conn.set_compression_threshold(threshold).await;
        }

        let mut login = LoginEvent {
            player: player.clone(),
            denied: None,
        };
        self.proxy.events().fire(&mut login);
        if conn.is_closed() {
            self.proxy.events().fire(&mut DisconnectEvent {
                player,
                login_status: LoginStatus::CanceledByUserBeforeComplete,
            });
            return;
        }
        if let Some(reason) = login.denied {
            player.disconnect(&reason).await;
            return;
        }

        if !self.proxy.register_connection(&player).await {
            player.disconnect(&messages::already_connected()).await;
            return;
        }
        *self.player.lock() = Some(player.clone());

        if self.forge_relay.is_some() {
            info!(player = %player, "modern Forge client, holding login until a backend accepts it");
            self.held.store(true, Ordering::SeqCst);
            self.post_login(player).await;
            return;
        }

        if protocol >= Protocol::V1_20_2 {
            self.awaiting_ack.store(true, Ordering::SeqCst);
        }
        if let Err(e) = conn.write_packet(self.login_success(&player)).await {
            debug!(player = %player, "could not send login success: {}", e);
            return;
        }
        if protocol >= Protocol::V1_20_2 {
            return;
        }
        conn.set_state(State::Play);
        conn.set_session_handler(Session::InitialConnect(Arc::new(InitialConnectSession::new(player.clone()))))
            .await;
        self.post_login(player).await;
    }

    pub async fn handle(self: Arc<Self>, pc: PacketContext) {
        match pc.packet {
            Some(Packet::LoginAcknowledged(_)) if self.awaiting_ack.swap(false, Ordering::SeqCst) => {
                self.login_acknowledged().await
            }
            Some(Packet::CookieResponse(cookie)) => self.handle_cookie(cookie),
            Some(Packet::LoginPluginResponse(response)) => {
                let id = response.id;
                let relayed = self.forge_relay.as_ref().is_some_and(|relay| relay.complete(response));
                if !relayed {
                    trace!(addr = %self.inbound.remote_addr(), id, "ignoring unexpected login plugin response");
                }
            }
            _ => {
                self.kick(messages::translatable("multiplayer.disconnect.invalid_player_data", Vec::new()))
                    .await
            }
        }
    }

    async fn login_acknowledged(&self) {
        let Some(player) = self.player.lock().clone() else {
            return;
        };
        let conn = self.inbound.conn();
        conn.set_state(State::Config);
        conn.set_session_handler(Session::ClientConfig(Arc::new(ClientConfigSession::new(player.clone()))))
            .await;
        let held_ack = self.held_ack.lock().take();
        match held_ack {
            // the backend is already logged in and waits for this
            Some(tx) => {
                let _ = tx.send(());
            }
            None => self.post_login(player).await,
        }
    }

    fn login_success(&self, player: &ConnectedPlayer) -> ServerLoginSuccess {
        let uuid = if self.proxy.config().forwarding.mode == ForwardingMode::None {
            offline_uuid(player.username())
        } else {
            player.id()
        };
        ServerLoginSuccess {
            uuid,
            username: player.username().to_string(),
            properties: player.profile().properties.clone(),
        }
    }

    /// Whether the client is still in login waiting for a backend.
    pub(crate) fn holds_login(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Pass a backend's Forge login query to the client unchanged. The
    /// receiver yields the client's answer for the same id.
    pub(crate) async fn relay_login_query(
        &self,
        query: LoginPluginMessage,
    ) -> Option<oneshot::Receiver<LoginPluginResponse>> {
        let relay = self.forge_relay.as_ref().filter(|_| self.holds_login())?;
        let answer = relay.register(query.id);
        trace!(addr = %self.inbound.remote_addr(), id = query.id, channel = %query.channel, "relaying forge login query");
        match self.inbound.conn().write_packet(query).await {
            Ok(()) => Some(answer),
            Err(e) => {
                debug!(addr = %self.inbound.remote_addr(), "could not relay forge login query: {}", e);
                None
            }
        }
    }

    /// A backend accepted the held client: finish the client's login. The
    /// receiver completes once the client may receive backend traffic,
    /// which on 1.20.2+ is after its `LoginAcknowledged`.
    pub(crate) async fn release_held_login(&self) -> Option<oneshot::Receiver<()>> {
        if !self.held.swap(false, Ordering::SeqCst) {
            return None;
        }
        if let Some(relay) = &self.forge_relay {
            relay.clear();
        }
        let player = self.player.lock().clone()?;
        let conn = self.inbound.conn();
        let (tx, rx) = oneshot::channel();
        if self.inbound.protocol() >= Protocol::V1_20_2 {
            *self.held_ack.lock() = Some(tx);
            self.awaiting_ack.store(true, Ordering::SeqCst);
            if let Err(e) = conn.write_packet(self.login_success(&player)).await {
                debug!(player = %player, "could not send login success: {}", e);
                return None;
            }
            return Some(rx);
        }
        if let Err(e) = conn.write_packet(self.login_success(&player)).await {
            debug!(player = %player, "could not send login success: {}", e);
            return None;
        }
        conn.set_state(State::Play);
        conn.set_session_handler(Session::InitialConnect(Arc::new(InitialConnectSession::new(player))))
            .await;
        let _ = tx.send(());
        Some(rx)
    }

    async fn post_login(&self, player: Arc<ConnectedPlayer>) {
        self.proxy.events().fire(&mut PostLoginEvent { player: player.clone() });
        connect_to_initial_server(&player).await;
    }

    fn handle_cookie(&self, cookie: CookieResponse) {
        let mut event = CookieReceiveEvent {
            inbound: self.inbound.clone(),
            player: self.player.lock().clone(),
            key: cookie.key,
            payload: cookie.payload,
            forward: false,
        };
        self.proxy.events().fire(&mut event);
    }

    pub async fn disconnected(self: Arc<Self>) {
        if let Some(relay) = &self.forge_relay {
            relay.clear();
        }
        self.held_ack.lock().take();
        let player = self.player.lock().take();
        if let Some(player) = player {
            player.teardown().await;
        }
    }
}

/// Pick the first server for a freshly logged-in player and connect in the
/// background.
pub(crate) async fn connect_to_initial_server(player: &Arc<ConnectedPlayer>) {
    let mut event = PlayerChooseInitialServerEvent {
        player: player.clone(),
        initial_server: player.next_server_to_try(None),
    };
    player.proxy().events().fire(&mut event);
    if !player.active() {
        return;
    }
    match event.initial_server {
        Some(server) => player.create_connection_request(server).fire_and_forget(),
        None => player.disconnect(&messages::no_available_servers()).await,
    }
}
