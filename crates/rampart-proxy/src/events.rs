//! Events fired by the proxy. Handlers subscribe through
//! [`rampart_events::EventBus`] and may rewrite the public result fields.

use crate::forge::ModInfo;
use crate::player::ConnectedPlayer;
use crate::server::RegisteredServer;
use crate::session::status::ServerPing;
use crate::session::Inbound;
use rampart_events::Event;
use rampart_protocol_core::{ClientSettings, Intent};
use rampart_types::{GameProfile, TextComponent};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

/// A status request. Clearing `ping` closes the connection without an answer.
pub struct PingEvent {
    pub inbound: Arc<Inbound>,
    pub ping: Option<ServerPing>,
}

pub struct ConnectionHandshakeEvent {
    pub inbound: Arc<Inbound>,
    pub intent: Intent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreLoginResult {
    Allowed,
    Denied(TextComponent),
    ForceOnlineMode,
    ForceOfflineMode,
}

pub struct PreLoginEvent {
    pub inbound: Arc<Inbound>,
    /// The name used from here on; handlers may rewrite it.
    pub username: String,
    pub original_username: String,
    pub id: Option<Uuid>,
    pub result: PreLoginResult,
    login_plugin_messages: Vec<(String, Vec<u8>)>,
}

impl PreLoginEvent {
    pub fn new(inbound: Arc<Inbound>, username: String, id: Option<Uuid>) -> Self {
        Self {
            inbound,
            original_username: username.clone(),
            username,
            id,
            result: PreLoginResult::Allowed,
            login_plugin_messages: Vec::new(),
        }
    }

    pub fn deny(&mut self, reason: TextComponent) {
        self.result = PreLoginResult::Denied(reason);
    }

    /// Send a login plugin message to the client before login continues.
    /// Only clients on 1.13 and newer understand these.
    pub fn queue_login_plugin_message(&mut self, channel: impl Into<String>, data: Vec<u8>) {
        self.login_plugin_messages.push((channel.into(), data));
    }

    pub fn take_login_plugin_messages(&mut self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut self.login_plugin_messages)
    }
}

pub struct GameProfileRequestEvent {
    pub inbound: Arc<Inbound>,
    pub original: GameProfile,
    pub online_mode: bool,
    /// Replacement profile, for example with another skin.
    pub profile: Option<GameProfile>,
}

impl GameProfileRequestEvent {
    pub fn game_profile(&self) -> &GameProfile {
        self.profile.as_ref().unwrap_or(&self.original)
    }
}

pub type PermissionFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub struct PermissionsSetupEvent {
    pub player: Arc<ConnectedPlayer>,
    pub permission: PermissionFn,
}

pub struct LoginEvent {
    pub player: Arc<ConnectedPlayer>,
    pub denied: Option<TextComponent>,
}

pub struct PostLoginEvent {
    pub player: Arc<ConnectedPlayer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    Successful,
    ConflictingLogin,
    CanceledByUser,
    CanceledByProxy,
    CanceledByUserBeforeComplete,
}

pub struct DisconnectEvent {
    pub player: Arc<ConnectedPlayer>,
    pub login_status: LoginStatus,
}

pub struct PlayerChooseInitialServerEvent {
    pub player: Arc<ConnectedPlayer>,
    pub initial_server: Option<Arc<RegisteredServer>>,
}

/// Set `server` to `None` to cancel, or to another server to redirect.
pub struct ServerPreConnectEvent {
    pub player: Arc<ConnectedPlayer>,
    pub original: Arc<RegisteredServer>,
    pub server: Option<Arc<RegisteredServer>>,
}

pub struct ServerConnectedEvent {
    pub player: Arc<ConnectedPlayer>,
    pub server: Arc<RegisteredServer>,
    pub previous: Option<Arc<RegisteredServer>>,
    pub entity_id: i32,
}

pub struct ServerPostConnectEvent {
    pub player: Arc<ConnectedPlayer>,
    pub previous: Option<Arc<RegisteredServer>>,
}

#[derive(Clone)]
pub enum KickResult {
    DisconnectPlayer(TextComponent),
    RedirectPlayer {
        server: Arc<RegisteredServer>,
        message: Option<TextComponent>,
    },
    /// Only tell the player; they stay where they are.
    Notify(TextComponent),
}

pub struct KickedFromServerEvent {
    pub player: Arc<ConnectedPlayer>,
    pub server: Arc<RegisteredServer>,
    pub original_reason: Option<TextComponent>,
    pub during_server_connect: bool,
    pub result: KickResult,
}

#[derive(Clone)]
pub enum MessageEndpoint {
    Player(Arc<ConnectedPlayer>),
    Server(Arc<RegisteredServer>),
}

/// A plugin message passing through the proxy. Set `forward` to false to
/// swallow it.
pub struct PluginMessageEvent {
    pub source: MessageEndpoint,
    pub target: MessageEndpoint,
    pub identifier: String,
    pub data: Vec<u8>,
    pub forward: bool,
}

pub struct PlayerSettingsChangedEvent {
    pub player: Arc<ConnectedPlayer>,
    pub settings: ClientSettings,
}

pub struct PlayerClientBrandEvent {
    pub player: Arc<ConnectedPlayer>,
    pub brand: String,
}

pub struct PlayerModInfoEvent {
    pub player: Arc<ConnectedPlayer>,
    pub mod_info: ModInfo,
}

pub struct PlayerChatEvent {
    pub player: Arc<ConnectedPlayer>,
    pub original: String,
    pub message: String,
    pub denied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Send this command line to the backend.
    Forward(String),
    /// A proxy plugin took care of it.
    Handled,
    Denied,
}

pub struct CommandExecuteEvent {
    pub player: Arc<ConnectedPlayer>,
    /// Without the leading slash.
    pub command: String,
    pub result: CommandResult,
}

pub struct PreTransferEvent {
    pub player: Arc<ConnectedPlayer>,
    pub host: String,
    pub port: i32,
    pub denied: bool,
}

pub struct PreShutdownEvent {
    pub reason: TextComponent,
}

pub struct ShutdownEvent;

pub struct ReadyEvent {
    pub addr: SocketAddr,
}

pub struct ServerRegisteredEvent {
    pub server: Arc<RegisteredServer>,
}

pub struct ServerUnregisteredEvent {
    pub server: Arc<RegisteredServer>,
}

pub struct PlayerChannelRegisterEvent {
    pub player: Arc<ConnectedPlayer>,
    pub channels: Vec<String>,
}

pub struct PlayerChannelUnregisterEvent {
    pub player: Arc<ConnectedPlayer>,
    pub channels: Vec<String>,
}

/// A login plugin message from a backend that the proxy does not answer
/// itself. Setting `reply` answers it successfully with that payload.
pub struct ServerLoginPluginMessageEvent {
    pub player: Arc<ConnectedPlayer>,
    pub server: Arc<RegisteredServer>,
    pub id: i32,
    pub channel: String,
    pub data: Vec<u8>,
    pub reply: Option<Vec<u8>>,
}

pub struct CookieReceiveEvent {
    pub inbound: Arc<Inbound>,
    pub player: Option<Arc<ConnectedPlayer>>,
    pub key: String,
    pub payload: Option<Vec<u8>>,
    pub forward: bool,
}

pub struct CookieStoreEvent {
    pub player: Arc<ConnectedPlayer>,
    pub key: String,
    pub payload: Vec<u8>,
    pub forward: bool,
}

pub struct CookieRequestEvent {
    pub player: Arc<ConnectedPlayer>,
    pub key: String,
    pub forward: bool,
}

pub struct PlayerResourcePackStatusEvent {
    pub player: Arc<ConnectedPlayer>,
    pub id: Option<Uuid>,
    pub status: i32,
}

macro_rules! events {
    ($($name:ident),* $(,)?) => {
        $(impl Event for $name {})*
    };
}

events! {
    PingEvent,
    ConnectionHandshakeEvent,
    PreLoginEvent,
    GameProfileRequestEvent,
    PermissionsSetupEvent,
    LoginEvent,
    PostLoginEvent,
    DisconnectEvent,
    PlayerChooseInitialServerEvent,
    ServerPreConnectEvent,
    ServerConnectedEvent,
    ServerPostConnectEvent,
    KickedFromServerEvent,
    PluginMessageEvent,
    PlayerSettingsChangedEvent,
    PlayerClientBrandEvent,
    PlayerModInfoEvent,
    PlayerChatEvent,
    CommandExecuteEvent,
    PreTransferEvent,
    PreShutdownEvent,
    ShutdownEvent,
    ReadyEvent,
    ServerRegisteredEvent,
    ServerUnregisteredEvent,
    PlayerChannelRegisterEvent,
    PlayerChannelUnregisterEvent,
    ServerLoginPluginMessageEvent,
    CookieReceiveEvent,
    CookieStoreEvent,
    CookieRequestEvent,
    PlayerResourcePackStatusEvent,
}
