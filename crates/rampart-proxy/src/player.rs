//! A logged-in player and its view of the backend servers.

use crate::backend::ServerConnection;
use crate::chat::ChatQueue;
use crate::crypto::IdentifiedKey;
use crate::events::{
    DisconnectEvent, LoginStatus, PermissionFn, PlayerClientBrandEvent, PlayerModInfoEvent,
    PlayerSettingsChangedEvent,
};
use crate::forge::ModInfo;
use crate::phase::{ClientPhase, ConnectionType};
use crate::proxy::Proxy;
use crate::server::RegisteredServer;
use crate::session::{Conn, Inbound, Session};
use crate::tablist::TabList;
use parking_lot::{Mutex, RwLock};
use rampart_protocol_core::{
    ClientSettings, Disconnect, FinishedUpdate, HeaderAndFooter, LegacyChat, LegacyTitle, Packet,
    PluginMessage, Protocol, StartUpdate, State, SystemChat, TitleClear,
};
use rampart_types::{GameProfile, TextComponent};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

/// Registered plugin channels kept per player.
pub const MAX_KNOWN_CHANNELS: usize = 1024;

#[derive(Default)]
struct Servers {
    connected: Option<Arc<ServerConnection>>,
    in_flight: Option<Arc<ServerConnection>>,
    servers_to_try: Option<Vec<String>>,
    try_index: usize,
}

pub struct ConnectedPlayer {
    proxy: Arc<Proxy>,
    conn: Arc<Conn>,
    inbound: Arc<Inbound>,
    profile: GameProfile,
    online_mode: bool,
    identified_key: Option<IdentifiedKey>,
    connection_type: Mutex<ConnectionType>,
    phase: Mutex<ClientPhase>,
    servers: Mutex<Servers>,
    known_channels: Mutex<HashSet<String>>,
    settings: Mutex<Option<ClientSettings>>,
    brand: Mutex<Option<String>>,
    mod_info: Mutex<Option<ModInfo>>,
    permission: RwLock<PermissionFn>,
    tab_list: TabList,
    login_plugin_messages: Mutex<VecDeque<PluginMessage>>,
    chat_queue: ChatQueue<Session>,
    config_ack: Mutex<Option<oneshot::Sender<()>>>,
    disconnect_due_to_duplicate: AtomicBool,
    spawned: AtomicBool,
    torn_down: AtomicBool,
}

impl ConnectedPlayer {
    pub(crate) fn new(
        proxy: Arc<Proxy>,
        inbound: Arc<Inbound>,
        profile: GameProfile,
        online_mode: bool,
        identified_key: Option<IdentifiedKey>,
    ) -> Self {
        let connection_type = inbound.connection_type();
        Self {
            proxy,
            conn: inbound.conn().clone(),
            profile,
            online_mode,
            identified_key,
            connection_type: Mutex::new(connection_type),
            phase: Mutex::new(connection_type.initial_client_phase()),
            servers: Mutex::new(Servers::default()),
            known_channels: Mutex::new(HashSet::new()),
            settings: Mutex::new(None),
            brand: Mutex::new(None),
            mod_info: Mutex::new(None),
            permission: RwLock::new(Arc::new(|_: &str| false)),
            tab_list: TabList::new(),
            login_plugin_messages: Mutex::new(VecDeque::new()),
            chat_queue: ChatQueue::spawn(),
            config_ack: Mutex::new(None),
            disconnect_due_to_duplicate: AtomicBool::new(false),
            spawned: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            inbound,
        }
    }

    pub fn proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }

    pub fn conn(&self) -> &Arc<Conn> {
        &self.conn
    }

    pub fn inbound(&self) -> &Arc<Inbound> {
        &self.inbound
    }

    pub fn id(&self) -> Uuid {
        self.profile.uuid
    }

    pub fn username(&self) -> &str {
        &self.profile.name
    }

    pub fn profile(&self) -> &GameProfile {
        &self.profile
    }

    pub fn protocol(&self) -> Protocol {
        self.conn.protocol()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.conn.remote_addr()
    }

    pub fn virtual_host(&self) -> &str {
        self.inbound.virtual_host()
    }

    pub fn online_mode(&self) -> bool {
        self.online_mode
    }

    pub fn identified_key(&self) -> Option<&IdentifiedKey> {
        self.identified_key.as_ref()
    }

    pub fn active(&self) -> bool {
        !self.conn.is_closed()
    }

    pub fn connection_type(&self) -> ConnectionType {
        *self.connection_type.lock()
    }

    pub(crate) fn set_connection_type(&self, connection_type: ConnectionType) {
        *self.connection_type.lock() = connection_type;
    }

    pub(crate) fn with_phase<R>(&self, f: impl FnOnce(&mut ClientPhase) -> R) -> R {
        f(&mut self.phase.lock())
    }

    pub fn phase(&self) -> ClientPhase {
        *self.phase.lock()
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        let check = self.permission.read().clone();
        check(permission)
    }

    pub(crate) fn set_permission(&self, permission: PermissionFn) {
        *self.permission.write() = permission;
    }

    pub fn tab_list(&self) -> &TabList {
        &self.tab_list
    }

    pub(crate) fn chat_queue(&self) -> &ChatQueue<Session> {
        &self.chat_queue
    }

    // Server slots

    pub fn connected_server(&self) -> Option<Arc<ServerConnection>> {
        self.servers.lock().connected.clone()
    }

    pub fn connection_in_flight(&self) -> Option<Arc<ServerConnection>> {
        self.servers.lock().in_flight.clone()
    }

    /// The server the player is currently playing on.
    pub fn current_server(&self) -> Option<Arc<RegisteredServer>> {
        self.connected_server().map(|s| s.server().clone())
    }

    pub(crate) fn set_in_flight(&self, conn: Option<Arc<ServerConnection>>) {
        self.servers.lock().in_flight = conn;
    }

    /// Clear the in-flight slot if it still points at `conn`.
    pub(crate) fn reset_in_flight_if(&self, conn: &Arc<ServerConnection>) {
        let mut servers = self.servers.lock();
        if servers.in_flight.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)) {
            servers.in_flight = None;
        }
    }

    /// Promote `conn` to the connected server after its join completed.
    pub(crate) fn set_connected_server(&self, conn: Option<Arc<ServerConnection>>) {
        let previous = {
            let mut servers = self.servers.lock();
            if let (Some(new), Some(in_flight)) = (&conn, &servers.in_flight) {
                if Arc::ptr_eq(new, in_flight) {
                    servers.in_flight = None;
                }
            }
            // a fresh connect resets failover state
            servers.servers_to_try = None;
            servers.try_index = 0;
            std::mem::replace(&mut servers.connected, conn.clone())
        };
        if let Some(previous) = previous {
            previous.server().remove_player(self.id());
        }
    }

    pub(crate) fn clear_connected_if(&self, conn: &Arc<ServerConnection>) {
        let mut servers = self.servers.lock();
        if servers.connected.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)) {
            servers.connected = None;
        }
    }

    /// Next server to fall back to, skipping the one the player is on and
    /// the one it is connecting to. Forced hosts for the virtual host take
    /// precedence over the `try` list.
    pub fn next_server_to_try(&self, exclude: Option<&RegisteredServer>) -> Option<Arc<RegisteredServer>> {
        let (list, start, connected, in_flight) = {
            let mut servers = self.servers.lock();
            if servers.servers_to_try.is_none() {
                let config = self.proxy.config();
                let list = config
                    .forced_host(self.virtual_host())
                    .filter(|l| !l.is_empty())
                    .cloned()
                    .unwrap_or_else(|| config.try_servers.clone());
                servers.servers_to_try = Some(list);
            }
            (
                servers.servers_to_try.clone().unwrap_or_default(),
                servers.try_index,
                servers.connected.as_ref().map(|c| c.server().name().to_string()),
                servers.in_flight.as_ref().map(|c| c.server().name().to_string()),
            )
        };
        let skip = |name: &str| {
            exclude.is_some_and(|s| s.name().eq_ignore_ascii_case(name))
                || connected.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(name))
                || in_flight.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(name))
        };
        for (i, name) in list.iter().enumerate().skip(start) {
            if skip(name) {
                continue;
            }
            self.servers.lock().try_index = i + 1;
            if let Some(server) = self.proxy.server(name) {
                return Some(server);
            }
        }
        None
    }

    // Client data

    pub fn known_channels(&self) -> Vec<String> {
        self.known_channels.lock().iter().cloned().collect()
    }

    /// Add channels up to the cap; returns the ones that were new.
    pub(crate) fn add_channels(&self, channels: &[String]) -> Vec<String> {
        let mut known = self.known_channels.lock();
        let mut added = Vec::new();
        for channel in channels {
            if known.len() >= MAX_KNOWN_CHANNELS {
                debug!(player = %self, "plugin channel limit reached");
                break;
            }
            if known.insert(channel.clone()) {
                added.push(channel.clone());
            }
        }
        added
    }

    pub(crate) fn remove_channels(&self, channels: &[String]) -> Vec<String> {
        let mut known = self.known_channels.lock();
        channels.iter().filter(|c| known.remove(*c)).cloned().collect()
    }

    pub fn settings(&self) -> Option<ClientSettings> {
        self.settings.lock().clone()
    }

    pub(crate) fn set_settings(self: &Arc<Self>, settings: ClientSettings) {
        *self.settings.lock() = Some(settings.clone());
        self.proxy.events().fire_and_forget(PlayerSettingsChangedEvent {
            player: self.clone(),
            settings,
        });
    }

    pub fn client_brand(&self) -> Option<String> {
        self.brand.lock().clone()
    }

    pub(crate) fn set_client_brand(self: &Arc<Self>, brand: String) {
        *self.brand.lock() = Some(brand.clone());
        self.proxy.events().fire_and_forget(PlayerClientBrandEvent {
            player: self.clone(),
            brand,
        });
    }

    pub fn mod_info(&self) -> Option<ModInfo> {
        self.mod_info.lock().clone()
    }

    pub(crate) fn set_mod_info(self: &Arc<Self>, mod_info: ModInfo) {
        *self.mod_info.lock() = Some(mod_info.clone());
        self.proxy.events().fire_and_forget(PlayerModInfoEvent {
            player: self.clone(),
            mod_info,
        });
    }

    /// Hold a plugin message until the next backend finished joining.
    pub(crate) fn queue_plugin_message(&self, msg: PluginMessage) {
        self.login_plugin_messages.lock().push_back(msg);
    }

    pub(crate) fn drain_plugin_messages(&self) -> Vec<PluginMessage> {
        self.login_plugin_messages.lock().drain(..).collect()
    }

    // Outbound

    pub async fn send_message(&self, message: &TextComponent) {
        let packet: Packet = if self.protocol() >= Protocol::V1_19 {
            SystemChat {
                component: message.into(),
                overlay: false,
            }
            .into()
        } else {
            let mut chat = LegacyChat::new(message.to_json());
            chat.position = 1;
            chat.into()
        };
        if let Err(e) = self.conn.write_packet(packet).await {
            debug!(player = %self, "could not send message: {}", e);
        }
    }

    pub async fn send_plugin_message(&self, channel: &str, data: Vec<u8>) -> bool {
        self.conn.write_packet(PluginMessage::new(channel, data)).await.is_ok()
    }

    /// Kick the player with `reason`.
    pub async fn disconnect(&self, reason: &TextComponent) {
        if !self.active() {
            return;
        }
        info!(player = %self, "disconnected by proxy: {}", reason.plain_text());
        self.conn.close_with(Disconnect::from_text(reason)).await;
    }

    /// Clear per-server client state after leaving a backend.
    pub(crate) fn reset_server_state(&self) -> Vec<Packet> {
        let protocol = self.protocol();
        let mut packets = self.tab_list.clear_packets(protocol);
        packets.extend(self.tab_list.clear_boss_bars());
        if protocol >= Protocol::V1_8 {
            packets.push(HeaderAndFooter::reset().into());
        }
        packets
    }

    pub(crate) fn reset_title_packet(&self) -> Option<Packet> {
        let protocol = self.protocol();
        if protocol >= Protocol::V1_17 {
            Some(TitleClear { reset: true }.into())
        } else if protocol >= Protocol::V1_8 {
            Some(LegacyTitle::reset().into())
        } else {
            None
        }
    }

    /// Move the client back into the config state (1.20.2+). The receiver
    /// completes when the client acknowledged the switch.
    pub(crate) async fn switch_to_config(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.config_ack.lock() = Some(tx);
        let mut packets = self.reset_server_state();
        if let Some(reset) = self.reset_title_packet() {
            packets.push(reset);
        }
        packets.push(StartUpdate.into());
        if let Err(e) = self.conn.write_packets(packets).await {
            debug!(player = %self, "could not start config re-entry: {}", e);
        }
        self.conn.set_writer_state(State::Config);
        rx
    }

    /// The client acknowledged entering config.
    pub(crate) fn config_acknowledged(&self) {
        if let Some(tx) = self.config_ack.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Finish config on the client side; completes when the client replied
    /// with its own `FinishedUpdate`. Play packets held during config follow
    /// right behind it, ahead of anything written later.
    pub(crate) async fn finish_config(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.config_ack.lock() = Some(tx);
        if let Err(e) = self.conn.write_packet(FinishedUpdate).await {
            debug!(player = %self, "could not finish config: {}", e);
        }
        self.conn.set_writer_state(State::Play);
        if let Err(e) = self.conn.flush_play_queue().await {
            debug!(player = %self, "could not flush held play packets: {}", e);
        }
        rx
    }

    /// Record that the client has a world loaded. Returns false the first
    /// time.
    pub(crate) fn mark_spawned(&self) -> bool {
        self.spawned.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn mark_duplicate_disconnect(&self) {
        self.disconnect_due_to_duplicate.store(true, Ordering::SeqCst);
    }

    /// Release everything the player holds. Runs once.
    pub(crate) async fn teardown(self: &Arc<Self>) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let (connected, in_flight) = {
            let mut servers = self.servers.lock();
            (servers.connected.take(), servers.in_flight.take())
        };
        for server in connected.into_iter().chain(in_flight) {
            server.disconnect();
        }
        let status = if self.proxy.unregister_connection(self) {
            if self.disconnect_due_to_duplicate.load(Ordering::SeqCst) {
                LoginStatus::ConflictingLogin
            } else {
                LoginStatus::Successful
            }
        } else if self.conn.known_disconnect() {
            LoginStatus::CanceledByProxy
        } else {
            LoginStatus::CanceledByUser
        };
        info!(player = %self, ?status, "player disconnected");
        let mut event = DisconnectEvent {
            player: self.clone(),
            login_status: status,
        };
        self.proxy.events().fire(&mut event);
        self.config_ack.lock().take();
    }
}

impl fmt::Display for ConnectedPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.profile.name)
    }
}

impl fmt::Debug for ConnectedPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedPlayer")
            .field("name", &self.profile.name)
            .field("id", &self.profile.uuid)
            .field("addr", &self.conn.remote_addr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use rampart_protocol_core::{Direction, KeepAlive};
    use std::time::Duration;

    fn chat(text: &str) -> SystemChat {
        SystemChat {
            component: TextComponent::plain(text).into(),
            overlay: false,
        }
    }

    #[tokio::test]
    async fn test_held_play_packets_follow_finish_config() {
        let proxy = Proxy::new(test_support::config(&[])).unwrap();
        let (player, client) = test_support::player(&proxy, Protocol::V1_20_3, "play.example.com").await;
        player.conn().set_state(State::Config);
        let (_client, mut rx) =
            test_support::capture(client, Direction::ClientBound, Protocol::V1_20_3, State::Config).await;

        for text in ["one", "two", "three"] {
            player.conn().write_packet(chat(text)).await.unwrap();
        }
        player.conn().write_packet(KeepAlive { random_id: 9 }).await.unwrap();
        let _ack = player.finish_config().await;
        player.conn().write_packet(chat("four")).await.unwrap();

        let mut seen = Vec::new();
        while seen.len() < 6 {
            let pc = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(match pc.packet {
                Some(Packet::KeepAlive(k)) => format!("keep-alive {}", k.random_id),
                Some(Packet::FinishedUpdate(_)) => "finished".to_string(),
                Some(Packet::SystemChat(c)) => c.component.to_text().plain_text(),
                other => panic!("unexpected {:?}", other),
            });
        }
        assert_eq!(seen, ["keep-alive 9", "finished", "one", "two", "three", "four"]);
    }
}
