use super::client_config::ClientConfigSession;
use super::{forward_keep_alive, forward_packet_to_server, Conn, Session};
use crate::crypto::KeyRevision;
use crate::events::{
    CommandExecuteEvent, CommandResult, CookieReceiveEvent, MessageEndpoint, PlayerChannelRegisterEvent,
    PlayerChannelUnregisterEvent, PlayerChatEvent, PlayerResourcePackStatusEvent, PluginMessageEvent,
};
use crate::messages;
use crate::phase::BackendPhase;
use crate::player::ConnectedPlayer;
use crate::plugin_message;
use bytes::{BufMut, BytesMut};
use rampart_protocol_core::channel;
use rampart_protocol_core::{
    write_varint, ChatAcknowledgement, CookieResponse, KeyedPlayerChat, KeyedPlayerCommand, LastSeenMessages,
    LegacyChat, Packet, PacketContext, PluginMessage, Protocol, ResourcePackResponse, SessionPlayerChat,
    SessionPlayerCommand, State, UnsignedPlayerCommand,
};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Characters the vanilla server refuses in chat.
pub fn contains_illegal_characters(message: &str) -> bool {
    message.chars().any(|c| c == '\u{a7}' || c < ' ' || c == '\u{7f}')
}

/// Salt, empty signature block and preview flag of an unsigned 1.19 -
/// 1.19.2 chat or command packet.
fn unsigned_keyed_tail(protocol: Protocol) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_i64(0);
    write_varint(&mut buf, 0);
    buf.put_u8(0);
    if protocol >= Protocol::V1_19_1 {
        write_varint(&mut buf, 0);
        buf.put_u8(0);
    }
    buf.to_vec()
}

/// A chat or command the client sent, normalised across versions.
enum ClientChat {
    Legacy(LegacyChat),
    Keyed(KeyedPlayerChat),
    Session(SessionPlayerChat),
}

enum ClientCommand {
    Legacy(String),
    Keyed(KeyedPlayerCommand),
    Session(SessionPlayerCommand),
    Unsigned(UnsignedPlayerCommand),
}

impl ClientCommand {
    fn command(&self) -> &str {
        match self {
            ClientCommand::Legacy(c) => c,
            ClientCommand::Keyed(p) => &p.command,
            ClientCommand::Session(p) => &p.command,
            ClientCommand::Unsigned(p) => &p.command,
        }
    }

    fn last_seen(&self) -> Option<LastSeenMessages> {
        match self {
            ClientCommand::Session(p) => Some(p.last_seen),
            _ => None,
        }
    }

    fn timestamp(&self) -> Option<i64> {
        match self {
            ClientCommand::Keyed(p) => Some(p.timestamp),
            ClientCommand::Session(p) => Some(p.timestamp),
            _ => None,
        }
    }
}

/// The terminal client handler; lives across server switches.
pub struct ClientPlaySession {
    player: Arc<ConnectedPlayer>,
}

impl ClientPlaySession {
    pub fn new(player: Arc<ConnectedPlayer>) -> Self {
        Self { player }
    }

    pub async fn handle(self: Arc<Self>, pc: PacketContext) {
        let Some(packet) = pc.packet.clone() else {
            self.forward_if_ready(&pc).await;
            return;
        };
        match packet {
            Packet::KeepAlive(keep_alive) => forward_keep_alive(&self.player, keep_alive).await,
            Packet::LegacyChat(chat) => match chat.message.strip_prefix('/') {
                Some(command) => {
                    let command = ClientCommand::Legacy(command.to_string());
                    self.handle_command(command).await
                }
                None => self.handle_chat(ClientChat::Legacy(chat)).await,
            },
            Packet::KeyedPlayerChat(chat) => self.handle_chat(ClientChat::Keyed(chat)).await,
            Packet::SessionPlayerChat(chat) => self.handle_chat(ClientChat::Session(chat)).await,
            Packet::KeyedPlayerCommand(command) => self.handle_command(ClientCommand::Keyed(command)).await,
            Packet::SessionPlayerCommand(command) => self.handle_command(ClientCommand::Session(command)).await,
            Packet::UnsignedPlayerCommand(command) => self.handle_command(ClientCommand::Unsigned(command)).await,
            Packet::ChatAcknowledgement(ack) => {
                if let Some(backend) = self.backend() {
                    self.player.chat_queue().handle_acknowledgement(backend, ack.offset);
                }
            }
            Packet::PluginMessage(msg) => self.handle_plugin_message(msg).await,
            Packet::ClientSettings(settings) => {
                self.player.set_settings(settings);
                self.forward_if_ready(&pc).await;
            }
            Packet::FinishedUpdate(_) => self.handle_config_acknowledged().await,
            Packet::ResourcePackResponse(response) => {
                handle_resource_pack_response(&self.player, response).await;
            }
            Packet::CookieResponse(cookie) => handle_cookie_response(&self.player, cookie).await,
            _ => self.forward_if_ready(&pc).await,
        }
    }

    pub async fn disconnected(self: Arc<Self>) {
        self.player.teardown().await;
    }

    /// The connected backend, once it finished any Forge handshake.
    fn ready_backend(&self) -> Option<Arc<Conn>> {
        let server = self.player.connected_server()?;
        if !server.phase().considered_complete() {
            return None;
        }
        server.ensure_connected()
    }

    fn backend(&self) -> Option<Arc<Conn>> {
        self.player.connected_server()?.ensure_connected()
    }

    async fn forward_if_ready(&self, pc: &PacketContext) {
        if let Some(conn) = self.ready_backend() {
            if let Err(e) = conn.write_raw(&pc.payload).await {
                trace!(player = %self.player, id = pc.packet_id, "could not forward packet: {}", e);
            }
        }
    }

    /// The client switched to config after the backend asked for it.
    async fn handle_config_acknowledged(&self) {
        let conn = self.player.conn();
        conn.set_reader_state(State::Config);
        conn.set_session_handler(Session::ClientConfig(Arc::new(ClientConfigSession::new(
            self.player.clone(),
        ))))
        .await;
        self.player.config_acknowledged();
    }

    /// Cancelling or changing signed content breaks the client's chat chain.
    /// Returns true when the player was disconnected for it.
    async fn illegal_signed_change(&self) -> bool {
        if self.player.proxy().config().force_key_authentication {
            info!(player = %self.player, "a plugin tried to cancel or change a signed message");
            self.player.disconnect(&messages::illegal_protocol_state()).await;
            return true;
        }
        false
    }

    fn keyed_signed(&self) -> bool {
        self.player
            .identified_key()
            .is_some_and(|key| key.revision() >= KeyRevision::LinkedV2)
    }

    async fn handle_chat(&self, chat: ClientChat) {
        let player = &self.player;
        let original = match &chat {
            ClientChat::Legacy(c) => c.message.clone(),
            ClientChat::Keyed(c) => c.message.clone(),
            ClientChat::Session(c) => c.message.clone(),
        };
        if contains_illegal_characters(&original) {
            player
                .disconnect(&messages::translatable("multiplayer.disconnect.illegal_characters", Vec::new()))
                .await;
            return;
        }
        let Some(backend) = self.backend() else {
            return;
        };
        let mut event = PlayerChatEvent {
            player: player.clone(),
            original: original.clone(),
            message: original.clone(),
            denied: false,
        };
        player.proxy().events().fire(&mut event);
        if !player.active() {
            return;
        }
        let changed = event.message != original;
        if !event.denied && !changed {
            debug!(player = %player, chat = %original, "player sent chat message");
        }
        let protocol = player.protocol();
        let queue = player.chat_queue();

        match chat {
            ClientChat::Legacy(_) => {
                if !event.denied {
                    queue.queue_with(backend, move |_| Some(LegacyChat::new(event.message).into()));
                }
            }
            ClientChat::Keyed(packet) => {
                let signed = self.keyed_signed();
                if (event.denied || changed) && signed && self.illegal_signed_change().await {
                    return;
                }
                if event.denied {
                    return;
                }
                let packet = if changed {
                    KeyedPlayerChat {
                        message: event.message,
                        expiry: packet.expiry,
                        rest: unsigned_keyed_tail(protocol),
                    }
                } else {
                    packet
                };
                queue.queue_packet(backend, Some(packet.expiry), None, move |_| Some(packet.into()));
            }
            ClientChat::Session(mut packet) => {
                let signed = packet.signature.is_some();
                if (event.denied || changed) && signed && self.illegal_signed_change().await {
                    return;
                }
                let timestamp = packet.timestamp;
                let last_seen = packet.last_seen;
                queue.queue_packet(backend, Some(timestamp), Some(last_seen), move |seen| {
                    if event.denied {
                        return seen
                            .filter(|s| s.offset > 0)
                            .map(|s| ChatAcknowledgement { offset: s.offset }.into());
                    }
                    if let Some(seen) = seen {
                        packet.last_seen = seen;
                    }
                    if changed {
                        packet.message = event.message;
                        packet.salt = 0;
                        packet.signature = None;
                    }
                    Some(packet.into())
                });
            }
        }
    }

    async fn handle_command(&self, command: ClientCommand) {
        let player = &self.player;
        let Some(backend) = self.backend() else {
            return;
        };
        let original = command.command().trim().to_string();
        let mut event = CommandExecuteEvent {
            player: player.clone(),
            command: original.clone(),
            result: CommandResult::Forward(original.clone()),
        };
        player.proxy().events().fire(&mut event);
        if !player.active() {
            return;
        }

        let forward = match event.result {
            CommandResult::Forward(line) => {
                if line == original {
                    info!(player = %player, command = %line, "player executed command");
                } else {
                    info!(player = %player, original = %original, changed = %line, "player executed command");
                }
                Some(line)
            }
            CommandResult::Handled | CommandResult::Denied => None,
        };
        let changed = forward.as_deref().is_some_and(|line| line != original);
        let signed = match &command {
            ClientCommand::Keyed(_) => self.keyed_signed(),
            ClientCommand::Session(p) => p.is_signed(),
            _ => false,
        };
        if (forward.is_none() || changed) && signed && self.illegal_signed_change().await {
            return;
        }

        let protocol = player.protocol();
        let timestamp = command.timestamp();
        let last_seen = command.last_seen();
        player
            .chat_queue()
            .queue_packet(backend, timestamp, last_seen, move |seen| {
                let Some(line) = forward else {
                    return seen
                        .filter(|s| s.offset > 0)
                        .map(|s| ChatAcknowledgement { offset: s.offset }.into());
                };
                Some(build_command(command, line, changed, seen, protocol))
            });
    }

    async fn handle_plugin_message(&self, msg: PluginMessage) {
        let player = &self.player;
        let Some(server) = player.connected_server() else {
            player.queue_plugin_message(msg);
            return;
        };
        let Some(backend) = server.ensure_connected() else {
            return;
        };
        if backend.state() != State::Play {
            info!(player = %player, channel = %msg.channel, "plugin message received while the backend was not ready, discarding");
            return;
        }

        if channel::is_register(&msg.channel) {
            let added = player.add_channels(&plugin_message::channels(&msg, player.protocol()));
            if !added.is_empty() {
                player.proxy().events().fire_and_forget(PlayerChannelRegisterEvent {
                    player: player.clone(),
                    channels: added,
                });
            }
            let _ = backend.write_packet(msg).await;
            return;
        }
        if channel::is_unregister(&msg.channel) {
            let removed = player.remove_channels(&plugin_message::channels(&msg, player.protocol()));
            if !removed.is_empty() {
                player.proxy().events().fire_and_forget(PlayerChannelUnregisterEvent {
                    player: player.clone(),
                    channels: removed,
                });
            }
            let _ = backend.write_packet(msg).await;
            return;
        }
        if channel::is_brand(&msg.channel) {
            player.set_client_brand(plugin_message::read_brand(&msg));
            let _ = backend.write_packet(msg).await;
            return;
        }

        if server.phase() == BackendPhase::InTransition {
            if let Some(in_flight) = player.connection_in_flight() {
                plugin_message::handle_client_forge_message(player, &in_flight, &msg).await;
            }
            return;
        }
        if plugin_message::handle_client_forge_message(player, &server, &msg).await {
            return;
        }
        if !(player.phase().considered_complete() && server.phase().considered_complete()) {
            player.queue_plugin_message(msg);
            return;
        }

        let mut event = PluginMessageEvent {
            source: MessageEndpoint::Player(player.clone()),
            target: MessageEndpoint::Server(server.server().clone()),
            identifier: msg.channel.clone(),
            data: msg.data,
            forward: true,
        };
        player.proxy().events().fire(&mut event);
        if event.forward {
            if let Err(e) = backend.write_packet(PluginMessage::new(msg.channel, event.data)).await {
                trace!(player = %player, "could not forward plugin message: {}", e);
            }
        }
    }
}

fn build_command(
    command: ClientCommand,
    line: String,
    changed: bool,
    seen: Option<LastSeenMessages>,
    protocol: Protocol,
) -> Packet {
    match command {
        ClientCommand::Legacy(_) => LegacyChat::new(format!("/{}", line)).into(),
        ClientCommand::Unsigned(_) => UnsignedPlayerCommand { command: line }.into(),
        ClientCommand::Keyed(mut packet) => {
            if changed {
                packet.command = line;
                packet.rest = unsigned_keyed_tail(protocol);
            }
            packet.into()
        }
        ClientCommand::Session(mut packet) => {
            if let Some(seen) = seen {
                packet.last_seen = seen;
            }
            if changed {
                if protocol >= Protocol::V1_20_5 {
                    return UnsignedPlayerCommand { command: line }.into();
                }
                packet.command = line;
                packet.salt = 0;
                packet.argument_signatures.clear();
            }
            packet.into()
        }
    }
}

/// Fire the resource pack event and pass the response on.
pub(super) async fn handle_resource_pack_response(player: &Arc<ConnectedPlayer>, response: ResourcePackResponse) {
    player.proxy().events().fire(&mut PlayerResourcePackStatusEvent {
        player: player.clone(),
        id: response.id,
        status: response.status,
    });
    forward_packet_to_server(player, response).await;
}

pub(super) async fn handle_cookie_response(player: &Arc<ConnectedPlayer>, cookie: CookieResponse) {
    let mut event = CookieReceiveEvent {
        inbound: player.inbound().clone(),
        player: Some(player.clone()),
        key: cookie.key,
        payload: cookie.payload,
        forward: true,
    };
    player.proxy().events().fire(&mut event);
    if event.forward {
        forward_packet_to_server(
            player,
            CookieResponse {
                key: event.key,
                payload: event.payload,
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_characters() {
        assert!(!contains_illegal_characters("hello world"));
        assert!(!contains_illegal_characters("/tp 0 64 0"));
        assert!(contains_illegal_characters("\u{a7}cred"));
        assert!(contains_illegal_characters("tab\there"));
        assert!(contains_illegal_characters("del\u{7f}"));
    }

    #[test]
    fn test_unsigned_keyed_tail() {
        let tail = unsigned_keyed_tail(Protocol::V1_19);
        assert_eq!(tail, vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(unsigned_keyed_tail(Protocol::V1_19_1).len(), 12);
    }

    #[test]
    fn test_changed_session_command_on_new_clients_is_unsigned() {
        let packet = SessionPlayerCommand {
            command: "msg bob hi".into(),
            timestamp: 1,
            salt: 5,
            argument_signatures: vec![],
            last_seen: LastSeenMessages::new(2, [0; 3]),
        };
        let built = build_command(
            ClientCommand::Session(packet.clone()),
            "msg alice hi".into(),
            true,
            None,
            Protocol::V1_20_5,
        );
        assert!(matches!(built, Packet::UnsignedPlayerCommand(ref p) if p.command == "msg alice hi"));
        let kept = build_command(
            ClientCommand::Session(packet.clone()),
            "msg bob hi".into(),
            false,
            Some(LastSeenMessages::new(7, [1, 0, 0])),
            Protocol::V1_20_5,
        );
        match kept {
            Packet::SessionPlayerCommand(p) => {
                assert_eq!(p.salt, 5);
                assert_eq!(p.last_seen.offset, 7);
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }
}
