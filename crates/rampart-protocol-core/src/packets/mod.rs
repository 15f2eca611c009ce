//! Typed packets. Every struct implements [`PacketCodec`] against a
//! [`CodecContext`] carrying the negotiated protocol, so a single struct covers
//! every wire revision of its packet.

mod chat;
mod common;
mod handshake;
mod join;
mod login;
mod status;
mod tab;

pub use chat::*;
pub use common::*;
pub use handshake::*;
pub use join::*;
pub use login::*;
pub use status::*;
pub use tab::*;

use crate::codec::CodecResult;
use crate::state::{Direction, State};
use crate::version::Protocol;
use bytes::{Bytes, BytesMut};

/// What a packet codec needs to know about the stream it is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecContext {
    pub protocol: Protocol,
    pub direction: Direction,
    pub state: State,
}

impl CodecContext {
    pub fn new(protocol: Protocol, direction: Direction, state: State) -> Self {
        Self {
            protocol,
            direction,
            state,
        }
    }
}

pub trait PacketCodec: Sized {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self>;
    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut);
}

macro_rules! packets {
    ($($name:ident),* $(,)?) => {
        /// Every packet the proxy understands. Anything else is forwarded as raw bytes.
        #[derive(Debug, Clone, strum::EnumDiscriminants)]
        #[strum_discriminants(name(PacketKind), derive(Hash, strum::AsRefStr))]
        pub enum Packet {
            $($name($name)),*
        }

        impl Packet {
            pub fn kind(&self) -> PacketKind {
                PacketKind::from(self)
            }

            pub fn decode(kind: PacketKind, ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Packet> {
                match kind {
                    $(PacketKind::$name => $name::decode(ctx, buf).map(Packet::$name)),*
                }
            }

            pub fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
                match self {
                    $(Packet::$name(p) => p.encode(ctx, buf)),*
                }
            }
        }

        $(
            impl From<$name> for Packet {
                fn from(p: $name) -> Packet {
                    Packet::$name(p)
                }
            }
        )*
    };
}

packets! {
    Handshake,
    StatusRequest,
    StatusResponse,
    StatusPing,
    ServerLogin,
    EncryptionRequest,
    EncryptionResponse,
    ServerLoginSuccess,
    SetCompression,
    LoginPluginMessage,
    LoginPluginResponse,
    LoginAcknowledged,
    Disconnect,
    KeepAlive,
    PluginMessage,
    ClientSettings,
    FinishedUpdate,
    StartUpdate,
    CookieRequest,
    CookieResponse,
    StoreCookie,
    Transfer,
    ResourcePackResponse,
    JoinGame,
    Respawn,
    LegacyChat,
    SystemChat,
    KeyedPlayerChat,
    KeyedPlayerCommand,
    SessionPlayerChat,
    SessionPlayerCommand,
    UnsignedPlayerCommand,
    ChatAcknowledgement,
    LegacyPlayerListItem,
    UpsertPlayerInfo,
    RemovePlayerInfo,
    HeaderAndFooter,
    LegacyTitle,
    TitleClear,
    BossBar,
}

/// A decoded (or undecodable) inbound frame as handed to a session handler.
#[derive(Debug, Clone)]
pub struct PacketContext {
    pub direction: Direction,
    pub protocol: Protocol,
    pub packet_id: i32,
    /// `None` when the id is not registered for this state and protocol.
    pub packet: Option<Packet>,
    /// The frame body, packet id included, for verbatim forwarding.
    pub payload: Bytes,
    /// The typed decoder did not consume the whole body.
    pub left_bytes: bool,
}

impl PacketContext {
    pub fn known(&self) -> bool {
        self.packet.is_some()
    }
}
