use super::{CodecContext, PacketCodec};
use crate::channel::transform_legacy_to_modern;
use crate::codec::*;
use crate::component::ComponentHolder;
use crate::state::State;
use crate::version::Protocol;
use bytes::{BufMut, BytesMut};
use rampart_types::TextComponent;
use uuid::Uuid;

/// Kick with a reason; valid in login, config and play.
#[derive(Debug, Clone, PartialEq)]
pub struct Disconnect {
    pub reason: ComponentHolder,
}

impl Disconnect {
    pub fn new(reason: impl Into<ComponentHolder>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn from_text(reason: &TextComponent) -> Self {
        Self::new(reason)
    }
}

impl PacketCodec for Disconnect {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        // login disconnects stay JSON on every version
        let reason = if ctx.state == State::Login {
            ComponentHolder::Json(read_string(buf, 262144)?)
        } else {
            ComponentHolder::read(buf, ctx.protocol)?
        };
        Ok(Self { reason })
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        if ctx.state == State::Login {
            write_string(buf, &self.reason.to_json_string());
        } else {
            self.reason.write(buf, ctx.protocol);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    pub random_id: i64,
}

impl PacketCodec for KeepAlive {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let random_id = if ctx.protocol >= Protocol::V1_12_2 {
            read_i64(buf)?
        } else if ctx.protocol >= Protocol::V1_8 {
            read_varint(buf)? as i64
        } else {
            read_i32(buf)? as i64
        };
        Ok(Self { random_id })
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        if ctx.protocol >= Protocol::V1_12_2 {
            buf.put_i64(self.random_id);
        } else if ctx.protocol >= Protocol::V1_8 {
            write_varint(buf, self.random_id as i32);
        } else {
            buf.put_i32(self.random_id as i32);
        }
    }
}

/// Custom payload on a named channel, used in config and play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMessage {
    pub channel: String,
    pub data: Vec<u8>,
}

impl PluginMessage {
    pub fn new(channel: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            channel: channel.into(),
            data,
        }
    }
}

impl PacketCodec for PluginMessage {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let mut channel = read_string(buf, DEFAULT_MAX_STRING)?;
        if ctx.protocol >= Protocol::V1_13 {
            channel = transform_legacy_to_modern(&channel);
        }
        let data = if ctx.protocol >= Protocol::V1_8 {
            read_remaining(buf)
        } else {
            let len = read_extended_forge_short(buf)?;
            if buf.len() < len {
                return Err(CodecError::NotEnoughData);
            }
            buf.split_to(len).to_vec()
        };
        Ok(Self { channel, data })
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        write_string(buf, &self.channel);
        if ctx.protocol < Protocol::V1_8 {
            write_extended_forge_short(buf, self.data.len());
        }
        buf.put_slice(&self.data);
    }
}

/// Client locale, view distance and skin settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub locale: String,
    pub view_distance: i8,
    pub chat_visibility: i32,
    pub chat_colors: bool,
    pub difficulty: u8,
    pub skin_parts: u8,
    pub main_hand: i32,
    pub text_filtering: bool,
    pub client_listing: bool,
    pub particle_status: i32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            locale: "en_us".into(),
            view_distance: 10,
            chat_visibility: 0,
            chat_colors: true,
            difficulty: 0,
            skin_parts: 0x7F,
            main_hand: 1,
            text_filtering: false,
            client_listing: true,
            particle_status: 0,
        }
    }
}

impl PacketCodec for ClientSettings {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let p = ctx.protocol;
        let mut s = ClientSettings {
            locale: read_string(buf, 16)?,
            view_distance: read_i8(buf)?,
            chat_visibility: read_varint(buf)?,
            chat_colors: read_bool(buf)?,
            ..Default::default()
        };
        if p <= Protocol::V1_7_6 {
            s.difficulty = read_u8(buf)?;
        }
        s.skin_parts = read_u8(buf)?;
        if p >= Protocol::V1_9 {
            s.main_hand = read_varint(buf)?;
            if p >= Protocol::V1_17 {
                s.text_filtering = read_bool(buf)?;
                if p >= Protocol::V1_18 {
                    s.client_listing = read_bool(buf)?;
                }
            }
        }
        if p >= Protocol::V1_21_2 {
            s.particle_status = read_varint(buf)?;
        }
        Ok(s)
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        let p = ctx.protocol;
        write_string(buf, &self.locale);
        buf.put_i8(self.view_distance);
        write_varint(buf, self.chat_visibility);
        buf.put_u8(self.chat_colors as u8);
        if p <= Protocol::V1_7_6 {
            buf.put_u8(self.difficulty);
        }
        buf.put_u8(self.skin_parts);
        if p >= Protocol::V1_9 {
            write_varint(buf, self.main_hand);
            if p >= Protocol::V1_17 {
                buf.put_u8(self.text_filtering as u8);
                if p >= Protocol::V1_18 {
                    buf.put_u8(self.client_listing as u8);
                }
            }
        }
        if p >= Protocol::V1_21_2 {
            write_varint(buf, self.particle_status);
        }
    }
}

macro_rules! empty_packet {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $name;

        impl PacketCodec for $name {
            fn decode(_ctx: &CodecContext, _buf: &mut BytesMut) -> CodecResult<Self> {
                Ok($name)
            }

            fn encode(&self, _ctx: &CodecContext, _buf: &mut BytesMut) {}
        }
    };
}

empty_packet!(
    /// Ends the config phase. Server-bound in play it acknowledges a `StartUpdate`.
    FinishedUpdate
);
empty_packet!(
    /// Asks the client to re-enter the config phase.
    StartUpdate
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieRequest {
    pub key: String,
}

impl PacketCodec for CookieRequest {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            key: read_string(buf, DEFAULT_MAX_STRING)?,
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_string(buf, &self.key);
    }
}

const MAX_COOKIE_LEN: usize = 5 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieResponse {
    pub key: String,
    pub payload: Option<Vec<u8>>,
}

impl PacketCodec for CookieResponse {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let key = read_string(buf, DEFAULT_MAX_STRING)?;
        let payload = if read_bool(buf)? {
            Some(read_byte_array_max(buf, MAX_COOKIE_LEN)?)
        } else {
            None
        };
        Ok(Self { key, payload })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_string(buf, &self.key);
        match &self.payload {
            Some(data) => {
                buf.put_u8(1);
                write_byte_array(buf, data);
            }
            None => buf.put_u8(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCookie {
    pub key: String,
    pub payload: Vec<u8>,
}

impl PacketCodec for StoreCookie {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            key: read_string(buf, DEFAULT_MAX_STRING)?,
            payload: read_byte_array_max(buf, MAX_COOKIE_LEN)?,
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_string(buf, &self.key);
        write_byte_array(buf, &self.payload);
    }
}

/// Sends the client to another host (1.20.5+).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub host: String,
    pub port: i32,
}

impl PacketCodec for Transfer {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            host: read_string(buf, DEFAULT_MAX_STRING)?,
            port: read_varint(buf)?,
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_string(buf, &self.host);
        write_varint(buf, self.port);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePackResponse {
    /// Pack id, 1.20.3+.
    pub id: Option<Uuid>,
    /// Pack hash, up to 1.9.4.
    pub hash: String,
    pub status: i32,
}

impl PacketCodec for ResourcePackResponse {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let id = if ctx.protocol >= Protocol::V1_20_3 {
            Some(read_uuid(buf)?)
        } else {
            None
        };
        let hash = if ctx.protocol <= Protocol::V1_9_4 {
            read_string(buf, DEFAULT_MAX_STRING)?
        } else {
            String::new()
        };
        Ok(Self {
            id,
            hash,
            status: read_varint(buf)?,
        })
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        if ctx.protocol >= Protocol::V1_20_3 {
            write_uuid(buf, &self.id.unwrap_or_default());
        }
        if ctx.protocol <= Protocol::V1_9_4 {
            write_string(buf, &self.hash);
        }
        write_varint(buf, self.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Direction;

    fn ctx(p: Protocol, state: State) -> CodecContext {
        CodecContext::new(p, Direction::ClientBound, state)
    }

    #[test]
    fn test_disconnect_login_is_always_json() {
        let d = Disconnect::from_text(&TextComponent::plain("nope"));
        let mut buf = BytesMut::new();
        d.encode(&ctx(Protocol::V1_21_4, State::Login), &mut buf);
        assert_eq!(read_string(&mut buf, 1024).unwrap(), r#"{"text":"nope"}"#);

        let mut buf = BytesMut::new();
        d.encode(&ctx(Protocol::V1_21_4, State::Play), &mut buf);
        assert_eq!(buf[0], 10);
        let back = Disconnect::decode(&ctx(Protocol::V1_21_4, State::Play), &mut buf).unwrap();
        assert_eq!(back.reason.to_text().plain_text(), "nope");
    }

    #[test]
    fn test_keep_alive_widths() {
        let ka = KeepAlive { random_id: 1234 };
        for (p, len) in [
            (Protocol::V1_7_2, 4),
            (Protocol::V1_12_1, 2),
            (Protocol::V1_12_2, 8),
        ] {
            let mut buf = BytesMut::new();
            ka.encode(&ctx(p, State::Play), &mut buf);
            assert_eq!(buf.len(), len, "{}", p);
            assert_eq!(KeepAlive::decode(&ctx(p, State::Play), &mut buf).unwrap(), ka);
        }
    }

    #[test]
    fn test_plugin_message_channel_rename_on_1_13() {
        let msg = PluginMessage::new("MC|Brand", b"\x07vanilla".to_vec());
        let mut buf = BytesMut::new();
        msg.encode(&ctx(Protocol::V1_13, State::Play), &mut buf);
        let back = PluginMessage::decode(&ctx(Protocol::V1_13, State::Play), &mut buf).unwrap();
        assert_eq!(back.channel, "minecraft:brand");

        let mut buf = BytesMut::new();
        msg.encode(&ctx(Protocol::V1_12_2, State::Play), &mut buf);
        let back = PluginMessage::decode(&ctx(Protocol::V1_12_2, State::Play), &mut buf).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_plugin_message_1_7_length_prefix() {
        let msg = PluginMessage::new("FML|HS", vec![0, 1, 2]);
        let mut buf = BytesMut::new();
        msg.encode(&ctx(Protocol::V1_7_6, State::Play), &mut buf);
        buf.put_u8(0xFF);
        let back = PluginMessage::decode(&ctx(Protocol::V1_7_6, State::Play), &mut buf).unwrap();
        assert_eq!(back, msg);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_client_settings_versions() {
        let settings = ClientSettings {
            locale: "de_de".into(),
            view_distance: 12,
            particle_status: 2,
            ..Default::default()
        };
        for p in [Protocol::V1_18, Protocol::V1_21_2] {
            let mut buf = BytesMut::new();
            settings.encode(&ctx(p, State::Config), &mut buf);
            let back = ClientSettings::decode(&ctx(p, State::Config), &mut buf).unwrap();
            assert!(buf.is_empty());
            if p >= Protocol::V1_21_2 {
                assert_eq!(back, settings);
            } else {
                assert_eq!(back.particle_status, 0);
                assert_eq!(back.locale, "de_de");
            }
        }
    }
}
