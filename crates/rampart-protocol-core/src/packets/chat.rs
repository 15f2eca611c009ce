use super::{CodecContext, PacketCodec};
use crate::codec::*;
use crate::component::ComponentHolder;
use crate::state::Direction;
use crate::version::Protocol;
use bytes::{BufMut, BytesMut};
use uuid::Uuid;

const SIGNATURE_LEN: usize = 256;
const MAX_ARGUMENT_SIGNATURES: usize = 8;

/// Width of the acknowledgement window shared by client and server.
pub const LAST_SEEN_WINDOW: i32 = 20;

/// Acknowledged-message window a 1.19.3+ client attaches to chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastSeenMessages {
    pub offset: i32,
    /// Little-endian 20 bit set.
    pub acknowledged: [u8; 3],
}

impl LastSeenMessages {
    pub fn new(offset: i32, acknowledged: [u8; 3]) -> Self {
        Self {
            offset,
            acknowledged,
        }
    }

    pub fn read(buf: &mut BytesMut) -> CodecResult<Self> {
        let offset = read_varint(buf)?;
        let mut acknowledged = [0u8; 3];
        for b in acknowledged.iter_mut() {
            *b = read_u8(buf)?;
        }
        Ok(Self {
            offset,
            acknowledged,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        write_varint(buf, self.offset);
        buf.put_slice(&self.acknowledged);
    }

    pub fn with_offset(mut self, offset: i32) -> Self {
        self.offset = offset;
        self
    }
}

fn read_signature(buf: &mut BytesMut) -> CodecResult<Vec<u8>> {
    if buf.len() < SIGNATURE_LEN {
        return Err(CodecError::NotEnoughData);
    }
    Ok(buf.split_to(SIGNATURE_LEN).to_vec())
}

/// Chat before 1.19, and server chat up to 1.18.2.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyChat {
    pub message: String,
    /// 0 chat, 1 system, 2 action bar.
    pub position: u8,
    pub sender: Option<Uuid>,
}

impl LegacyChat {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: 0,
            sender: None,
        }
    }
}

impl PacketCodec for LegacyChat {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let p = ctx.protocol;
        let max = match ctx.direction {
            Direction::ClientBound => 262144,
            Direction::ServerBound if p >= Protocol::V1_11 => 256,
            Direction::ServerBound => 100,
        };
        let mut chat = LegacyChat::new(read_string(buf, max)?);
        if ctx.direction == Direction::ClientBound && p >= Protocol::V1_8 {
            chat.position = read_u8(buf)?;
            if p >= Protocol::V1_16 {
                chat.sender = Some(read_uuid(buf)?);
            }
        }
        Ok(chat)
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        write_string(buf, &self.message);
        if ctx.direction == Direction::ClientBound && ctx.protocol >= Protocol::V1_8 {
            buf.put_u8(self.position);
            if ctx.protocol >= Protocol::V1_16 {
                write_uuid(buf, &self.sender.unwrap_or_default());
            }
        }
    }
}

/// Server-originated, unsigned chat (1.19+).
#[derive(Debug, Clone, PartialEq)]
pub struct SystemChat {
    pub component: ComponentHolder,
    /// Action bar instead of the chat box.
    pub overlay: bool,
}

impl PacketCodec for SystemChat {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let component = ComponentHolder::read(buf, ctx.protocol)?;
        let overlay = if ctx.protocol >= Protocol::V1_19_1 {
            read_bool(buf)?
        } else {
            read_varint(buf)? == 2
        };
        Ok(Self { component, overlay })
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        self.component.write(buf, ctx.protocol);
        if ctx.protocol >= Protocol::V1_19_1 {
            buf.put_u8(self.overlay as u8);
        } else {
            write_varint(buf, if self.overlay { 2 } else { 1 });
        }
    }
}

/// 1.19 - 1.19.2 signed chat. Only the leading fields are interpreted; the
/// signature block is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedPlayerChat {
    pub message: String,
    pub expiry: i64,
    pub rest: Vec<u8>,
}

impl PacketCodec for KeyedPlayerChat {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            message: read_string(buf, 256)?,
            expiry: read_i64(buf)?,
            rest: read_remaining(buf),
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_string(buf, &self.message);
        buf.put_i64(self.expiry);
        buf.put_slice(&self.rest);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedPlayerCommand {
    pub command: String,
    pub timestamp: i64,
    pub rest: Vec<u8>,
}

impl PacketCodec for KeyedPlayerCommand {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            command: read_string(buf, 256)?,
            timestamp: read_i64(buf)?,
            rest: read_remaining(buf),
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_string(buf, &self.command);
        buf.put_i64(self.timestamp);
        buf.put_slice(&self.rest);
    }
}

/// 1.19.3+ chat, signed against the session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlayerChat {
    pub message: String,
    pub timestamp: i64,
    pub salt: i64,
    pub signature: Option<Vec<u8>>,
    pub last_seen: LastSeenMessages,
}

impl PacketCodec for SessionPlayerChat {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let message = read_string(buf, 256)?;
        let timestamp = read_i64(buf)?;
        let salt = read_i64(buf)?;
        let signature = if read_bool(buf)? {
            Some(read_signature(buf)?)
        } else {
            None
        };
        Ok(Self {
            message,
            timestamp,
            salt,
            signature,
            last_seen: LastSeenMessages::read(buf)?,
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_string(buf, &self.message);
        buf.put_i64(self.timestamp);
        buf.put_i64(self.salt);
        match &self.signature {
            Some(sig) => {
                buf.put_u8(1);
                buf.put_slice(sig);
            }
            None => buf.put_u8(0),
        }
        self.last_seen.write(buf);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentSignature {
    pub name: String,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlayerCommand {
    pub command: String,
    pub timestamp: i64,
    pub salt: i64,
    pub argument_signatures: Vec<ArgumentSignature>,
    pub last_seen: LastSeenMessages,
}

impl SessionPlayerCommand {
    pub fn is_signed(&self) -> bool {
        !self.argument_signatures.is_empty()
    }
}

impl PacketCodec for SessionPlayerCommand {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let command = read_string(buf, 256)?;
        let timestamp = read_i64(buf)?;
        let salt = read_i64(buf)?;
        let count = read_len(buf)?;
        if count > MAX_ARGUMENT_SIGNATURES {
            return Err(CodecError::BadData(format!(
                "too many argument signatures: {}",
                count
            )));
        }
        let mut argument_signatures = Vec::with_capacity(count);
        for _ in 0..count {
            argument_signatures.push(ArgumentSignature {
                name: read_string(buf, 16)?,
                signature: read_signature(buf)?,
            });
        }
        Ok(Self {
            command,
            timestamp,
            salt,
            argument_signatures,
            last_seen: LastSeenMessages::read(buf)?,
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_string(buf, &self.command);
        buf.put_i64(self.timestamp);
        buf.put_i64(self.salt);
        write_varint(buf, self.argument_signatures.len() as i32);
        for arg in &self.argument_signatures {
            write_string(buf, &arg.name);
            buf.put_slice(&arg.signature);
        }
        self.last_seen.write(buf);
    }
}

/// 1.20.5+ command without signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedPlayerCommand {
    pub command: String,
}

impl PacketCodec for UnsignedPlayerCommand {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            command: read_string(buf, DEFAULT_MAX_STRING)?,
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_string(buf, &self.command);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatAcknowledgement {
    pub offset: i32,
}

impl PacketCodec for ChatAcknowledgement {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            offset: read_varint(buf)?,
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_varint(buf, self.offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;

    fn ctx(p: Protocol, d: Direction) -> CodecContext {
        CodecContext::new(p, d, State::Play)
    }

    #[test]
    fn test_session_chat_with_signature() {
        let chat = SessionPlayerChat {
            message: "hello".into(),
            timestamp: 1_700_000_000_000,
            salt: -5,
            signature: Some(vec![0xAB; 256]),
            last_seen: LastSeenMessages::new(2, [0xFF, 0x0F, 0x01]),
        };
        let c = ctx(Protocol::V1_20_3, Direction::ServerBound);
        let mut buf = BytesMut::new();
        chat.encode(&c, &mut buf);
        assert_eq!(SessionPlayerChat::decode(&c, &mut buf).unwrap(), chat);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_session_command_signature_limit() {
        let c = ctx(Protocol::V1_19_4, Direction::ServerBound);
        let mut buf = BytesMut::new();
        write_string(&mut buf, "msg Bob hi");
        buf.put_i64(0);
        buf.put_i64(0);
        write_varint(&mut buf, 9);
        assert!(SessionPlayerCommand::decode(&c, &mut buf).is_err());
    }

    #[test]
    fn test_legacy_chat_fields_by_direction() {
        let chat = LegacyChat {
            message: "{\"text\":\"hi\"}".into(),
            position: 1,
            sender: Some(Uuid::nil()),
        };
        let cb = ctx(Protocol::V1_16_4, Direction::ClientBound);
        let mut buf = BytesMut::new();
        chat.encode(&cb, &mut buf);
        assert_eq!(LegacyChat::decode(&cb, &mut buf).unwrap(), chat);

        let sb = ctx(Protocol::V1_16_4, Direction::ServerBound);
        let mut buf = BytesMut::new();
        chat.encode(&sb, &mut buf);
        let back = LegacyChat::decode(&sb, &mut buf).unwrap();
        assert_eq!(back.position, 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_system_chat_overlay_encoding() {
        let chat = SystemChat {
            component: ComponentHolder::Json(r#"{"text":"x"}"#.into()),
            overlay: true,
        };
        let c = ctx(Protocol::V1_19, Direction::ClientBound);
        let mut buf = BytesMut::new();
        chat.encode(&c, &mut buf);
        assert_eq!(*buf.last().unwrap(), 2);
        assert!(SystemChat::decode(&c, &mut buf).unwrap().overlay);
    }
}
