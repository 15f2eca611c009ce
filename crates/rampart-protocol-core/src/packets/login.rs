use super::{CodecContext, PacketCodec};
use crate::codec::*;
use crate::version::Protocol;
use bytes::{BufMut, BytesMut};
use rampart_types::ProfileProperty;
use uuid::Uuid;

/// The chat-signing key a 1.19 - 1.19.2 client attaches to its login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyData {
    /// Milliseconds since the epoch.
    pub expires_at: i64,
    /// X.509 DER encoded RSA public key.
    pub key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl PublicKeyData {
    fn read(buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            expires_at: read_i64(buf)?,
            key: read_byte_array_max(buf, 512)?,
            signature: read_byte_array_max(buf, 4096)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_i64(self.expires_at);
        write_byte_array(buf, &self.key);
        write_byte_array(buf, &self.signature);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLogin {
    pub username: String,
    pub player_key: Option<PublicKeyData>,
    pub holder_uuid: Option<Uuid>,
}

impl ServerLogin {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            player_key: None,
            holder_uuid: None,
        }
    }
}

impl PacketCodec for ServerLogin {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let username = read_string(buf, 16)?;
        if username.is_empty() {
            return Err(CodecError::BadData("empty username".into()));
        }
        let mut login = ServerLogin::new(username);
        let p = ctx.protocol;
        if p >= Protocol::V1_19 {
            if p < Protocol::V1_19_3 && read_bool(buf)? {
                login.player_key = Some(PublicKeyData::read(buf)?);
            }
            if p >= Protocol::V1_20_2 {
                login.holder_uuid = Some(read_uuid(buf)?);
            } else if p >= Protocol::V1_19_1 && read_bool(buf)? {
                login.holder_uuid = Some(read_uuid(buf)?);
            }
        }
        Ok(login)
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        write_string(buf, &self.username);
        let p = ctx.protocol;
        if p >= Protocol::V1_19 {
            if p < Protocol::V1_19_3 {
                match &self.player_key {
                    Some(key) => {
                        buf.put_u8(1);
                        key.write(buf);
                    }
                    None => buf.put_u8(0),
                }
            }
            if p >= Protocol::V1_20_2 {
                write_uuid(buf, &self.holder_uuid.unwrap_or_default());
            } else if p >= Protocol::V1_19_1 {
                match &self.holder_uuid {
                    Some(id) => {
                        buf.put_u8(1);
                        write_uuid(buf, id);
                    }
                    None => buf.put_u8(0),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionRequest {
    pub server_id: String,
    pub public_key: Vec<u8>,
    pub verify_token: Vec<u8>,
    pub should_authenticate: bool,
}

impl PacketCodec for EncryptionRequest {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let server_id = read_string(buf, 20)?;
        let (public_key, verify_token) = if ctx.protocol >= Protocol::V1_8 {
            (read_byte_array_max(buf, 256)?, read_byte_array_max(buf, 16)?)
        } else {
            (read_byte_array_17(buf)?, read_byte_array_17(buf)?)
        };
        let should_authenticate = if ctx.protocol >= Protocol::V1_20_5 {
            read_bool(buf)?
        } else {
            true
        };
        Ok(Self {
            server_id,
            public_key,
            verify_token,
            should_authenticate,
        })
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        write_string(buf, &self.server_id);
        if ctx.protocol >= Protocol::V1_8 {
            write_byte_array(buf, &self.public_key);
            write_byte_array(buf, &self.verify_token);
        } else {
            write_byte_array_17(buf, &self.public_key);
            write_byte_array_17(buf, &self.verify_token);
        }
        if ctx.protocol >= Protocol::V1_20_5 {
            buf.put_u8(self.should_authenticate as u8);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionResponse {
    pub shared_secret: Vec<u8>,
    /// Encrypted verify token, or the key signature when `salt` is set.
    pub verify_token: Vec<u8>,
    /// 1.19 - 1.19.2 clients with a signing key answer with salt + signature.
    pub salt: Option<i64>,
}

impl PacketCodec for EncryptionResponse {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let p = ctx.protocol;
        if p < Protocol::V1_8 {
            return Ok(Self {
                shared_secret: read_byte_array_17(buf)?,
                verify_token: read_byte_array_17(buf)?,
                salt: None,
            });
        }
        let shared_secret = read_byte_array_max(buf, 128)?;
        let mut salt = None;
        if p >= Protocol::V1_19 && p < Protocol::V1_19_3 && !read_bool(buf)? {
            salt = Some(read_i64(buf)?);
        }
        let max = if p >= Protocol::V1_19 { 256 } else { 128 };
        Ok(Self {
            shared_secret,
            verify_token: read_byte_array_max(buf, max)?,
            salt,
        })
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        let p = ctx.protocol;
        if p < Protocol::V1_8 {
            write_byte_array_17(buf, &self.shared_secret);
            write_byte_array_17(buf, &self.verify_token);
            return;
        }
        write_byte_array(buf, &self.shared_secret);
        if p >= Protocol::V1_19 && p < Protocol::V1_19_3 {
            match self.salt {
                Some(salt) => {
                    buf.put_u8(0);
                    buf.put_i64(salt);
                }
                None => buf.put_u8(1),
            }
        }
        write_byte_array(buf, &self.verify_token);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLoginSuccess {
    pub uuid: Uuid,
    pub username: String,
    pub properties: Vec<ProfileProperty>,
}

impl PacketCodec for ServerLoginSuccess {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let p = ctx.protocol;
        let uuid = if p >= Protocol::V1_16 {
            read_uuid(buf)?
        } else {
            let max = if p >= Protocol::V1_7_6 { 36 } else { 32 };
            let s = read_string(buf, max)?;
            Uuid::parse_str(&s).map_err(|e| CodecError::BadData(e.to_string()))?
        };
        let username = read_string(buf, 16)?;
        let properties = if p >= Protocol::V1_19 {
            read_properties(buf)?
        } else {
            Vec::new()
        };
        if p >= Protocol::V1_20_5 && p < Protocol::V1_21_2 {
            // strict error handling flag
            read_bool(buf)?;
        }
        Ok(Self {
            uuid,
            username,
            properties,
        })
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        let p = ctx.protocol;
        if p >= Protocol::V1_16 {
            write_uuid(buf, &self.uuid);
        } else if p >= Protocol::V1_7_6 {
            write_string(buf, &self.uuid.hyphenated().to_string());
        } else {
            write_string(buf, &self.uuid.simple().to_string());
        }
        write_string(buf, &self.username);
        if p >= Protocol::V1_19 {
            write_properties(buf, &self.properties);
        }
        if p >= Protocol::V1_20_5 && p < Protocol::V1_21_2 {
            buf.put_u8(1);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetCompression {
    pub threshold: i32,
}

impl PacketCodec for SetCompression {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            threshold: read_varint(buf)?,
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_varint(buf, self.threshold);
    }
}

/// Server to client login-phase custom payload (forwarding, Forge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPluginMessage {
    pub id: i32,
    pub channel: String,
    pub data: Vec<u8>,
}

impl PacketCodec for LoginPluginMessage {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            id: read_varint(buf)?,
            channel: read_string(buf, DEFAULT_MAX_STRING)?,
            data: read_remaining(buf),
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_varint(buf, self.id);
        write_string(buf, &self.channel);
        buf.put_slice(&self.data);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPluginResponse {
    pub id: i32,
    pub success: bool,
    pub data: Vec<u8>,
}

impl PacketCodec for LoginPluginResponse {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            id: read_varint(buf)?,
            success: read_bool(buf)?,
            data: read_remaining(buf),
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_varint(buf, self.id);
        buf.put_u8(self.success as u8);
        buf.put_slice(&self.data);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginAcknowledged;

impl PacketCodec for LoginAcknowledged {
    fn decode(_ctx: &CodecContext, _buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(LoginAcknowledged)
    }

    fn encode(&self, _ctx: &CodecContext, _buf: &mut BytesMut) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Direction, State};

    fn ctx(p: Protocol) -> CodecContext {
        CodecContext::new(p, Direction::ServerBound, State::Login)
    }

    fn roundtrip<T: PacketCodec + PartialEq + std::fmt::Debug>(p: Protocol, packet: &T) -> T {
        let mut buf = BytesMut::new();
        packet.encode(&ctx(p), &mut buf);
        let out = T::decode(&ctx(p), &mut buf).unwrap();
        assert!(buf.is_empty(), "left bytes at {}", p);
        out
    }

    #[test]
    fn test_server_login_key_and_holder() {
        let key = PublicKeyData {
            expires_at: 1_700_000_000_000,
            key: vec![1, 2, 3],
            signature: vec![4, 5],
        };
        let holder = Uuid::new_v4();
        let login = ServerLogin {
            username: "Alice".into(),
            player_key: Some(key.clone()),
            holder_uuid: Some(holder),
        };

        let at_1_19 = roundtrip(Protocol::V1_19, &login);
        assert_eq!(at_1_19.player_key, Some(key.clone()));
        assert_eq!(at_1_19.holder_uuid, None);

        assert_eq!(roundtrip(Protocol::V1_19_1, &login), login);

        let at_1_19_3 = roundtrip(Protocol::V1_19_3, &login);
        assert_eq!(at_1_19_3.player_key, None);
        assert_eq!(at_1_19_3.holder_uuid, Some(holder));

        let plain = roundtrip(Protocol::V1_8, &login);
        assert_eq!(plain, ServerLogin::new("Alice"));
    }

    #[test]
    fn test_server_login_rejects_empty_name() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "");
        assert!(ServerLogin::decode(&ctx(Protocol::V1_8), &mut buf).is_err());
    }

    #[test]
    fn test_encryption_response_salt_only_on_1_19() {
        let resp = EncryptionResponse {
            shared_secret: vec![9; 128],
            verify_token: vec![7; 256],
            salt: Some(42),
        };
        assert_eq!(roundtrip(Protocol::V1_19, &resp), resp);
        assert_eq!(roundtrip(Protocol::V1_20_3, &resp).salt, None);

        // a `true` flag means the encrypted verify token follows directly
        let mut buf = BytesMut::new();
        write_byte_array(&mut buf, &[1, 2]);
        buf.put_u8(1);
        write_byte_array(&mut buf, &[3, 4]);
        let decoded = EncryptionResponse::decode(&ctx(Protocol::V1_19_1), &mut buf).unwrap();
        assert_eq!(decoded.salt, None);
        assert_eq!(decoded.verify_token, vec![3, 4]);
    }

    #[test]
    fn test_login_success_uuid_forms() {
        let success = ServerLoginSuccess {
            uuid: Uuid::parse_str("069a79f4-44e9-4726-a5be-fca90e38aaf5").unwrap(),
            username: "Notch".into(),
            properties: vec![ProfileProperty::new("textures", "e30=")],
        };

        let mut buf = BytesMut::new();
        success.encode(&ctx(Protocol::V1_12_2), &mut buf);
        assert_eq!(
            read_string(&mut buf, 36).unwrap(),
            "069a79f4-44e9-4726-a5be-fca90e38aaf5"
        );

        let mut buf = BytesMut::new();
        success.encode(&ctx(Protocol::V1_7_2), &mut buf);
        assert_eq!(
            read_string(&mut buf, 32).unwrap(),
            "069a79f444e94726a5befca90e38aaf5"
        );

        let old = roundtrip(Protocol::V1_16_4, &success);
        assert!(old.properties.is_empty());
        assert_eq!(old.uuid, success.uuid);
        assert_eq!(roundtrip(Protocol::V1_20_5, &success), success);
        assert_eq!(roundtrip(Protocol::V1_21_4, &success), success);
    }

    #[test]
    fn test_encryption_request_legacy_arrays() {
        let req = EncryptionRequest {
            server_id: String::new(),
            public_key: vec![0x30; 162],
            verify_token: vec![1, 2, 3, 4],
            should_authenticate: true,
        };
        let mut buf = BytesMut::new();
        req.encode(&ctx(Protocol::V1_7_6), &mut buf);
        // empty server id, then a short length prefix
        assert_eq!(&buf[..3], &[0, 0, 162]);
        assert_eq!(roundtrip(Protocol::V1_7_6, &req), req);
        assert_eq!(roundtrip(Protocol::V1_21, &req), req);
    }
}
