use super::{CodecContext, PacketCodec};
use crate::codec::*;
use bytes::{BufMut, BytesMut};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub port: u16,
    pub next_status: i32,
}

impl PacketCodec for Handshake {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            protocol_version: read_varint(buf)?,
            server_address: read_string(buf, DEFAULT_MAX_STRING)?,
            port: read_u16(buf)?,
            next_status: read_varint(buf)?,
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_varint(buf, self.protocol_version);
        write_string(buf, &self.server_address);
        buf.put_u16(self.port);
        write_varint(buf, self.next_status);
    }
}
