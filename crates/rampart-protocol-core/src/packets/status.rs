use super::{CodecContext, PacketCodec};
use crate::codec::*;
use bytes::{BufMut, BytesMut};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusRequest;

impl PacketCodec for StatusRequest {
    fn decode(_ctx: &CodecContext, _buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(StatusRequest)
    }

    fn encode(&self, _ctx: &CodecContext, _buf: &mut BytesMut) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
}

impl PacketCodec for StatusResponse {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            status: read_string(buf, DEFAULT_MAX_STRING)?,
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_string(buf, &self.status);
    }
}

/// Used in both directions; the proxy echoes it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPing {
    pub random_id: i64,
}

impl PacketCodec for StatusPing {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            random_id: read_i64(buf)?,
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        buf.put_i64(self.random_id);
    }
}
