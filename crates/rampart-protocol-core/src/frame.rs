use crate::codec::{read_varint, varint_len, write_varint, CodecError, CodecResult};
use aes::cipher::generic_array::GenericArray;
use aes::Aes128;
use bytes::{Buf, BytesMut};
use cfb8::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read as _, Write as _};
use std::slice;
use tracing::trace;

/// Upper bound for a declared frame length.
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

type Encryptor = cfb8::Encryptor<Aes128>;
type Decryptor = cfb8::Decryptor<Aes128>;

/// The shared secret doubles as key and IV.
fn session_key(secret: &[u8]) -> CodecResult<[u8; 16]> {
    secret
        .try_into()
        .map_err(|_| CodecError::BadData(format!("shared secret is {} bytes", secret.len())))
}

// CFB8 has a one-byte block, so the stream state carries over between calls.
fn encrypt_in_place(encryptor: &mut Encryptor, data: &mut [u8]) {
    for byte in data.iter_mut() {
        encryptor.encrypt_block_mut(GenericArray::from_mut_slice(slice::from_mut(byte)));
    }
}

fn decrypt_in_place(decryptor: &mut Decryptor, data: &mut [u8]) {
    for byte in data.iter_mut() {
        decryptor.decrypt_block_mut(GenericArray::from_mut_slice(slice::from_mut(byte)));
    }
}

/// Inbound half: buffers raw socket bytes and yields frame bodies.
pub struct FrameDecoder {
    read_buf: BytesMut,
    compression_threshold: Option<i32>,
    decryptor: Option<Decryptor>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            read_buf: BytesMut::with_capacity(4096),
            compression_threshold: None,
            decryptor: None,
        }
    }

    /// Append freshly read socket bytes, decrypting them if needed.
    pub fn queue_bytes(&mut self, data: &mut [u8]) {
        if let Some(decryptor) = &mut self.decryptor {
            decrypt_in_place(decryptor, data);
        }
        self.read_buf.extend_from_slice(data);
    }

    /// Bytes already buffered were read before the switch, so they are
    /// still ciphertext and get decrypted in place.
    pub fn enable_encryption(&mut self, secret: &[u8]) -> CodecResult<()> {
        let key = session_key(secret)?;
        let mut decryptor = Decryptor::new(&key.into(), &key.into());
        decrypt_in_place(&mut decryptor, &mut self.read_buf);
        self.decryptor = Some(decryptor);
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.decryptor.is_some()
    }

    /// A negative threshold disables compression.
    pub fn set_compression_threshold(&mut self, threshold: i32) {
        self.compression_threshold = (threshold >= 0).then_some(threshold);
    }

    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    /// Next complete frame body (packet id + data), or `None` if more bytes are needed.
    pub fn try_next_frame(&mut self) -> CodecResult<Option<BytesMut>> {
        if self.read_buf.is_empty() {
            return Ok(None);
        }

        let mut peek = &self.read_buf[..];
        let length = match peek_varint(&mut peek) {
            Ok(len) => len,
            Err(CodecError::NotEnoughData) => return Ok(None),
            Err(e) => return Err(e),
        };
        if length < 0 {
            return Err(CodecError::NegativeLength(length));
        }
        let length = length as usize;
        if length > MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLarge(length));
        }

        let varint_bytes = self.read_buf.len() - peek.len();
        if peek.remaining() < length {
            return Ok(None);
        }

        self.read_buf.advance(varint_bytes);
        let mut body = self.read_buf.split_to(length);

        if let Some(threshold) = self.compression_threshold {
            let data_length = read_varint(&mut body)?;
            if data_length != 0 {
                if data_length < threshold {
                    return Err(CodecError::BadData(format!(
                        "uncompressed size {} is below threshold {}",
                        data_length, threshold
                    )));
                }
                if data_length < 0 || data_length as usize > MAX_FRAME_LEN {
                    return Err(CodecError::FrameTooLarge(data_length as usize));
                }
                let mut decompressed = vec![0u8; data_length as usize];
                let mut decoder = ZlibDecoder::new(&body[..]);
                decoder.read_exact(&mut decompressed)?;
                body = BytesMut::from(&decompressed[..]);
            }
        }

        trace!("Read frame len={}", body.len());
        Ok(Some(body))
    }
}

fn peek_varint(buf: &mut &[u8]) -> CodecResult<i32> {
    let mut result: i32 = 0;
    for i in 0..5 {
        let Some((&byte, rest)) = buf.split_first() else {
            return Err(CodecError::NotEnoughData);
        };
        *buf = rest;
        result |= ((byte & 0x7F) as i32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(CodecError::VarIntTooBig)
}

/// Outbound half: frames, compresses and encrypts packet bodies.
pub struct FrameEncoder {
    compression_threshold: Option<i32>,
    compression_level: Compression,
    encryptor: Option<Encryptor>,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self {
            compression_threshold: None,
            compression_level: Compression::default(),
            encryptor: None,
        }
    }

    pub fn enable_encryption(&mut self, secret: &[u8]) -> CodecResult<()> {
        let key = session_key(secret)?;
        self.encryptor = Some(Encryptor::new(&key.into(), &key.into()));
        Ok(())
    }

    pub fn set_compression_threshold(&mut self, threshold: i32) {
        self.compression_threshold = (threshold >= 0).then_some(threshold);
    }

    /// zlib level 0-9; -1 picks the library default.
    pub fn set_compression_level(&mut self, level: i32) {
        self.compression_level = match level {
            0..=9 => Compression::new(level as u32),
            _ => Compression::default(),
        };
    }

    /// Build the wire bytes for one frame body (packet id + data).
    pub fn encode(&mut self, body: &[u8]) -> CodecResult<BytesMut> {
        let mut frame = BytesMut::with_capacity(body.len() + 8);

        if let Some(threshold) = self.compression_threshold {
            let uncompressed_len = body.len() as i32;
            if uncompressed_len >= threshold {
                let mut encoder = ZlibEncoder::new(Vec::new(), self.compression_level);
                encoder.write_all(body)?;
                let compressed = encoder.finish()?;

                let data_length_size = varint_len(uncompressed_len);
                let total_length = data_length_size + compressed.len();
                write_varint(&mut frame, total_length as i32);
                write_varint(&mut frame, uncompressed_len);
                frame.extend_from_slice(&compressed);
            } else {
                let total_length = 1 + body.len();
                write_varint(&mut frame, total_length as i32);
                write_varint(&mut frame, 0);
                frame.extend_from_slice(body);
            }
        } else {
            write_varint(&mut frame, body.len() as i32);
            frame.extend_from_slice(body);
        }

        if let Some(ref mut enc) = self.encryptor {
            encrypt_in_place(enc, &mut frame);
        }

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: [u8; 16] = [7u8; 16];

    fn pipe(encoder: &mut FrameEncoder, decoder: &mut FrameDecoder, body: &[u8]) -> BytesMut {
        let mut wire = encoder.encode(body).unwrap();
        decoder.queue_bytes(&mut wire);
        decoder.try_next_frame().unwrap().expect("complete frame")
    }

    #[test]
    fn test_plain_frame() {
        let mut enc = FrameEncoder::new();
        let mut dec = FrameDecoder::new();
        assert_eq!(&pipe(&mut enc, &mut dec, b"\x00hello")[..], b"\x00hello");
    }

    #[test]
    fn test_compression_threshold() {
        let mut enc = FrameEncoder::new();
        let mut dec = FrameDecoder::new();
        enc.set_compression_threshold(64);
        dec.set_compression_threshold(64);

        let small = vec![1u8; 10];
        let wire = enc.encode(&small).unwrap();
        // length, then a zero data-length marker
        assert_eq!(wire[1], 0);
        assert_eq!(&pipe(&mut enc, &mut dec, &small)[..], &small[..]);

        let big = vec![42u8; 5000];
        let wire = enc.encode(&big).unwrap();
        assert!(wire.len() < big.len());
        assert_eq!(&pipe(&mut enc, &mut dec, &big)[..], &big[..]);
    }

    #[test]
    fn test_threshold_zero_compresses_everything() {
        let mut enc = FrameEncoder::new();
        enc.set_compression_threshold(0);
        let wire = enc.encode(b"\x01").unwrap();
        let mut buf = BytesMut::from(&wire[..]);
        read_varint(&mut buf).unwrap();
        assert_eq!(read_varint(&mut buf).unwrap(), 1);
    }

    #[test]
    fn test_negative_threshold_disables() {
        let mut enc = FrameEncoder::new();
        enc.set_compression_threshold(-1);
        let wire = enc.encode(&[9u8; 300]).unwrap();
        assert_eq!(wire.len(), 2 + 300);
    }

    #[test]
    fn test_cipher_state_spans_calls() {
        let mut encryptor = Encryptor::new(&SECRET.into(), &SECRET.into());
        let mut decryptor = Decryptor::new(&SECRET.into(), &SECRET.into());
        let original: Vec<u8> = (0..=255).collect();
        let mut data = original.clone();
        encrypt_in_place(&mut encryptor, &mut data[..100]);
        encrypt_in_place(&mut encryptor, &mut data[100..]);
        assert_ne!(data, original);
        decrypt_in_place(&mut decryptor, &mut data[..37]);
        decrypt_in_place(&mut decryptor, &mut data[37..]);
        assert_eq!(data, original);
    }

    #[test]
    fn test_secret_must_be_sixteen_bytes() {
        assert!(matches!(session_key(&[1u8; 8]), Err(CodecError::BadData(_))));
        let mut enc = FrameEncoder::new();
        assert!(enc.enable_encryption(&[1u8; 32]).is_err());
        assert!(!FrameDecoder::new().is_encrypted());
    }

    #[test]
    fn test_encrypted_and_compressed_pipeline() {
        let mut enc = FrameEncoder::new();
        let mut dec = FrameDecoder::new();
        enc.set_compression_threshold(16);
        dec.set_compression_threshold(16);
        enc.enable_encryption(&SECRET).unwrap();
        dec.enable_encryption(&SECRET).unwrap();
        for len in [1usize, 15, 16, 1000] {
            let body = vec![len as u8; len];
            assert_eq!(&pipe(&mut enc, &mut dec, &body)[..], &body[..]);
        }
    }

    #[test]
    fn test_encryption_enabled_with_buffered_ciphertext() {
        let mut enc = FrameEncoder::new();
        enc.enable_encryption(&SECRET).unwrap();
        let mut wire = enc.encode(b"\x02abc").unwrap();

        let mut dec = FrameDecoder::new();
        // bytes arrive before the decoder learns about the secret
        dec.queue_bytes(&mut wire);
        dec.enable_encryption(&SECRET).unwrap();
        assert_eq!(&dec.try_next_frame().unwrap().unwrap()[..], b"\x02abc");
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut enc = FrameEncoder::new();
        let wire = enc.encode(&[5u8; 200]).unwrap();
        let mut dec = FrameDecoder::new();
        let mut first = wire[..1].to_vec();
        dec.queue_bytes(&mut first);
        assert!(dec.try_next_frame().unwrap().is_none());
        let mut rest = wire[1..].to_vec();
        dec.queue_bytes(&mut rest);
        assert_eq!(dec.try_next_frame().unwrap().unwrap().len(), 200);
    }

    #[test]
    fn test_oversize_frame_is_rejected() {
        let mut dec = FrameDecoder::new();
        let mut header = BytesMut::new();
        write_varint(&mut header, (MAX_FRAME_LEN + 1) as i32);
        dec.queue_bytes(&mut header);
        assert!(matches!(
            dec.try_next_frame(),
            Err(CodecError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_zero_length_frame_is_empty_body() {
        let mut dec = FrameDecoder::new();
        dec.queue_bytes(&mut [0u8]);
        let body = dec.try_next_frame().unwrap().unwrap();
        assert!(body.is_empty());
        let mut body = body;
        assert!(read_varint(&mut body).is_err());
    }

    #[test]
    fn test_bad_varint_is_rejected() {
        let mut dec = FrameDecoder::new();
        dec.queue_bytes(&mut [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(matches!(dec.try_next_frame(), Err(CodecError::VarIntTooBig)));
    }
}
