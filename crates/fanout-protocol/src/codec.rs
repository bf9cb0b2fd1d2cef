use crate::{Envelope, EnvelopeKind, ProtocolError, Request, Result, MAX_ENVELOPE_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use fanout_core::{RemoteError, Value};
use tokio_util::codec::{Decoder, Encoder};

/// Codec for encoding/decoding envelopes with length-prefixed framing
///
/// Frame format: [4-byte length (big-endian)] [1-byte envelope kind] [MessagePack payload]
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeCodec;

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Need at least the length prefix
        if src.len() < 4 {
            return Ok(None);
        }

        // Read length prefix without consuming
        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[0..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length == 0 {
            return Err(ProtocolError::EmptyFrame);
        }
        if length > MAX_ENVELOPE_SIZE {
            return Err(ProtocolError::EnvelopeTooLarge(length));
        }

        // Wait for complete envelope
        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let kind_byte = src.get_u8();
        let payload = src.split_to(length - 1);

        let kind = EnvelopeKind::from_u8(kind_byte)
            .ok_or(ProtocolError::InvalidEnvelopeKind(kind_byte))?;

        let envelope = match kind {
            EnvelopeKind::Request => {
                let req: Request = rmp_serde::from_slice(&payload)?;
                Envelope::Request(req)
            }
            EnvelopeKind::Ok => {
                let value: Value = rmp_serde::from_slice(&payload)?;
                Envelope::Ok(value)
            }
            EnvelopeKind::Err => {
                let err: RemoteError = rmp_serde::from_slice(&payload)?;
                Envelope::Err(err)
            }
        };

        Ok(Some(envelope))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<()> {
        let payload = match &item {
            Envelope::Request(req) => rmp_serde::to_vec_named(req)?,
            Envelope::Ok(value) => rmp_serde::to_vec_named(value)?,
            Envelope::Err(err) => rmp_serde::to_vec_named(err)?,
        };

        let total_length = 1 + payload.len();
        if total_length > MAX_ENVELOPE_SIZE {
            return Err(ProtocolError::EnvelopeTooLarge(total_length));
        }

        dst.reserve(4 + total_length);
        dst.put_u32(total_length as u32);
        dst.put_u8(item.kind().as_u8());
        dst.put_slice(&payload);

        Ok(())
    }
}
