use crate::{
    GeocodeReply, GeocodeRequest, ProtocolError, Result, WireMessage, LENGTH_PREFIX_SIZE,
    MAX_FRAME_SIZE,
};
use bytes::{Buf, BufMut, BytesMut};
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// Codec for length-prefixed JSON frames
///
/// Frame format: [4-byte body length (big-endian)] [UTF-8 JSON body]
///
/// `E` is the message type this side writes, `D` the type it reads.
pub struct FrameCodec<E, D> {
    _marker: PhantomData<fn(E) -> D>,
}

/// Master side: writes requests, reads replies
pub type MasterCodec = FrameCodec<GeocodeRequest, GeocodeReply>;

/// Worker side: writes replies, reads requests
pub type WorkerCodec = FrameCodec<GeocodeReply, GeocodeRequest>;

impl<E, D> FrameCodec<E, D> {
    pub fn new() -> Self {
        FrameCodec {
            _marker: PhantomData,
        }
    }
}

impl<E, D> Default for FrameCodec<E, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, D: WireMessage> Decoder for FrameCodec<E, D> {
    type Item = D;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Read length prefix without consuming
        let mut length_bytes = [0u8; LENGTH_PREFIX_SIZE];
        length_bytes.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::MessageTooLarge(length));
        }

        // Wait for complete frame
        if src.len() < LENGTH_PREFIX_SIZE + length {
            src.reserve(LENGTH_PREFIX_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let body = src.split_to(length);

        let value: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| ProtocolError::Garbled(e.to_string()))?;

        D::from_value(value).map(Some)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(ProtocolError::Truncated(buf.len())),
        }
    }
}

impl<E: WireMessage, D> Encoder<E> for FrameCodec<E, D> {
    type Error = ProtocolError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<()> {
        let body = serde_json::to_vec(&item).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;

        if body.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::MessageTooLarge(body.len()));
        }

        dst.reserve(LENGTH_PREFIX_SIZE + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);

        Ok(())
    }
}
