//! Length-delimited JSON codec for call frames.
//!
//! Wire format: 4-byte big-endian length prefix + serde JSON payload.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::Frame;
use crate::{ProtocolError, MAX_FRAME_BYTES};

const LENGTH_PREFIX_SIZE: usize = 4;

/// Codec for framing `Frame` values over a byte stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Encode one frame into a fresh buffer.
    pub fn encode_frame(frame: &Frame) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        FrameCodec.encode(frame.clone(), &mut buf)?;
        Ok(buf)
    }

    /// Decode exactly one complete frame from `bytes`.
    pub fn decode_frame(bytes: &[u8]) -> Result<Frame, ProtocolError> {
        let mut buf = BytesMut::from(bytes);
        match FrameCodec.decode(&mut buf)? {
            Some(frame) => Ok(frame),
            None => Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated frame",
            ))),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_BYTES,
            });
        }

        let total = LENGTH_PREFIX_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let body = src.split_to(length);
        let frame: Frame = serde_json::from_slice(&body)?;
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;
        if payload.len() > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_BYTES,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{PrecheckStatus, RpcRequest, RpcResponse};

    #[test]
    fn test_partial_frame_waits_for_more() {
        let frame = Frame::Request(RpcRequest::new("crypto/ping", vec![0u8; 64]));
        let mut buf = FrameCodec::encode_frame(&frame).unwrap();

        let half = buf.len() / 2;
        let mut partial = buf.split_to(half);
        assert!(FrameCodec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&buf);
        assert_eq!(FrameCodec.decode(&mut partial).unwrap(), Some(frame));
    }

    #[test]
    fn test_sequential_frames_on_one_buffer() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        for i in 0..3u8 {
            let frame = Frame::Response(RpcResponse::new(PrecheckStatus::Ok, vec![i]));
            codec.encode(frame, &mut buf).unwrap();
        }
        for i in 0..3u8 {
            match codec.decode(&mut buf).unwrap().unwrap() {
                Frame::Response(resp) => assert_eq!(resp.payload, vec![i]),
                other => panic!("unexpected frame: {other:?}"),
            }
        }
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_BYTES + 1) as u32);
        buf.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            FrameCodec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_frame_truncated() {
        let frame = Frame::Request(RpcRequest::new("crypto/ping", vec![]));
        let buf = FrameCodec::encode_frame(&frame).unwrap();
        assert!(FrameCodec::decode_frame(&buf[..buf.len() - 1]).is_err());
        assert_eq!(FrameCodec::decode_frame(&buf).unwrap(), frame);
    }
}
