//! Frame codec for the uplink wire format.
//!
//! Each frame carries: 8 bytes channel id (big-endian), 4 bytes payload
//! length (big-endian), 1 byte message type code, then the payload. The
//! announced payload length is validated against the protocol size bound
//! before any payload is buffered.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};
use crate::protocol::message::{MessageBlock, MessageType};
use crate::protocol::MAX_MESSAGE_BLOCK_DATA_LENGTH;

/// Frame header size: channel id (8) + payload length (4) + type code (1).
const FRAME_HEADER_LEN: usize = 13;

/// One decoded frame: a message block routed to a channel.
#[derive(Debug, Clone)]
pub struct Frame {
    pub channel_id: u64,
    pub block: MessageBlock,
}

impl Frame {
    pub fn new(channel_id: u64, block: MessageBlock) -> Self {
        Self { channel_id, block }
    }
}

/// Stateless encoder/decoder for uplink frames.
#[derive(Debug, Default)]
pub struct MessageBlockCodec;

impl Decoder for MessageBlockCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        // peek the header without consuming it until the full frame arrived
        let payload_len = u32::from_be_bytes([src[8], src[9], src[10], src[11]]) as usize;
        if payload_len > MAX_MESSAGE_BLOCK_DATA_LENGTH {
            return Err(Error::MessageTooLarge {
                size: payload_len,
                max: MAX_MESSAGE_BLOCK_DATA_LENGTH,
            });
        }
        if src.len() < FRAME_HEADER_LEN + payload_len {
            src.reserve(FRAME_HEADER_LEN + payload_len - src.len());
            return Ok(None);
        }

        let channel_id = src.get_u64();
        let _ = src.get_u32();
        let type_code = src.get_u8();
        let message_type = MessageType::from_code(type_code)?;
        let data = src.split_to(payload_len).to_vec();

        Ok(Some(Frame::new(
            channel_id,
            MessageBlock::new(message_type, data)?,
        )))
    }
}

impl Encoder<Frame> for MessageBlockCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let data = frame.block.data();
        dst.reserve(FRAME_HEADER_LEN + data.len());
        dst.put_u64(frame.channel_id);
        dst.put_u32(data.len() as u32);
        dst.put_u8(frame.block.message_type().code());
        dst.put_slice(data);
        Ok(())
    }
}
