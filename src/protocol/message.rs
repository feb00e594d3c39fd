//! Message block and message type definitions.
//!
//! A [`MessageBlock`] is the atomic framed unit exchanged over an uplink
//! connection: a type tag plus an opaque payload. The channel id is not part
//! of the block itself; it travels in the frame header (see `codec`).

use crate::error::{Error, Result};
use crate::protocol::MAX_MESSAGE_BLOCK_DATA_LENGTH;

/// The closed set of message types, with their stable wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Handshake = 1,
    Goodbye = 2,
    ToolDescriptorListUpdate = 16,
    ChannelInit = 32,
    ChannelInitResponse = 33,
    ToolDocumentationRequest = 48,
    ToolDocumentationResponse = 49,
    ToolExecutionRequest = 64,
    ToolExecutionRequestResponse = 65,
    ToolExecutionEvents = 66,
    ToolCancellationRequest = 67,
    ToolExecutionFinished = 68,
}

impl MessageType {
    /// The wire code of this message type.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Resolve a wire code back to a message type.
    pub fn from_code(code: u8) -> Result<Self> {
        let message_type = match code {
            1 => Self::Handshake,
            2 => Self::Goodbye,
            16 => Self::ToolDescriptorListUpdate,
            32 => Self::ChannelInit,
            33 => Self::ChannelInitResponse,
            48 => Self::ToolDocumentationRequest,
            49 => Self::ToolDocumentationResponse,
            64 => Self::ToolExecutionRequest,
            65 => Self::ToolExecutionRequestResponse,
            66 => Self::ToolExecutionEvents,
            67 => Self::ToolCancellationRequest,
            68 => Self::ToolExecutionFinished,
            other => return Err(Error::UnknownMessageType(other)),
        };
        Ok(message_type)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A single framed unit of data on the wire. Immutable once constructed;
/// created on encode and consumed exactly once on decode.
#[derive(Debug, Clone)]
pub struct MessageBlock {
    message_type: MessageType,
    data: Vec<u8>,
}

impl MessageBlock {
    /// Create a message block, validating the payload size limit.
    pub fn new(message_type: MessageType, data: Vec<u8>) -> Result<Self> {
        if data.len() > MAX_MESSAGE_BLOCK_DATA_LENGTH {
            return Err(Error::MessageTooLarge {
                size: data.len(),
                max: MAX_MESSAGE_BLOCK_DATA_LENGTH,
            });
        }
        Ok(Self { message_type, data })
    }

    /// Create a message block with an empty payload.
    pub fn empty(message_type: MessageType) -> Self {
        Self {
            message_type,
            data: Vec::new(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Consume the block, yielding its payload.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_codes_roundtrip() {
        for message_type in [
            MessageType::Handshake,
            MessageType::Goodbye,
            MessageType::ToolDescriptorListUpdate,
            MessageType::ChannelInit,
            MessageType::ChannelInitResponse,
            MessageType::ToolDocumentationRequest,
            MessageType::ToolDocumentationResponse,
            MessageType::ToolExecutionRequest,
            MessageType::ToolExecutionRequestResponse,
            MessageType::ToolExecutionEvents,
            MessageType::ToolCancellationRequest,
            MessageType::ToolExecutionFinished,
        ] {
            assert_eq!(
                MessageType::from_code(message_type.code()).unwrap(),
                message_type
            );
        }
    }

    #[test]
    fn test_message_type_unknown_code() {
        let result = MessageType::from_code(200);
        assert!(matches!(result, Err(Error::UnknownMessageType(200))));
    }

    #[test]
    fn test_message_block_construction() {
        let block = MessageBlock::new(MessageType::Handshake, b"{}".to_vec()).unwrap();
        assert_eq!(block.message_type(), MessageType::Handshake);
        assert_eq!(block.data(), b"{}");
        assert_eq!(block.data_len(), 2);
    }

    #[test]
    fn test_message_block_empty() {
        let block = MessageBlock::empty(MessageType::Goodbye);
        assert_eq!(block.data_len(), 0);
    }

    #[test]
    fn test_message_block_size_limit() {
        let oversized = vec![0u8; MAX_MESSAGE_BLOCK_DATA_LENGTH + 1];
        let result = MessageBlock::new(MessageType::ToolDescriptorListUpdate, oversized);
        assert!(matches!(result, Err(Error::MessageTooLarge { .. })));

        let at_limit = vec![0u8; MAX_MESSAGE_BLOCK_DATA_LENGTH];
        assert!(MessageBlock::new(MessageType::ToolDescriptorListUpdate, at_limit).is_ok());
    }
}
