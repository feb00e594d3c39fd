//! Conversion between typed wire entities and their message block
//! representations.
//!
//! Every decode validates the actual message type against the expected one
//! first; a mismatch indicates a routing bug and is reported as a protocol
//! error rather than a deserialization failure.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::protocol::entities::{
    ChannelCreationRequest, ChannelCreationResponse, ToolDescriptorListUpdate,
    ToolDocumentationRequest, ToolDocumentationResponse, ToolExecutionProviderEvent,
    ToolExecutionRequest, ToolExecutionRequestResponse, ToolExecutionResult,
};
use crate::protocol::message::{MessageBlock, MessageType};

/// Converts between request/response entities and [`MessageBlock`]s.
pub struct MessageConverter {
    log_identity: String,
}

impl MessageConverter {
    pub fn new(log_identity: impl Into<String>) -> Self {
        Self {
            log_identity: log_identity.into(),
        }
    }

    // ===== Handshake =====

    /// Encode handshake key/value data for sending in either direction.
    pub fn encode_handshake_data(&self, data: &HashMap<String, String>) -> Result<MessageBlock> {
        self.encode_json(MessageType::Handshake, data)
    }

    /// Decode handshake key/value data.
    pub fn decode_handshake_data(&self, block: &MessageBlock) -> Result<HashMap<String, String>> {
        self.decode_json(MessageType::Handshake, block)
    }

    /// Encode a goodbye message carrying a wrapped error string.
    ///
    /// Unlike the other encoders this cannot fail: if this message cannot be
    /// built, error handling itself is broken, so an empty or missing message
    /// is replaced with a placeholder instead.
    pub fn encode_error_goodbye(&self, wrapped_message: &str) -> MessageBlock {
        let message = if wrapped_message.is_empty() {
            warn!(
                "[{}] Requested to encode an empty goodbye error message; using a placeholder",
                self.log_identity
            );
            "<no message available>"
        } else {
            wrapped_message
        };
        MessageBlock::new(MessageType::Goodbye, message.as_bytes().to_vec())
            .unwrap_or_else(|_| MessageBlock::empty(MessageType::Goodbye))
    }

    // ===== Control channel =====

    pub fn encode_tool_descriptor_list_update(
        &self,
        update: &ToolDescriptorListUpdate,
    ) -> Result<MessageBlock> {
        self.encode_json(MessageType::ToolDescriptorListUpdate, update)
    }

    pub fn decode_tool_descriptor_list_update(
        &self,
        block: &MessageBlock,
    ) -> Result<ToolDescriptorListUpdate> {
        self.decode_json(MessageType::ToolDescriptorListUpdate, block)
    }

    pub fn encode_channel_creation_request(
        &self,
        request: &ChannelCreationRequest,
    ) -> Result<MessageBlock> {
        self.encode_json(MessageType::ChannelInit, request)
    }

    pub fn decode_channel_creation_request(
        &self,
        block: &MessageBlock,
    ) -> Result<ChannelCreationRequest> {
        self.decode_json(MessageType::ChannelInit, block)
    }

    pub fn encode_channel_creation_response(
        &self,
        response: &ChannelCreationResponse,
    ) -> Result<MessageBlock> {
        self.encode_json(MessageType::ChannelInitResponse, response)
    }

    pub fn decode_channel_creation_response(
        &self,
        block: &MessageBlock,
    ) -> Result<ChannelCreationResponse> {
        self.decode_json(MessageType::ChannelInitResponse, block)
    }

    // ===== Documentation channel =====

    pub fn encode_documentation_request(
        &self,
        request: &ToolDocumentationRequest,
    ) -> Result<MessageBlock> {
        self.encode_json(MessageType::ToolDocumentationRequest, request)
    }

    pub fn decode_documentation_request(
        &self,
        block: &MessageBlock,
    ) -> Result<ToolDocumentationRequest> {
        self.decode_json(MessageType::ToolDocumentationRequest, block)
    }

    pub fn encode_documentation_response(
        &self,
        response: &ToolDocumentationResponse,
    ) -> Result<MessageBlock> {
        self.encode_json(MessageType::ToolDocumentationResponse, response)
    }

    pub fn decode_documentation_response(
        &self,
        block: &MessageBlock,
    ) -> Result<ToolDocumentationResponse> {
        self.decode_json(MessageType::ToolDocumentationResponse, block)
    }

    // ===== Execution channel =====

    pub fn encode_tool_execution_request(
        &self,
        request: &ToolExecutionRequest,
    ) -> Result<MessageBlock> {
        self.encode_json(MessageType::ToolExecutionRequest, request)
    }

    pub fn decode_tool_execution_request(
        &self,
        block: &MessageBlock,
    ) -> Result<ToolExecutionRequest> {
        self.decode_json(MessageType::ToolExecutionRequest, block)
    }

    pub fn encode_tool_execution_request_response(
        &self,
        response: &ToolExecutionRequestResponse,
    ) -> Result<MessageBlock> {
        self.encode_json(MessageType::ToolExecutionRequestResponse, response)
    }

    pub fn decode_tool_execution_request_response(
        &self,
        block: &MessageBlock,
    ) -> Result<ToolExecutionRequestResponse> {
        self.decode_json(MessageType::ToolExecutionRequestResponse, block)
    }

    pub fn encode_tool_execution_events(
        &self,
        batch: &[ToolExecutionProviderEvent],
    ) -> Result<MessageBlock> {
        self.encode_json(MessageType::ToolExecutionEvents, &batch)
    }

    pub fn decode_tool_execution_events(
        &self,
        block: &MessageBlock,
    ) -> Result<Vec<ToolExecutionProviderEvent>> {
        self.decode_json(MessageType::ToolExecutionEvents, block)
    }

    /// Create the signal requesting cancellation of a running execution.
    pub fn create_tool_cancellation_request(&self) -> MessageBlock {
        MessageBlock::empty(MessageType::ToolCancellationRequest)
    }

    pub fn encode_tool_execution_result(
        &self,
        result: &ToolExecutionResult,
    ) -> Result<MessageBlock> {
        self.encode_json(MessageType::ToolExecutionFinished, result)
    }

    pub fn decode_tool_execution_result(&self, block: &MessageBlock) -> Result<ToolExecutionResult> {
        self.decode_json(MessageType::ToolExecutionFinished, block)
    }

    // ===== Internals =====

    fn encode_json<T: Serialize + ?Sized>(
        &self,
        message_type: MessageType,
        value: &T,
    ) -> Result<MessageBlock> {
        let bytes = serde_json::to_vec(value).map_err(|e| {
            Error::protocol(format!(
                "Failed to encode JSON message of type {}: {}",
                message_type, e
            ))
        })?;
        trace!(
            "[{}] Encoded JSON message of type {} ({} bytes)",
            self.log_identity,
            message_type,
            bytes.len()
        );
        MessageBlock::new(message_type, bytes)
    }

    fn decode_json<T: DeserializeOwned>(
        &self,
        expected_type: MessageType,
        block: &MessageBlock,
    ) -> Result<T> {
        if block.message_type() != expected_type {
            return Err(Error::protocol(format!(
                "Expected a message of type {}, but received {}",
                expected_type,
                block.message_type()
            )));
        }
        serde_json::from_slice(block.data()).map_err(|e| {
            Error::protocol(format!(
                "Failed to decode JSON message of expected type {}: {}",
                expected_type, e
            ))
        })
    }
}
