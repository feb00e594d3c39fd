//! Typed wire entities carried as JSON payloads inside message blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Request to open a new logical channel, sent over the control channel.
///
/// The initiating side does not know the channel id yet and fills in the
/// undefined placeholder; the responding side assigns the actual id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCreationRequest {
    #[serde(rename = "type")]
    pub channel_type: String,
    pub destination_id: String,
    pub channel_id: u64,
    pub request_id: String,
}

/// Response to a [`ChannelCreationRequest`], mirroring its request id so the
/// initiator can correlate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCreationResponse {
    pub channel_id: u64,
    pub request_id: String,
    pub success: bool,
}

/// Descriptor of a single published tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub tool_id: String,
    pub tool_version: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    /// Opaque tool metadata (input/output definitions etc.); passed through
    /// without interpretation by the protocol layer.
    #[serde(default)]
    pub metadata: Value,
}

/// Full replacement update of the tool list published by one destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptorListUpdate {
    pub destination_id: String,
    pub display_name: String,
    pub tool_descriptors: Vec<ToolDescriptor>,
}

/// Request for tool documentation, sent on a dedicated docs channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDocumentationRequest {
    pub doc_reference_id: String,
}

/// Response carrying the requested documentation, or `available: false` if
/// the provider has nothing for the reference id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDocumentationResponse {
    pub available: bool,
    #[serde(default)]
    pub data: Vec<u8>,
}

/// Request to execute a tool, sent as the first message on an exec channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionRequest {
    pub execution_id: Uuid,
    pub tool_id: String,
    pub tool_version: String,
    /// Opaque execution parameters; their encoding is owned by the tool
    /// integration layer, not by this protocol layer.
    #[serde(default)]
    pub parameters: Value,
}

impl ToolExecutionRequest {
    /// Create a request with a fresh execution id.
    pub fn new(tool_id: impl Into<String>, tool_version: impl Into<String>, parameters: Value) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            tool_id: tool_id.into(),
            tool_version: tool_version.into(),
            parameters,
        }
    }
}

/// Provider's answer to a [`ToolExecutionRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionRequestResponse {
    pub accepted: bool,
}

/// A single event emitted by the executing provider (stdout line, state
/// change, ...). Events are sent in batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionProviderEvent {
    pub event_type: String,
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

impl ToolExecutionProviderEvent {
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Final result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionResult {
    pub final_state: String,
    pub successful: bool,
}
