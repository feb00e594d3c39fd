//! Channel endpoints: per-channel inbound message handling.
//!
//! Every active channel of a session is represented by one endpoint. The
//! default/control endpoint (channel id 0) exists for the whole session
//! lifetime; documentation and execution endpoints are created through the
//! channel creation protocol and disposed when their exchange completes.

pub mod docs;
pub mod exec;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::protocol::entities::ChannelCreationResponse;
use crate::protocol::message::{MessageBlock, MessageType};
use crate::protocol::{CHANNEL_TYPE_DOCUMENTATION, CHANNEL_TYPE_TOOL_EXECUTION, DEFAULT_CHANNEL_ID};
use crate::session::{ClientSession, PendingResponse};

use docs::DocumentationChannelProviderEndpoint;
use exec::ToolExecutionChannelProviderEndpoint;

/// The message-processing contract shared by all channel endpoints.
#[async_trait]
pub trait ChannelEndpoint: Send + Sync {
    /// Process an inbound message block for this endpoint's channel. Errors
    /// are logged by the dispatcher; they drop the individual message and do
    /// not terminate the session.
    async fn process_message(&self, block: MessageBlock) -> Result<()>;

    /// Release resources held by this endpoint. Idempotent.
    async fn dispose(&self);
}

/// The client-side end of the default channel. Default channels are used for
/// general communication, for example the publication of tool descriptors
/// and the management of non-default channels.
pub struct DefaultChannelEndpoint {
    session: Weak<ClientSession>,
}

impl DefaultChannelEndpoint {
    pub(crate) fn new(session: Weak<ClientSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ChannelEndpoint for DefaultChannelEndpoint {
    async fn process_message(&self, block: MessageBlock) -> Result<()> {
        let Some(session) = self.session.upgrade() else {
            return Ok(());
        };
        match block.message_type() {
            MessageType::ToolDescriptorListUpdate => {
                let update = session
                    .converter()
                    .decode_tool_descriptor_list_update(&block)?;
                session
                    .event_handler()
                    .process_tool_descriptor_list_update(update)
                    .await;
            }
            MessageType::ChannelInit => {
                let request = session.converter().decode_channel_creation_request(&block)?;
                // accept channels of the known types; the remote side has
                // already assigned the channel id
                let channel_id = request.channel_id;
                match request.channel_type.as_str() {
                    CHANNEL_TYPE_DOCUMENTATION => {
                        session.register_channel_endpoint(
                            channel_id,
                            Arc::new(DocumentationChannelProviderEndpoint::new(
                                self.session.clone(),
                                channel_id,
                                request.destination_id.clone(),
                            )),
                        );
                    }
                    CHANNEL_TYPE_TOOL_EXECUTION => {
                        session.register_channel_endpoint(
                            channel_id,
                            Arc::new(ToolExecutionChannelProviderEndpoint::new(
                                self.session.clone(),
                                channel_id,
                                request.destination_id.clone(),
                            )),
                        );
                    }
                    other => {
                        // no refusal response is sent; the initiating side
                        // observes a timeout
                        error!(
                            "{} Ignoring channel request for invalid type {}",
                            session.log_prefix(),
                            other
                        );
                        return Ok(());
                    }
                }
                debug!(
                    "{} Accepting offered message channel {} of type '{}'",
                    session.log_prefix(),
                    channel_id,
                    request.channel_type
                );
                session.metrics().inc_channels_opened();
                // the request id must be mirrored back to allow association
                // at the initiating side
                let response = ChannelCreationResponse {
                    channel_id,
                    request_id: request.request_id,
                    success: true,
                };
                let response_block = session
                    .converter()
                    .encode_channel_creation_response(&response)?;
                session
                    .send_message_block(DEFAULT_CHANNEL_ID, response_block)
                    .await?;
            }
            MessageType::ChannelInitResponse => {
                let response = session
                    .converter()
                    .decode_channel_creation_response(&block)?;
                let request_id = response.request_id.clone();
                session
                    .response_mapper()
                    .register_response(&request_id, PendingResponse::ChannelCreation(response));
            }
            other => {
                warn!(
                    "{} Ignoring message of unhandled type {}",
                    session.log_prefix(),
                    other
                );
            }
        }
        Ok(())
    }

    async fn dispose(&self) {}
}
