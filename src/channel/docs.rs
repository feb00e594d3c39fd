//! Documentation channel endpoints.
//!
//! Documentation channels are single-purpose and short-lived: one request,
//! one response, then the channel is disposed. The initiator therefore
//! correlates the response by a channel-scoped key instead of a request id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::channel::ChannelEndpoint;
use crate::error::Result;
use crate::protocol::entities::ToolDocumentationResponse;
use crate::protocol::message::{MessageBlock, MessageType};
use crate::session::{ClientSession, PendingResponse};

/// Initiator side: funnels the documentation response into the session's
/// response mapper under the key `"channel_<id>"`.
pub struct DocumentationChannelInitiatorEndpoint {
    session: Weak<ClientSession>,
    channel_id: u64,
    disposed: AtomicBool,
}

impl DocumentationChannelInitiatorEndpoint {
    pub(crate) fn new(session: Weak<ClientSession>, channel_id: u64) -> Self {
        Self {
            session,
            channel_id,
            disposed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ChannelEndpoint for DocumentationChannelInitiatorEndpoint {
    async fn process_message(&self, block: MessageBlock) -> Result<()> {
        let Some(session) = self.session.upgrade() else {
            return Ok(());
        };
        if block.message_type() != MessageType::ToolDocumentationResponse {
            warn!(
                "{} Ignoring message of unhandled type {} on documentation channel {}",
                session.log_prefix(),
                block.message_type(),
                self.channel_id
            );
            return Ok(());
        }
        let response: ToolDocumentationResponse =
            session.converter().decode_documentation_response(&block)?;
        let data = if response.available {
            Some(response.data)
        } else {
            None
        };
        session.response_mapper().register_response(
            &format!("channel_{}", self.channel_id),
            PendingResponse::Documentation(data),
        );
        Ok(())
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::Relaxed);
    }
}

/// Provider side: answers the expected documentation request from the
/// session event handler's document source and disposes itself afterwards.
pub struct DocumentationChannelProviderEndpoint {
    session: Weak<ClientSession>,
    channel_id: u64,
    destination_id: String,
    disposed: AtomicBool,
}

impl DocumentationChannelProviderEndpoint {
    pub(crate) fn new(session: Weak<ClientSession>, channel_id: u64, destination_id: String) -> Self {
        Self {
            session,
            channel_id,
            destination_id,
            disposed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ChannelEndpoint for DocumentationChannelProviderEndpoint {
    async fn process_message(&self, block: MessageBlock) -> Result<()> {
        let Some(session) = self.session.upgrade() else {
            return Ok(());
        };
        if block.message_type() != MessageType::ToolDocumentationRequest {
            warn!(
                "{} Ignoring message of unhandled type {} on documentation channel {}",
                session.log_prefix(),
                block.message_type(),
                self.channel_id
            );
            return Ok(());
        }
        let request = session.converter().decode_documentation_request(&block)?;
        debug!(
            "{} Serving documentation request for id {} on channel {}",
            session.log_prefix(),
            request.doc_reference_id,
            self.channel_id
        );
        let data = session
            .event_handler()
            .provide_documentation_data(&self.destination_id, &request.doc_reference_id)
            .await;
        let response = ToolDocumentationResponse {
            available: data.is_some(),
            data: data.unwrap_or_default(),
        };
        let response_block = session.converter().encode_documentation_response(&response)?;
        session
            .send_message_block(self.channel_id, response_block)
            .await?;

        // single-shot exchange complete; the channel is no longer needed
        session.remove_channel_endpoint(self.channel_id).await;
        Ok(())
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::Relaxed);
    }
}
