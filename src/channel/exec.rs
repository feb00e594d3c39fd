//! Tool execution channel endpoints.
//!
//! The initiator sends a structured execution request and exposes a
//! [`ToolExecutionHandle`] to the caller; progress and the final result flow
//! back through a per-call [`ToolExecutionEventHandler`]. The provider side
//! accepts the request and drives the corresponding local execution through
//! the session event handler collaborator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::channel::ChannelEndpoint;
use crate::error::{Error, Result};
use crate::protocol::entities::{
    ToolExecutionProviderEvent, ToolExecutionRequest, ToolExecutionRequestResponse,
    ToolExecutionResult,
};
use crate::protocol::message::{MessageBlock, MessageType};
use crate::session::ClientSession;

/// Per-call handler for execution progress and errors, supplied by the
/// caller of `initiate_tool_execution`.
#[async_trait]
pub trait ToolExecutionEventHandler: Send + Sync {
    /// The provider accepted the execution request.
    async fn on_execution_accepted(&self);

    /// A progress event arrived from the executing provider.
    async fn on_provider_event(&self, event: ToolExecutionProviderEvent);

    /// The execution finished; this is the last callback for the exchange.
    async fn on_execution_finished(&self, result: ToolExecutionResult);

    /// An execution-specific error occurred.
    async fn on_error(&self, message: &str);
}

/// Caller-facing handle to a running remote execution.
#[derive(Clone)]
pub struct ToolExecutionHandle {
    session: Weak<ClientSession>,
    channel_id: u64,
}

impl ToolExecutionHandle {
    /// The channel the execution runs on.
    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    /// Ask the provider to cancel the running execution. Best-effort; the
    /// provider decides whether and when to honor it.
    pub async fn request_cancellation(&self) -> Result<()> {
        let Some(session) = self.session.upgrade() else {
            return Err(Error::ConnectionClosed(
                "The owning session is no longer alive".to_string(),
            ));
        };
        let block = session.converter().create_tool_cancellation_request();
        session.send_message_block(self.channel_id, block).await
    }
}

/// Initiator side of a tool execution channel.
pub struct ToolExecutionChannelInitiatorEndpoint {
    session: Weak<ClientSession>,
    channel_id: u64,
    event_handler: Arc<dyn ToolExecutionEventHandler>,
    disposed: AtomicBool,
}

impl ToolExecutionChannelInitiatorEndpoint {
    pub(crate) fn new(
        session: Weak<ClientSession>,
        channel_id: u64,
        event_handler: Arc<dyn ToolExecutionEventHandler>,
    ) -> Self {
        Self {
            session,
            channel_id,
            event_handler,
            disposed: AtomicBool::new(false),
        }
    }

    /// Send the execution request that starts the channel's exchange.
    pub(crate) async fn initiate_execution(&self, request: &ToolExecutionRequest) -> Result<()> {
        let Some(session) = self.session.upgrade() else {
            return Err(Error::ConnectionClosed(
                "The owning session is no longer alive".to_string(),
            ));
        };
        let block = session.converter().encode_tool_execution_request(request)?;
        session.send_message_block(self.channel_id, block).await
    }

    pub(crate) fn execution_handle(&self) -> ToolExecutionHandle {
        ToolExecutionHandle {
            session: self.session.clone(),
            channel_id: self.channel_id,
        }
    }
}

#[async_trait]
impl ChannelEndpoint for ToolExecutionChannelInitiatorEndpoint {
    async fn process_message(&self, block: MessageBlock) -> Result<()> {
        let Some(session) = self.session.upgrade() else {
            return Ok(());
        };
        match block.message_type() {
            MessageType::ToolExecutionRequestResponse => {
                let response: ToolExecutionRequestResponse = session
                    .converter()
                    .decode_tool_execution_request_response(&block)?;
                if response.accepted {
                    self.event_handler.on_execution_accepted().await;
                } else {
                    self.event_handler
                        .on_error("The provider declined the execution request")
                        .await;
                    session.remove_channel_endpoint(self.channel_id).await;
                }
            }
            MessageType::ToolExecutionEvents => {
                let events = session.converter().decode_tool_execution_events(&block)?;
                for event in events {
                    self.event_handler.on_provider_event(event).await;
                }
            }
            MessageType::ToolExecutionFinished => {
                let result = session.converter().decode_tool_execution_result(&block)?;
                self.event_handler.on_execution_finished(result).await;
                session.remove_channel_endpoint(self.channel_id).await;
            }
            other => {
                warn!(
                    "{} Ignoring message of unhandled type {} on execution channel {}",
                    session.log_prefix(),
                    other,
                    self.channel_id
                );
            }
        }
        Ok(())
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::Relaxed);
    }
}

/// Outbound event path handed to the provider-side execution collaborator.
#[derive(Clone)]
pub struct ProviderEventSink {
    session: Weak<ClientSession>,
    channel_id: u64,
    cancelled: Arc<AtomicBool>,
}

impl ProviderEventSink {
    /// Send one provider event to the initiating side.
    pub async fn post_event(&self, event: ToolExecutionProviderEvent) -> Result<()> {
        let Some(session) = self.session.upgrade() else {
            return Err(Error::ConnectionClosed(
                "The owning session is no longer alive".to_string(),
            ));
        };
        let block = session.converter().encode_tool_execution_events(&[event])?;
        session.send_message_block(self.channel_id, block).await
    }

    /// Whether the initiating side requested cancellation of this execution.
    pub fn cancellation_requested(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Provider side of a tool execution channel.
pub struct ToolExecutionChannelProviderEndpoint {
    session: Weak<ClientSession>,
    channel_id: u64,
    destination_id: String,
    cancelled: Arc<AtomicBool>,
    disposed: AtomicBool,
}

impl ToolExecutionChannelProviderEndpoint {
    pub(crate) fn new(session: Weak<ClientSession>, channel_id: u64, destination_id: String) -> Self {
        Self {
            session,
            channel_id,
            destination_id,
            cancelled: Arc::new(AtomicBool::new(false)),
            disposed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ChannelEndpoint for ToolExecutionChannelProviderEndpoint {
    async fn process_message(&self, block: MessageBlock) -> Result<()> {
        let Some(session) = self.session.upgrade() else {
            return Ok(());
        };
        match block.message_type() {
            MessageType::ToolExecutionRequest => {
                let request = session.converter().decode_tool_execution_request(&block)?;
                debug!(
                    "{} Accepting execution request {} for tool {} on channel {}",
                    session.log_prefix(),
                    request.execution_id,
                    request.tool_id,
                    self.channel_id
                );
                let response = ToolExecutionRequestResponse { accepted: true };
                let response_block = session
                    .converter()
                    .encode_tool_execution_request_response(&response)?;
                session
                    .send_message_block(self.channel_id, response_block)
                    .await?;

                // the execution itself runs on its own task so that further
                // channel traffic (e.g. cancellation) stays processable
                let sink = ProviderEventSink {
                    session: self.session.clone(),
                    channel_id: self.channel_id,
                    cancelled: self.cancelled.clone(),
                };
                let session_weak = self.session.clone();
                let channel_id = self.channel_id;
                tokio::spawn(async move {
                    let Some(session) = session_weak.upgrade() else {
                        return;
                    };
                    let result = session
                        .event_handler()
                        .execute_provided_tool(request, sink)
                        .await;
                    match session.converter().encode_tool_execution_result(&result) {
                        Ok(result_block) => {
                            if let Err(send_error) =
                                session.send_message_block(channel_id, result_block).await
                            {
                                error!(
                                    "{} Error sending the execution result on channel {}: {}",
                                    session.log_prefix(),
                                    channel_id,
                                    send_error
                                );
                            }
                        }
                        Err(encode_error) => {
                            error!(
                                "{} Error encoding the execution result on channel {}: {}",
                                session.log_prefix(),
                                channel_id,
                                encode_error
                            );
                        }
                    }
                    session.remove_channel_endpoint(channel_id).await;
                });
            }
            MessageType::ToolCancellationRequest => {
                debug!(
                    "{} Received a cancellation request for channel {}",
                    session.log_prefix(),
                    self.channel_id
                );
                self.cancelled.store(true, Ordering::Relaxed);
            }
            other => {
                warn!(
                    "{} Ignoring message of unhandled type {} on execution channel {} for \
                     destination {}",
                    session.log_prefix(),
                    other,
                    self.channel_id,
                    self.destination_id
                );
            }
        }
        Ok(())
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionParameters;
    use crate::error::ProtocolErrorType;
    use crate::protocol::codec::MessageBlockCodec;
    use crate::protocol::converter::MessageConverter;
    use crate::protocol::entities::ToolDescriptorListUpdate;
    use crate::session::SessionEventHandler;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use tokio_util::codec::FramedRead;

    struct EchoExecutionHandler;

    #[async_trait]
    impl SessionEventHandler for EchoExecutionHandler {
        async fn on_session_activating(&self, _namespace_id: &str, _destination_id_prefix: &str) {}
        async fn on_active_session_terminating(&self) {}
        async fn on_session_in_final_state(&self) {}
        async fn on_fatal_session_error(&self, _error_type: ProtocolErrorType, _message: &str) {}
        async fn process_tool_descriptor_list_update(&self, _update: ToolDescriptorListUpdate) {}
        async fn provide_documentation_data(
            &self,
            _destination_id: &str,
            _doc_reference_id: &str,
        ) -> Option<Vec<u8>> {
            None
        }
        async fn execute_provided_tool(
            &self,
            request: ToolExecutionRequest,
            events: ProviderEventSink,
        ) -> ToolExecutionResult {
            let _ = events
                .post_event(ToolExecutionProviderEvent::new(
                    "stdout",
                    format!("running {}", request.tool_id),
                ))
                .await;
            ToolExecutionResult {
                final_state: "FINISHED".to_string(),
                successful: true,
            }
        }
    }

    #[derive(Default)]
    struct RecordingExecutionEventHandler {
        events: StdMutex<Vec<String>>,
    }

    impl RecordingExecutionEventHandler {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ToolExecutionEventHandler for RecordingExecutionEventHandler {
        async fn on_execution_accepted(&self) {
            self.events.lock().unwrap().push("accepted".to_string());
        }
        async fn on_provider_event(&self, event: ToolExecutionProviderEvent) {
            self.events
                .lock()
                .unwrap()
                .push(format!("event:{}:{}", event.event_type, event.data));
        }
        async fn on_execution_finished(&self, result: ToolExecutionResult) {
            self.events
                .lock()
                .unwrap()
                .push(format!("finished:{}", result.final_state));
        }
        async fn on_error(&self, message: &str) {
            self.events.lock().unwrap().push(format!("error:{}", message));
        }
    }

    fn exec_session() -> (
        Arc<ClientSession>,
        FramedRead<tokio::io::DuplexStream, MessageBlockCodec>,
    ) {
        let (client_stream, relay_stream) = tokio::io::duplex(16 * 1024);
        let session = ClientSession::new(
            client_stream,
            SessionParameters::new("test"),
            Arc::new(EchoExecutionHandler),
        );
        (session, FramedRead::new(relay_stream, MessageBlockCodec))
    }

    #[tokio::test]
    async fn test_initiator_forwards_events_and_result() {
        let (session, _relay_read) = exec_session();
        let handler = Arc::new(RecordingExecutionEventHandler::default());
        let endpoint = Arc::new(ToolExecutionChannelInitiatorEndpoint::new(
            Arc::downgrade(&session),
            4,
            handler.clone(),
        ));
        session.register_channel_endpoint(4, endpoint.clone());

        let converter = MessageConverter::new("relay");
        endpoint
            .process_message(
                converter
                    .encode_tool_execution_request_response(&ToolExecutionRequestResponse {
                        accepted: true,
                    })
                    .unwrap(),
            )
            .await
            .unwrap();
        endpoint
            .process_message(
                converter
                    .encode_tool_execution_events(&[ToolExecutionProviderEvent::new(
                        "stdout", "step 1",
                    )])
                    .unwrap(),
            )
            .await
            .unwrap();
        endpoint
            .process_message(
                converter
                    .encode_tool_execution_result(&ToolExecutionResult {
                        final_state: "FINISHED".to_string(),
                        successful: true,
                    })
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            handler.events(),
            vec!["accepted", "event:stdout:step 1", "finished:FINISHED"]
        );
        // the finished message releases the channel
        assert!(!session.has_active_channel(4));
    }

    #[tokio::test]
    async fn test_initiator_reports_declined_request() {
        let (session, _relay_read) = exec_session();
        let handler = Arc::new(RecordingExecutionEventHandler::default());
        let endpoint = Arc::new(ToolExecutionChannelInitiatorEndpoint::new(
            Arc::downgrade(&session),
            4,
            handler.clone(),
        ));
        session.register_channel_endpoint(4, endpoint.clone());

        let converter = MessageConverter::new("relay");
        endpoint
            .process_message(
                converter
                    .encode_tool_execution_request_response(&ToolExecutionRequestResponse {
                        accepted: false,
                    })
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            handler.events(),
            vec!["error:The provider declined the execution request"]
        );
        assert!(!session.has_active_channel(4));
    }

    #[tokio::test]
    async fn test_provider_accepts_runs_and_reports_result() {
        let (session, mut relay_read) = exec_session();
        let endpoint = Arc::new(ToolExecutionChannelProviderEndpoint::new(
            Arc::downgrade(&session),
            6,
            "ns-1/default".to_string(),
        ));
        session.register_channel_endpoint(6, endpoint.clone());

        let converter = MessageConverter::new("relay");
        let request = ToolExecutionRequest::new("optimizer", "2.1", json!({"steps": 3}));
        endpoint
            .process_message(converter.encode_tool_execution_request(&request).unwrap())
            .await
            .unwrap();

        // acceptance first, then the event posted by the collaborator, then
        // the final result
        let frame = relay_read.next().await.unwrap().unwrap();
        let response = converter
            .decode_tool_execution_request_response(&frame.block)
            .unwrap();
        assert!(response.accepted);

        let frame = relay_read.next().await.unwrap().unwrap();
        let events = converter.decode_tool_execution_events(&frame.block).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "running optimizer");

        let frame = relay_read.next().await.unwrap().unwrap();
        let result = converter.decode_tool_execution_result(&frame.block).unwrap();
        assert!(result.successful);

        // the execution task removes the channel when done
        while session.has_active_channel(6) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_cancellation_request_sets_flag() {
        let (session, _relay_read) = exec_session();
        let endpoint = Arc::new(ToolExecutionChannelProviderEndpoint::new(
            Arc::downgrade(&session),
            6,
            "ns-1/default".to_string(),
        ));

        let sink = ProviderEventSink {
            session: Arc::downgrade(&session),
            channel_id: 6,
            cancelled: endpoint.cancelled.clone(),
        };
        assert!(!sink.cancellation_requested());

        let converter = MessageConverter::new("relay");
        endpoint
            .process_message(converter.create_tool_cancellation_request())
            .await
            .unwrap();
        assert!(sink.cancellation_requested());
    }

    #[tokio::test]
    async fn test_handle_sends_cancellation_on_its_channel() {
        let (session, mut relay_read) = exec_session();
        let handler = Arc::new(RecordingExecutionEventHandler::default());
        let endpoint = ToolExecutionChannelInitiatorEndpoint::new(
            Arc::downgrade(&session),
            4,
            handler,
        );

        let handle = endpoint.execution_handle();
        assert_eq!(handle.channel_id(), 4);
        handle.request_cancellation().await.unwrap();

        let frame = relay_read.next().await.unwrap().unwrap();
        assert_eq!(frame.channel_id, 4);
        assert_eq!(
            frame.block.message_type(),
            MessageType::ToolCancellationRequest
        );
    }
}
