//! Client-side session implementation.
//!
//! A [`ClientSession`] binds together the low-level protocol wrapper, the
//! response mapper, and the per-channel endpoints. Besides maintaining
//! session state, it converts local method calls into outgoing network
//! messages, and incoming messages into callback events.

pub mod response_mapper;
pub mod state;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::channel::docs::DocumentationChannelInitiatorEndpoint;
use crate::channel::exec::{
    ProviderEventSink, ToolExecutionChannelInitiatorEndpoint, ToolExecutionEventHandler,
    ToolExecutionHandle,
};
use crate::channel::{ChannelEndpoint, DefaultChannelEndpoint};
use crate::config::SessionParameters;
use crate::error::{ProtocolErrorType, Result};
use crate::metrics::SessionMetrics;
use crate::net::{ByteStream, LowLevelEventHandler, LowLevelProtocolWrapper};
use crate::protocol::converter::MessageConverter;
use crate::protocol::entities::{
    ChannelCreationRequest, ChannelCreationResponse, ToolDescriptorListUpdate,
    ToolDocumentationRequest, ToolExecutionRequest, ToolExecutionResult,
};
use crate::protocol::message::MessageBlock;
use crate::protocol::{
    CHANNEL_REQUEST_RESULT_TIMEOUT, CHANNEL_TYPE_DOCUMENTATION, CHANNEL_TYPE_TOOL_EXECUTION,
    DEFAULT_CHANNEL_ID, DOCUMENTATION_REQUEST_RESULT_TIMEOUT, HANDSHAKE_KEY_ASSIGNED_NAMESPACE_ID,
    HANDSHAKE_KEY_CLIENT_VERSION_INFO, HANDSHAKE_KEY_PROTOCOL_VERSION_OFFER,
    HANDSHAKE_KEY_SESSION_QUALIFIER, NAMESPACE_ID_MISSING_PLACEHOLDER, PROTOCOL_VERSION,
    SESSION_QUALIFIER_DEFAULT, UNDEFINED_CHANNEL_ID,
};

pub use response_mapper::ResponseMapper;
pub use state::{SessionState, SessionStateMachine, StateTransition};

/// Process-wide generator for local session ids; initialized once at process
/// start and never reset.
static SHARED_SESSION_ID_GENERATOR: AtomicU32 = AtomicU32::new(0);

/// Handler for session-level events and collaborator hooks, supplied by the
/// integration layer at session construction.
#[async_trait]
pub trait SessionEventHandler: Send + Sync {
    /// The session completed its handshake and is about to become active.
    async fn on_session_activating(&self, namespace_id: &str, destination_id_prefix: &str);

    /// A previously active session is shutting down.
    async fn on_active_session_terminating(&self);

    /// The session reached a terminal state; fired exactly once.
    async fn on_session_in_final_state(&self);

    /// A fatal session error occurred; fired at most once per session. The
    /// message combines the structured error type with free-text detail and
    /// is intended for direct display to users.
    async fn on_fatal_session_error(&self, error_type: ProtocolErrorType, message: &str);

    /// A tool descriptor list update arrived on the control channel.
    async fn process_tool_descriptor_list_update(&self, update: ToolDescriptorListUpdate);

    /// Collaborator hook: supply documentation bytes for a provider-side
    /// fetch, or `None` when the reference id is unknown.
    async fn provide_documentation_data(
        &self,
        destination_id: &str,
        doc_reference_id: &str,
    ) -> Option<Vec<u8>>;

    /// Collaborator hook: run a provider-side tool execution, posting
    /// progress through the supplied sink.
    async fn execute_provided_tool(
        &self,
        request: ToolExecutionRequest,
        events: ProviderEventSink,
    ) -> ToolExecutionResult;
}

/// Setup data for initiating a remote tool execution.
#[derive(Debug, Clone)]
pub struct ToolExecutionSetup {
    pub destination_id: String,
    pub execution_request: ToolExecutionRequest,
}

/// Values delivered through the session's response mapper.
pub(crate) enum PendingResponse {
    ChannelCreation(ChannelCreationResponse),
    Documentation(Option<Vec<u8>>),
}

enum DispatchItem {
    Block { channel_id: u64, block: MessageBlock },
    Shutdown,
}

/// One logical client-to-relay session, multiplexing a control channel and
/// dynamically created execution/documentation channels over a single byte
/// stream.
pub struct ClientSession {
    self_weak: Weak<ClientSession>,
    local_session_id: String,
    display_name: String,
    session_qualifier: String,
    event_handler: Arc<dyn SessionEventHandler>,
    wrapper: LowLevelProtocolWrapper,
    converter: MessageConverter,
    response_mapper: ResponseMapper<PendingResponse>,
    channel_endpoints: DashMap<u64, Arc<dyn ChannelEndpoint>>,
    default_endpoint: Arc<DefaultChannelEndpoint>,
    state_machine: SessionStateMachine,
    assigned_namespace_id: StdMutex<Option<String>>,
    request_id_counter: AtomicU32,
    dispatch_tx: mpsc::UnboundedSender<DispatchItem>,
    dispatch_rx: Mutex<Option<mpsc::UnboundedReceiver<DispatchItem>>>,
    metrics: Arc<SessionMetrics>,
}

impl ClientSession {
    /// Create the client side of a logical uplink session over the given
    /// stream. The session does not touch the stream until
    /// [`run_session`](Self::run_session) is called.
    pub fn new(
        stream: impl ByteStream + 'static,
        parameters: SessionParameters,
        event_handler: Arc<dyn SessionEventHandler>,
    ) -> Arc<Self> {
        let session_number = SHARED_SESSION_ID_GENERATOR.fetch_add(1, Ordering::Relaxed) + 1;
        let local_session_id = format!("c{}", session_number);
        let display_name = parameters.display_name.clone();
        let session_qualifier = parameters
            .session_qualifier
            .clone()
            .unwrap_or_else(|| SESSION_QUALIFIER_DEFAULT.to_string());
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        Arc::new_cyclic(|self_weak: &Weak<ClientSession>| {
            let low_level_handler = Arc::new(LowLevelEventHandlerImpl {
                session: self_weak.clone(),
                parameters,
                dispatch_tx: dispatch_tx.clone(),
            });
            let wrapper =
                LowLevelProtocolWrapper::new(stream, low_level_handler, &local_session_id);
            ClientSession {
                self_weak: self_weak.clone(),
                converter: MessageConverter::new(&local_session_id),
                local_session_id,
                display_name,
                session_qualifier,
                event_handler,
                wrapper,
                response_mapper: ResponseMapper::new(),
                channel_endpoints: DashMap::new(),
                default_endpoint: Arc::new(DefaultChannelEndpoint::new(self_weak.clone())),
                state_machine: SessionStateMachine::new(),
                assigned_namespace_id: StdMutex::new(None),
                request_id_counter: AtomicU32::new(0),
                dispatch_tx,
                dispatch_rx: Mutex::new(Some(dispatch_rx)),
                metrics: SessionMetrics::new(),
            }
        })
    }

    /// Run the session until it terminates: handshake first, then the
    /// message dispatch loop. Returns `true` on clean shutdown, `false` on
    /// refusal or abnormal termination.
    pub async fn run_session(&self) -> bool {
        let dispatch_rx = match self.dispatch_rx.lock().await.take() {
            Some(receiver) => receiver,
            None => {
                error!(
                    "{} Ignoring attempt to run the same session twice",
                    self.log_prefix()
                );
                return false;
            }
        };
        info!(
            "{} Starting session '{}'",
            self.log_prefix(),
            self.display_name
        );
        self.apply_transition(SessionState::HandshakeInProgress).await;
        self.metrics.inc_sessions_started();

        // slow endpoint processing must never keep the stream reader from
        // noticing connection-level events, so dispatch runs on its own task
        let worker = match self.self_weak.upgrade() {
            Some(session) => tokio::spawn(async move { session.run_dispatch_loop(dispatch_rx).await }),
            None => return false,
        };

        self.wrapper.run_session().await;

        let _ = self.dispatch_tx.send(DispatchItem::Shutdown);
        let _ = worker.await;
        self.dispose_all_channel_endpoints().await;
        self.state() == SessionState::CleanShutdown
    }

    /// Send a tool descriptor list update on the control channel.
    pub async fn publish_tool_descriptor_list_update(
        &self,
        update: &ToolDescriptorListUpdate,
    ) -> Result<()> {
        let block = self.converter.encode_tool_descriptor_list_update(update)?;
        self.send_message_block(DEFAULT_CHANNEL_ID, block).await
    }

    /// Initiate a remote tool execution: negotiate an exec channel, start
    /// the execution exchange on it, and return a handle for further
    /// interaction. Any failure yields `None`; execution-specific errors are
    /// additionally reported through the supplied event handler.
    pub async fn initiate_tool_execution(
        &self,
        setup: ToolExecutionSetup,
        execution_event_handler: Arc<dyn ToolExecutionEventHandler>,
    ) -> Option<ToolExecutionHandle> {
        let response = self
            .perform_channel_creation_request(
                &setup.destination_id,
                CHANNEL_TYPE_TOOL_EXECUTION,
                "tool execution",
            )
            .await?;
        let channel_id = response.channel_id;

        let endpoint = Arc::new(ToolExecutionChannelInitiatorEndpoint::new(
            self.self_weak.clone(),
            channel_id,
            execution_event_handler.clone(),
        ));
        self.register_channel_endpoint(channel_id, endpoint.clone());

        if let Err(error) = endpoint.initiate_execution(&setup.execution_request).await {
            execution_event_handler
                .on_error(&format!(
                    "Error while initiating the tool execution: {}",
                    error
                ))
                .await;
            self.remove_channel_endpoint(channel_id).await;
            return None;
        }
        self.metrics.inc_channels_opened();
        Some(endpoint.execution_handle())
    }

    /// Fetch documentation data from a remote destination. Negotiates a docs
    /// channel, sends the request, and waits (bounded) for the response on
    /// that channel. Returns `None` on refusal, timeout, or absence of the
    /// referenced documentation.
    pub async fn fetch_documentation_data(
        &self,
        destination_id: &str,
        doc_reference_id: &str,
    ) -> Option<Vec<u8>> {
        let response = self
            .perform_channel_creation_request(
                destination_id,
                CHANNEL_TYPE_DOCUMENTATION,
                "documentation fetching",
            )
            .await?;
        let channel_id = response.channel_id;
        let channel_key = format!("channel_{}", channel_id);

        // the channel is single-purpose, so the response is correlated by a
        // channel-scoped key instead of a request id
        self.register_channel_endpoint(
            channel_id,
            Arc::new(DocumentationChannelInitiatorEndpoint::new(
                self.self_weak.clone(),
                channel_id,
            )),
        );
        self.metrics.inc_channels_opened();

        let pending = self
            .response_mapper
            .register_request(channel_key.clone(), DOCUMENTATION_REQUEST_RESULT_TIMEOUT);

        let request = ToolDocumentationRequest {
            doc_reference_id: doc_reference_id.to_string(),
        };
        let send_result = match self.converter.encode_documentation_request(&request) {
            Ok(block) => self.send_message_block(channel_id, block).await,
            Err(error) => Err(error),
        };
        if let Err(error) = send_result {
            error!(
                "{} Error retrieving documentation data for id {} from {}: {}",
                self.log_prefix(),
                doc_reference_id,
                destination_id,
                error
            );
            self.response_mapper.cancel_request(&channel_key);
            self.remove_channel_endpoint(channel_id).await;
            return None;
        }

        let result = pending.await;
        self.remove_channel_endpoint(channel_id).await;
        match result {
            Some(PendingResponse::Documentation(data)) => data,
            Some(_) => {
                error!(
                    "{} Internal error: unexpected response kind for a documentation request",
                    self.log_prefix()
                );
                None
            }
            None => None,
        }
    }

    /// Send a regular goodbye and close the outgoing stream, moving the
    /// session towards clean shutdown.
    pub async fn close(&self) {
        self.wrapper.close_outgoing_stream().await;
        self.apply_transition(SessionState::CleanShutdown).await;
    }

    // ===== Accessors =====

    pub fn local_session_id(&self) -> &str {
        &self.local_session_id
    }

    pub fn state(&self) -> SessionState {
        self.state_machine.current()
    }

    /// The namespace id assigned by the relay during the handshake; a
    /// placeholder marker if the handshake response did not include one.
    pub fn assigned_namespace_id(&self) -> Option<String> {
        self.assigned_namespace_id
            .lock()
            .expect("namespace id lock poisoned")
            .clone()
    }

    /// The prefix for destination ids reachable through this session.
    pub fn destination_id_prefix(&self) -> String {
        let namespace = self
            .assigned_namespace_id()
            .unwrap_or_else(|| NAMESPACE_ID_MISSING_PLACEHOLDER.to_string());
        format!("{}/{}", namespace.trim_end_matches('/'), self.session_qualifier)
    }

    /// Whether an endpoint is currently registered for the given channel.
    pub fn has_active_channel(&self, channel_id: u64) -> bool {
        self.channel_endpoints.contains_key(&channel_id)
    }

    /// Number of currently active non-default channels.
    pub fn active_channel_count(&self) -> usize {
        self.channel_endpoints.len()
    }

    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.metrics
    }

    // ===== Crate-internal plumbing used by the channel endpoints =====

    pub(crate) fn converter(&self) -> &MessageConverter {
        &self.converter
    }

    pub(crate) fn event_handler(&self) -> &Arc<dyn SessionEventHandler> {
        &self.event_handler
    }

    pub(crate) fn response_mapper(&self) -> &ResponseMapper<PendingResponse> {
        &self.response_mapper
    }

    #[cfg(test)]
    pub(crate) fn default_channel_endpoint(&self) -> &Arc<DefaultChannelEndpoint> {
        &self.default_endpoint
    }

    pub(crate) fn log_prefix(&self) -> String {
        match self.assigned_namespace_id() {
            Some(namespace) => format!(
                "[{}/{}]",
                self.local_session_id,
                namespace.trim_end_matches('/')
            ),
            None => format!("[{}]", self.local_session_id),
        }
    }

    pub(crate) async fn send_message_block(&self, channel_id: u64, block: MessageBlock) -> Result<()> {
        let result = self
            .wrapper
            .enqueue_message_block_for_sending(channel_id, block)
            .await;
        if result.is_ok() {
            self.metrics.inc_blocks_sent();
        }
        result
    }

    pub(crate) fn register_channel_endpoint(
        &self,
        channel_id: u64,
        endpoint: Arc<dyn ChannelEndpoint>,
    ) {
        if self.channel_endpoints.insert(channel_id, endpoint).is_some() {
            warn!(
                "{} Replacing an existing endpoint registration for channel {}",
                self.log_prefix(),
                channel_id
            );
        }
    }

    pub(crate) async fn remove_channel_endpoint(&self, channel_id: u64) {
        if let Some((_, endpoint)) = self.channel_endpoints.remove(&channel_id) {
            endpoint.dispose().await;
        }
    }

    // ===== Internals =====

    fn generate_request_id(&self) -> String {
        (self.request_id_counter.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    /// Run the channel creation protocol for the given channel type and wait
    /// (bounded) for the response. `None` on timeout or refusal.
    pub(crate) async fn perform_channel_creation_request(
        &self,
        destination_id: &str,
        channel_type: &str,
        intention: &str,
    ) -> Option<ChannelCreationResponse> {
        let request_id = self.generate_request_id();
        let request = ChannelCreationRequest {
            channel_type: channel_type.to_string(),
            destination_id: destination_id.to_string(),
            channel_id: UNDEFINED_CHANNEL_ID,
            request_id: request_id.clone(),
        };
        let block = match self.converter.encode_channel_creation_request(&request) {
            Ok(block) => block,
            Err(error) => {
                error!(
                    "{} Error encoding a channel creation request for {}: {}",
                    self.log_prefix(),
                    intention,
                    error
                );
                return None;
            }
        };

        // register the waiter before the request leaves, so an immediate
        // response cannot be lost
        let pending = self
            .response_mapper
            .register_request(request_id.clone(), CHANNEL_REQUEST_RESULT_TIMEOUT);
        if let Err(error) = self.send_message_block(DEFAULT_CHANNEL_ID, block).await {
            error!(
                "{} Error opening a message channel for {}: {}",
                self.log_prefix(),
                intention,
                error
            );
            self.response_mapper.cancel_request(&request_id);
            return None;
        }

        match pending.await {
            Some(PendingResponse::ChannelCreation(response)) if response.success => {
                debug!(
                    "{} Successfully opened channel {} for {}",
                    self.log_prefix(),
                    response.channel_id,
                    intention
                );
                Some(response)
            }
            Some(PendingResponse::ChannelCreation(_)) => {
                warn!(
                    "{} Failed to open a message channel for {}; if you have access to the \
                     relay's log files, you may inspect them for details",
                    self.log_prefix(),
                    intention
                );
                self.metrics.inc_channel_requests_failed();
                None
            }
            Some(_) => {
                error!(
                    "{} Internal error: unexpected response kind for a channel creation request",
                    self.log_prefix()
                );
                None
            }
            None => {
                warn!(
                    "{} Attempted to open a message channel for {}, but received no response \
                     within the given timeout",
                    self.log_prefix(),
                    intention
                );
                self.metrics.inc_channel_requests_failed();
                None
            }
        }
    }

    async fn run_dispatch_loop(&self, mut dispatch_rx: mpsc::UnboundedReceiver<DispatchItem>) {
        while let Some(item) = dispatch_rx.recv().await {
            let (channel_id, block) = match item {
                DispatchItem::Block { channel_id, block } => (channel_id, block),
                DispatchItem::Shutdown => break,
            };
            self.metrics.inc_blocks_received();
            let message_type = block.message_type();

            let endpoint: Option<Arc<dyn ChannelEndpoint>> = if channel_id == DEFAULT_CHANNEL_ID {
                Some(self.default_endpoint.clone())
            } else {
                self.channel_endpoints
                    .get(&channel_id)
                    .map(|entry| entry.value().clone())
            };
            let Some(endpoint) = endpoint else {
                error!(
                    "{} Received a message of type {} for channel {} but found no registered \
                     endpoint to handle it",
                    self.log_prefix(),
                    message_type,
                    channel_id
                );
                continue;
            };
            if let Err(error) = endpoint.process_message(block).await {
                // endpoint failures drop the individual message; they do not
                // terminate the session
                error!(
                    "{} Error while processing incoming message of type {}: {}",
                    self.log_prefix(),
                    message_type,
                    error
                );
            }
        }
    }

    async fn apply_transition(&self, new_state: SessionState) {
        let Some(change) = self.state_machine.transition_to(new_state) else {
            return;
        };
        debug!(
            "{} Session state changed from {:?} to {:?}",
            self.log_prefix(),
            change.old_state,
            change.new_state
        );
        if change.new_state == SessionState::Active {
            let namespace = self
                .assigned_namespace_id()
                .unwrap_or_else(|| NAMESPACE_ID_MISSING_PLACEHOLDER.to_string());
            self.event_handler
                .on_session_activating(&namespace, &self.destination_id_prefix())
                .await;
        }
        if change.old_state == SessionState::Active {
            self.event_handler.on_active_session_terminating().await;
        }
        if change.reached_terminal {
            self.event_handler.on_session_in_final_state().await;
        }
    }

    fn set_assigned_namespace_id(&self, namespace_id: &str) {
        *self
            .assigned_namespace_id
            .lock()
            .expect("namespace id lock poisoned") = Some(namespace_id.to_string());
    }

    async fn handle_handshake_complete(&self) {
        self.apply_transition(SessionState::Active).await;
    }

    async fn handle_handshake_failed(&self, error_type: ProtocolErrorType, raw_message: &str) {
        self.event_handler
            .on_fatal_session_error(error_type, raw_message)
            .await;
        self.metrics.inc_fatal_errors();
        self.apply_transition(SessionState::SessionRefusedOrHandshakeError)
            .await;
    }

    async fn handle_regular_remote_goodbye(&self) {
        // echo a goodbye best-effort, then complete the shutdown
        self.wrapper.close_outgoing_stream().await;
        self.apply_transition(SessionState::CleanShutdown).await;
    }

    pub(crate) async fn handle_fatal_error(&self, error_type: ProtocolErrorType, raw_message: &str) {
        if !self.state().is_terminal() {
            self.event_handler
                .on_fatal_session_error(
                    error_type,
                    &format!("Connection closed by the remote side: {}", raw_message),
                )
                .await;
            self.metrics.inc_fatal_errors();
        }
        let target = match self.state() {
            SessionState::HandshakeInProgress => SessionState::SessionRefusedOrHandshakeError,
            _ => SessionState::ErrorShutdown,
        };
        self.apply_transition(target).await;
        self.wrapper.close_outgoing_stream().await;
    }

    async fn handle_incoming_stream_closed(&self) {
        if self.state() == SessionState::Active {
            self.handle_fatal_error(
                ProtocolErrorType::LowLevelConnectionError,
                "The remote side closed the connection without a goodbye message",
            )
            .await;
        } else {
            debug!(
                "{} Incoming stream closed in state {:?}",
                self.log_prefix(),
                self.state()
            );
        }
    }

    async fn dispose_all_channel_endpoints(&self) {
        let channel_ids: Vec<u64> = self
            .channel_endpoints
            .iter()
            .map(|entry| *entry.key())
            .collect();
        for channel_id in channel_ids {
            self.remove_channel_endpoint(channel_id).await;
        }
        self.default_endpoint.dispose().await;
    }
}

/// Adapter translating connection-level events into session behavior.
struct LowLevelEventHandlerImpl {
    session: Weak<ClientSession>,
    parameters: SessionParameters,
    dispatch_tx: mpsc::UnboundedSender<DispatchItem>,
}

#[async_trait]
impl LowLevelEventHandler for LowLevelEventHandlerImpl {
    fn provide_handshake_data(&self) -> HashMap<String, String> {
        let mut data = HashMap::new();
        data.insert(
            HANDSHAKE_KEY_PROTOCOL_VERSION_OFFER.to_string(),
            PROTOCOL_VERSION.to_string(),
        );
        if let Some(client_version) = &self.parameters.client_version_info {
            data.insert(
                HANDSHAKE_KEY_CLIENT_VERSION_INFO.to_string(),
                client_version.clone(),
            );
        }
        let session_qualifier = self
            .parameters
            .session_qualifier
            .clone()
            .unwrap_or_else(|| SESSION_QUALIFIER_DEFAULT.to_string());
        data.insert(HANDSHAKE_KEY_SESSION_QUALIFIER.to_string(), session_qualifier);

        // development/test fields override everything generated above
        for (key, value) in &self.parameters.custom_handshake_data {
            data.insert(key.clone(), value.clone());
        }
        data
    }

    fn process_handshake_response(&self, data: &HashMap<String, String>) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        match data
            .get(HANDSHAKE_KEY_ASSIGNED_NAMESPACE_ID)
            .filter(|value| !value.is_empty())
        {
            Some(namespace_id) => session.set_assigned_namespace_id(namespace_id),
            None => {
                warn!(
                    "{} The handshake response did not include a namespace id; continuing with \
                     a placeholder",
                    session.log_prefix()
                );
                session.set_assigned_namespace_id(NAMESPACE_ID_MISSING_PLACEHOLDER);
            }
        }
    }

    async fn on_handshake_complete(&self) {
        if let Some(session) = self.session.upgrade() {
            session.handle_handshake_complete().await;
        }
    }

    async fn on_handshake_failed_or_refused(
        &self,
        error_type: ProtocolErrorType,
        raw_message: String,
    ) {
        if let Some(session) = self.session.upgrade() {
            session.handle_handshake_failed(error_type, &raw_message).await;
        }
    }

    async fn on_message_block(&self, channel_id: u64, block: MessageBlock) {
        if self
            .dispatch_tx
            .send(DispatchItem::Block { channel_id, block })
            .is_err()
        {
            warn!("Dropping an incoming message received after dispatch shutdown");
        }
    }

    async fn on_regular_goodbye(&self) {
        if let Some(session) = self.session.upgrade() {
            session.handle_regular_remote_goodbye().await;
        }
    }

    async fn on_error_goodbye(&self, error_type: ProtocolErrorType, raw_message: String) {
        if let Some(session) = self.session.upgrade() {
            session.handle_fatal_error(error_type, &raw_message).await;
        }
    }

    async fn on_incoming_stream_closed(&self) {
        if let Some(session) = self.session.upgrade() {
            session.handle_incoming_stream_closed().await;
        }
    }

    async fn on_stream_read_error(&self, error: crate::error::Error) {
        if let Some(session) = self.session.upgrade() {
            error!(
                "{} Error reading from stream: {}",
                session.log_prefix(),
                error
            );
            session
                .handle_fatal_error(ProtocolErrorType::LowLevelConnectionError, &error.to_string())
                .await;
        }
    }

    async fn on_stream_write_error(&self, error: crate::error::Error) {
        if let Some(session) = self.session.upgrade() {
            error!(
                "{} Error writing to stream: {}",
                session.log_prefix(),
                error
            );
            session
                .handle_fatal_error(ProtocolErrorType::LowLevelConnectionError, &error.to_string())
                .await;
        }
    }

    async fn on_non_protocol_error(&self, error: crate::error::Error) {
        if let Some(session) = self.session.upgrade() {
            session
                .handle_fatal_error(ProtocolErrorType::InternalClientError, &error.to_string())
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl SessionEventHandler for NoopHandler {
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
            _request: ToolExecutionRequest,
            _events: ProviderEventSink,
        ) -> ToolExecutionResult {
            ToolExecutionResult {
                final_state: "REJECTED".to_string(),
                successful: false,
            }
        }
    }

    fn test_session() -> Arc<ClientSession> {
        let (client_stream, _relay_stream) = tokio::io::duplex(4096);
        ClientSession::new(
            client_stream,
            SessionParameters::new("test"),
            Arc::new(NoopHandler),
        )
    }

    #[tokio::test]
    async fn test_session_ids_are_unique_and_monotonic() {
        let first = test_session();
        let second = test_session();
        assert_ne!(first.local_session_id(), second.local_session_id());
        assert!(first.local_session_id().starts_with('c'));
        assert!(second.local_session_id().starts_with('c'));
    }

    #[tokio::test]
    async fn test_request_ids_are_monotonic() {
        let session = test_session();
        assert_eq!(session.generate_request_id(), "1");
        assert_eq!(session.generate_request_id(), "2");
        assert_eq!(session.generate_request_id(), "3");
    }

    #[tokio::test]
    async fn test_new_session_starts_in_initial_state() {
        let session = test_session();
        assert_eq!(session.state(), SessionState::Initial);
        assert!(session.assigned_namespace_id().is_none());
        assert_eq!(session.active_channel_count(), 0);
    }

    #[tokio::test]
    async fn test_destination_id_prefix_uses_placeholder_without_namespace() {
        let session = test_session();
        assert!(session
            .destination_id_prefix()
            .starts_with("<error: handshake data did not include a namespace id>"));

        session.set_assigned_namespace_id("ns-42");
        assert_eq!(session.destination_id_prefix(), "ns-42/default");
    }

    #[tokio::test]
    async fn test_publish_tool_descriptor_list_update_sends_block() {
        // Keep the relay end of the duplex alive for the duration of the test
        // so the block can be written into the buffer (see session_with_relay_reader
        // in the channel tests for the same pattern).
        let (client_stream, _relay_stream) = tokio::io::duplex(4096);
        let session = ClientSession::new(
            client_stream,
            SessionParameters::new("test"),
            Arc::new(NoopHandler),
        );
        let update = ToolDescriptorListUpdate {
            destination_id: "ns-42/default".to_string(),
            display_name: "local tools".to_string(),
            tool_descriptors: vec![],
        };
        session
            .publish_tool_descriptor_list_update(&update)
            .await
            .unwrap();
        assert_eq!(session.metrics().snapshot().blocks_sent, 1);
    }
}
