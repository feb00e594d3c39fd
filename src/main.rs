//! Uplink client binary: connects to a relay, runs a session, and logs the
//! tool descriptor updates it receives.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::net::TcpStream;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use uplink_rs::channel::exec::ProviderEventSink;
use uplink_rs::config::{Args, SessionParameters};
use uplink_rs::protocol::entities::{
    ToolDescriptorListUpdate, ToolExecutionRequest, ToolExecutionResult,
};
use uplink_rs::{ClientSession, ProtocolErrorType, SessionEventHandler, VERSION};

/// Session event handler that logs everything and provides no local tools
/// or documentation.
struct LoggingSessionEventHandler;

#[async_trait]
impl SessionEventHandler for LoggingSessionEventHandler {
    async fn on_session_activating(&self, namespace_id: &str, destination_id_prefix: &str) {
        info!(
            "Session active; namespace id: {}, destination id prefix: {}",
            namespace_id, destination_id_prefix
        );
    }

    async fn on_active_session_terminating(&self) {
        info!("Session terminating");
    }

    async fn on_session_in_final_state(&self) {
        info!("Session reached its final state");
    }

    async fn on_fatal_session_error(&self, error_type: ProtocolErrorType, message: &str) {
        error!("Fatal session error [{}]: {}", error_type, message);
    }

    async fn process_tool_descriptor_list_update(&self, update: ToolDescriptorListUpdate) {
        info!(
            "Tool list update from {} ({}): {} tool(s)",
            update.destination_id,
            update.display_name,
            update.tool_descriptors.len()
        );
        for descriptor in &update.tool_descriptors {
            info!(
                "  - {} ({} v{})",
                descriptor.display_name, descriptor.tool_id, descriptor.tool_version
            );
        }
    }

    async fn provide_documentation_data(
        &self,
        _destination_id: &str,
        doc_reference_id: &str,
    ) -> Option<Vec<u8>> {
        warn!(
            "Rejecting documentation request for id {}; this client publishes no tools",
            doc_reference_id
        );
        None
    }

    async fn execute_provided_tool(
        &self,
        request: ToolExecutionRequest,
        _events: ProviderEventSink,
    ) -> ToolExecutionResult {
        warn!(
            "Rejecting execution request {} for tool {}; this client publishes no tools",
            request.execution_id, request.tool_id
        );
        ToolExecutionResult {
            final_state: "REJECTED".to_string(),
            successful: false,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Uplink client v{}", VERSION);
    info!("Connecting to {}:{}", args.host, args.port);

    let stream = TcpStream::connect((args.host.clone(), args.port)).await?;
    stream.set_nodelay(true)?;

    let parameters: SessionParameters = args.into();
    let session = ClientSession::new(stream, parameters, Arc::new(LoggingSessionEventHandler));
    info!("Running session {}", session.local_session_id());

    let clean_shutdown = session.run_session().await;
    let snapshot = session.metrics().snapshot();
    info!(
        "Session ended (clean: {}); {} block(s) sent, {} block(s) received, {} channel(s) opened",
        clean_shutdown, snapshot.blocks_sent, snapshot.blocks_received, snapshot.channels_opened
    );

    if !clean_shutdown {
        std::process::exit(1);
    }
    Ok(())
}
