//! Low-level protocol wrapper: owns the underlying byte stream and
//! implements the handshake exchange, frame transmission, and the blocking
//! message receive loop.
//!
//! All asynchronous session behavior (dispatch queues, correlation) lives in
//! the session layer above; this layer only turns a raw stream into
//! handshake data, message blocks, and connection-level events.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use crate::error::{Error, ProtocolErrorType, Result};
use crate::protocol::codec::{Frame, MessageBlockCodec};
use crate::protocol::converter::MessageConverter;
use crate::protocol::message::{MessageBlock, MessageType};
use crate::protocol::{DEFAULT_CHANNEL_ID, HANDSHAKE_FORMAT_HEADER, HANDSHAKE_RESPONSE_TIMEOUT};

/// Any bidirectional byte stream a session can run over (TCP, in-memory
/// duplex, a tunneled stream, ...).
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

type BoxedStream = Box<dyn ByteStream>;

/// Handler for connection-level events produced by the wrapper, especially
/// incoming message blocks. Read errors, write errors, and non-protocol
/// errors arrive through distinct callbacks so the layer above can apply
/// uniform fatal-error handling while logging differentiated diagnostics.
#[async_trait]
pub trait LowLevelEventHandler: Send + Sync {
    /// Produce the outgoing client handshake key/value data.
    fn provide_handshake_data(&self) -> HashMap<String, String>;

    /// Process the remote side's handshake response key/value data.
    fn process_handshake_response(&self, data: &HashMap<String, String>);

    async fn on_handshake_complete(&self);

    async fn on_handshake_failed_or_refused(
        &self,
        error_type: ProtocolErrorType,
        raw_message: String,
    );

    async fn on_message_block(&self, channel_id: u64, block: MessageBlock);

    async fn on_regular_goodbye(&self);

    async fn on_error_goodbye(&self, error_type: ProtocolErrorType, raw_message: String);

    async fn on_incoming_stream_closed(&self);

    async fn on_stream_read_error(&self, error: Error);

    async fn on_stream_write_error(&self, error: Error);

    async fn on_non_protocol_error(&self, error: Error);
}

struct WriterState {
    framed: FramedWrite<WriteHalf<BoxedStream>, MessageBlockCodec>,
    closed: bool,
}

/// Owns the connection streams and performs framing, the handshake exchange,
/// and goodbye handling. Writes from arbitrary tasks are serialized at the
/// writer lock, so frames are never interleaved.
pub struct LowLevelProtocolWrapper {
    event_handler: Arc<dyn LowLevelEventHandler>,
    converter: MessageConverter,
    log_prefix: String,
    reader: Mutex<Option<ReadHalf<BoxedStream>>>,
    writer: Mutex<WriterState>,
}

impl LowLevelProtocolWrapper {
    pub fn new<S: ByteStream + 'static>(
        stream: S,
        event_handler: Arc<dyn LowLevelEventHandler>,
        log_identity: &str,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(Box::new(stream) as BoxedStream);
        Self {
            event_handler,
            converter: MessageConverter::new(log_identity),
            log_prefix: format!("[{}]", log_identity),
            reader: Mutex::new(Some(read_half)),
            writer: Mutex::new(WriterState {
                framed: FramedWrite::new(write_half, MessageBlockCodec),
                closed: false,
            }),
        }
    }

    /// Perform the initial protocol handshake, then run the message receive
    /// loop. Returns when the stream ends, an unrecoverable error occurs, or
    /// a goodbye message is exchanged.
    pub async fn run_session(&self) {
        let read_half = match self.reader.lock().await.take() {
            Some(read_half) => read_half,
            None => {
                warn!("{} Ignoring attempt to run the same session twice", self.log_prefix);
                return;
            }
        };

        match self.perform_handshake(read_half).await {
            Ok(framed_read) => {
                self.event_handler.on_handshake_complete().await;
                self.run_receive_loop(framed_read).await;
            }
            Err(error) => {
                debug!("{} Handshake failed: {}", self.log_prefix, error);
                let (error_type, raw_message) = match error {
                    Error::ConnectionRefused {
                        error_type,
                        message,
                    } => (error_type, message),
                    other => (other.classify(), other.to_string()),
                };
                self.event_handler
                    .on_handshake_failed_or_refused(error_type, raw_message)
                    .await;
            }
        }
    }

    /// Transmit a message block to the given channel. Safe to call from any
    /// task concurrently with the receive loop; sends after local shutdown
    /// are silently ignored.
    pub async fn enqueue_message_block_for_sending(
        &self,
        channel_id: u64,
        block: MessageBlock,
    ) -> Result<()> {
        let send_result = {
            let mut writer = self.writer.lock().await;
            if writer.closed {
                debug!(
                    "{} Ignoring message send request as the connection has been shut down",
                    self.log_prefix
                );
                return Ok(());
            }
            trace!(
                "{} Sending a message of type {} to channel {}, payload size {} bytes",
                self.log_prefix,
                block.message_type(),
                channel_id,
                block.data_len()
            );
            writer.framed.send(Frame::new(channel_id, block)).await
        };
        // the writer lock is released before the callback; the handler may
        // close the stream from within it
        if let Err(error) = send_result {
            let message = error.to_string();
            self.event_handler.on_stream_write_error(error).await;
            return Err(Error::ConnectionClosed(message));
        }
        Ok(())
    }

    /// Make a best-effort attempt to send a regular goodbye message, then
    /// close the outgoing stream. Idempotent.
    pub async fn close_outgoing_stream(&self) {
        let mut writer = self.writer.lock().await;
        if writer.closed {
            return;
        }
        if let Err(error) = writer
            .framed
            .send(Frame::new(
                DEFAULT_CHANNEL_ID,
                MessageBlock::empty(MessageType::Goodbye),
            ))
            .await
        {
            debug!(
                "{} Failed to send goodbye message; most likely, the connection has already failed: {}",
                self.log_prefix, error
            );
        }
        if let Err(error) = writer.framed.get_mut().shutdown().await {
            debug!(
                "{} Failed to actively close the output stream; most likely, the connection has already failed: {}",
                self.log_prefix, error
            );
        }
        writer.closed = true;
    }

    /// Best-effort transmission of an error goodbye message with a wrapped
    /// error code payload. Failures are logged and swallowed.
    pub async fn attempt_to_send_error_goodbye(
        &self,
        error_type: ProtocolErrorType,
        raw_message: &str,
    ) {
        let wrapped = error_type.wrap_error_message(raw_message);
        let block = self.converter.encode_error_goodbye(&wrapped);
        let mut writer = self.writer.lock().await;
        if writer.closed {
            return;
        }
        if let Err(error) = writer.framed.send(Frame::new(DEFAULT_CHANNEL_ID, block)).await {
            debug!(
                "{} Failed to send a goodbye error message (body: {}): {}",
                self.log_prefix, wrapped, error
            );
        }
    }

    pub async fn is_outgoing_stream_closed(&self) -> bool {
        self.writer.lock().await.closed
    }

    async fn perform_handshake(
        &self,
        mut read_half: ReadHalf<BoxedStream>,
    ) -> Result<FramedRead<ReadHalf<BoxedStream>, MessageBlockCodec>> {
        // the preamble and our handshake data must be the first bytes on the wire
        {
            let mut writer = self.writer.lock().await;
            writer.framed.get_mut().write_all(HANDSHAKE_FORMAT_HEADER).await?;
            writer.framed.get_mut().flush().await?;
        }
        let outgoing = self.event_handler.provide_handshake_data();
        let handshake_block = self.converter.encode_handshake_data(&outgoing)?;
        {
            let mut writer = self.writer.lock().await;
            writer
                .framed
                .send(Frame::new(DEFAULT_CHANNEL_ID, handshake_block))
                .await?;
        }
        trace!("{} Sent handshake data", self.log_prefix);

        let mut framed_read = timeout(HANDSHAKE_RESPONSE_TIMEOUT, async {
            let mut preamble = [0u8; 8];
            read_half.read_exact(&mut preamble).await?;
            if &preamble != HANDSHAKE_FORMAT_HEADER {
                return Err(Error::Handshake(format!(
                    "Received an invalid stream preamble: {:?}",
                    preamble
                )));
            }
            Ok(FramedRead::new(read_half, MessageBlockCodec))
        })
        .await
        .map_err(|_| self.handshake_timeout_error())??;

        let frame = timeout(HANDSHAKE_RESPONSE_TIMEOUT, framed_read.next())
            .await
            .map_err(|_| self.handshake_timeout_error())?
            .ok_or_else(|| {
                Error::Handshake("The connection was closed during the handshake".to_string())
            })??;

        if frame.channel_id != DEFAULT_CHANNEL_ID {
            return Err(Error::protocol(format!(
                "Unexpected handshake channel id: {}",
                frame.channel_id
            )));
        }
        match frame.block.message_type() {
            MessageType::Goodbye => {
                // a goodbye instead of handshake data is an explicit refusal
                let wrapped = if frame.block.data_len() == 0 {
                    "E99: <no error message available>".to_string()
                } else {
                    String::from_utf8_lossy(frame.block.data()).to_string()
                };
                Err(Error::ConnectionRefused {
                    error_type: ProtocolErrorType::type_of_wrapped_message(&wrapped),
                    message: ProtocolErrorType::unwrap_error_message(&wrapped),
                })
            }
            MessageType::Handshake => {
                trace!("{} Received handshake data", self.log_prefix);
                let data = self.converter.decode_handshake_data(&frame.block)?;
                self.event_handler.process_handshake_response(&data);
                Ok(framed_read)
            }
            other => Err(Error::protocol(format!(
                "Expected handshake data, but received message type {} instead",
                other
            ))),
        }
    }

    fn handshake_timeout_error(&self) -> Error {
        Error::Handshake(format!(
            "Received no handshake response within {} ms",
            HANDSHAKE_RESPONSE_TIMEOUT.as_millis()
        ))
    }

    async fn run_receive_loop(
        &self,
        mut framed_read: FramedRead<ReadHalf<BoxedStream>, MessageBlockCodec>,
    ) {
        trace!("{} Running message dispatch loop", self.log_prefix);
        loop {
            match framed_read.next().await {
                Some(Ok(frame)) => {
                    if frame.block.message_type() == MessageType::Goodbye {
                        debug!(
                            "{} Received 'goodbye' message, stopping message listener",
                            self.log_prefix
                        );
                        if frame.block.data_len() == 0 {
                            self.event_handler.on_regular_goodbye().await;
                        } else {
                            let wrapped = String::from_utf8_lossy(frame.block.data()).to_string();
                            self.event_handler
                                .on_error_goodbye(
                                    ProtocolErrorType::type_of_wrapped_message(&wrapped),
                                    ProtocolErrorType::unwrap_error_message(&wrapped),
                                )
                                .await;
                        }
                        return;
                    }
                    trace!(
                        "{} Received message of type {} for channel {}, payload size {} bytes",
                        self.log_prefix,
                        frame.block.message_type(),
                        frame.channel_id,
                        frame.block.data_len()
                    );
                    self.event_handler
                        .on_message_block(frame.channel_id, frame.block)
                        .await;
                }
                Some(Err(error)) => {
                    if error.is_connection_level() {
                        self.event_handler.on_stream_read_error(error).await;
                    } else {
                        self.attempt_to_send_error_goodbye(
                            ProtocolErrorType::InternalClientError,
                            "Closing the connection after a receive error",
                        )
                        .await;
                        self.event_handler.on_non_protocol_error(error).await;
                    }
                    return;
                }
                None => {
                    debug!("{} Incoming stream closed", self.log_prefix);
                    self.event_handler.on_incoming_stream_closed().await;
                    return;
                }
            }
        }
    }
}
