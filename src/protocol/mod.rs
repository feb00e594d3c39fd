//! Wire-level protocol definitions: message framing, typed entities, and the
//! constants both sides of an uplink connection agree on.

pub mod codec;
pub mod converter;
pub mod entities;
pub mod message;

use std::time::Duration;

/// Protocol version offered by this client during the handshake.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Channel id reserved for the default/control channel of every session.
pub const DEFAULT_CHANNEL_ID: u64 = 0;

/// Placeholder channel id used in channel creation requests before the remote
/// side has assigned an actual id. Real ids are assigned from zero upwards,
/// so this value can never collide.
pub const UNDEFINED_CHANNEL_ID: u64 = u64::MAX;

/// Fixed-length stream preamble exchanged before any frame traffic. Both
/// sides send it first and verify it on receipt.
pub const HANDSHAKE_FORMAT_HEADER: &[u8; 8] = b"UPLINK1\n";

/// Upper bound for the payload of a single message block. Inbound frames
/// announcing a larger size are rejected as a protocol error before any
/// allocation happens.
pub const MAX_MESSAGE_BLOCK_DATA_LENGTH: usize = 256 * 1024;

// ===== Handshake keys =====

/// Handshake key: the protocol version offered by the client.
pub const HANDSHAKE_KEY_PROTOCOL_VERSION_OFFER: &str = "protocolVersionOffer";

/// Handshake key: optional free-text client version information.
pub const HANDSHAKE_KEY_CLIENT_VERSION_INFO: &str = "clientVersionInfo";

/// Handshake key: the session qualifier distinguishing multiple logins
/// under the same account.
pub const HANDSHAKE_KEY_SESSION_QUALIFIER: &str = "sessionQualifier";

/// Handshake key: the namespace id assigned by the relay (response only).
pub const HANDSHAKE_KEY_ASSIGNED_NAMESPACE_ID: &str = "assignedNamespaceId";

/// Session qualifier applied when the caller does not set one.
pub const SESSION_QUALIFIER_DEFAULT: &str = "default";

/// Namespace id marker assigned when the handshake response did not include
/// one; the session still activates, but all derived destination ids carry
/// this marker.
pub const NAMESPACE_ID_MISSING_PLACEHOLDER: &str =
    "<error: handshake data did not include a namespace id>/";

// ===== Channel type tags =====

/// Channel type tag for documentation fetch channels.
pub const CHANNEL_TYPE_DOCUMENTATION: &str = "docs";

/// Channel type tag for tool execution channels.
pub const CHANNEL_TYPE_TOOL_EXECUTION: &str = "exec";

// ===== Timeouts =====

/// How long to wait for the remote handshake response.
pub const HANDSHAKE_RESPONSE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// How long a channel creation request waits for its response.
pub const CHANNEL_REQUEST_RESULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// How long a documentation fetch waits for the response on its channel.
pub const DOCUMENTATION_REQUEST_RESULT_TIMEOUT: Duration = Duration::from_millis(10_000);
