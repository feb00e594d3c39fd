//! Configuration for the uplink client.

use clap::Parser;
use std::collections::HashMap;

/// Command-line arguments for the uplink client binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "uplink-client")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Client for the uplink session and channel-multiplexing protocol")]
pub struct Args {
    /// Relay host to connect to
    #[arg(long, default_value = "127.0.0.1", env = "UPLINK_HOST")]
    pub host: String,

    /// Relay port to connect to
    #[arg(short, long, default_value = "31005", env = "UPLINK_PORT")]
    pub port: u16,

    /// Session qualifier distinguishing parallel logins under one account
    #[arg(short = 'q', long, env = "UPLINK_SESSION_QUALIFIER")]
    pub session_qualifier: Option<String>,

    /// Client version string announced during the handshake
    #[arg(long, env = "UPLINK_CLIENT_VERSION")]
    pub client_version: Option<String>,

    /// Enable debug logging
    #[arg(short, long, env = "UPLINK_DEBUG")]
    pub debug: bool,
}

/// Parameters for creating a client-side session.
#[derive(Debug, Clone, Default)]
pub struct SessionParameters {
    /// Human-readable name of the session, used in log output only.
    pub display_name: String,
    /// Session qualifier; the protocol default is applied when unset.
    pub session_qualifier: Option<String>,
    /// Optional client version string sent during the handshake.
    pub client_version_info: Option<String>,
    /// Extra handshake fields overriding the generated ones. Entries here
    /// win over the standard keys; intended for tests.
    pub custom_handshake_data: HashMap<String, String>,
}

impl SessionParameters {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    pub fn with_session_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.session_qualifier = Some(qualifier.into());
        self
    }

    pub fn with_client_version_info(mut self, version: impl Into<String>) -> Self {
        self.client_version_info = Some(version.into());
        self
    }

    pub fn with_custom_handshake_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.custom_handshake_data.insert(key.into(), value.into());
        self
    }
}

impl From<Args> for SessionParameters {
    fn from(args: Args) -> Self {
        Self {
            display_name: format!("{}:{}", args.host, args.port),
            session_qualifier: args.session_qualifier,
            client_version_info: args.client_version,
            custom_handshake_data: HashMap::new(),
        }
    }
}
