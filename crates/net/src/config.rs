//! Client configuration

use serde::{Deserialize, Serialize};

use crate::DEFAULT_PORT;

/// Host used when none is configured
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Connection settings for a [`Client`](crate::Client)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address
    pub host: String,
    /// Server TCP port
    pub port: u16,
    /// 36-character application identifier shared by all clients of a game
    pub identifier: String,
    /// Log every raw line sent and received
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            identifier: String::new(),
            debug: false,
        }
    }
}
