//! API server configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Control plane configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Shared API key; when unset the auth middleware is disabled.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Hard deadline for a single code execution.
    #[serde(default = "default_exec_timeout", with = "secs")]
    pub exec_timeout: Duration,
}

fn default_bind() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("static bind address")
}

fn default_exec_timeout() -> Duration {
    Duration::from_secs(300)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_key: None,
            exec_timeout: default_exec_timeout(),
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
