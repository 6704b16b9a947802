//! Sandbox configuration and validation
//!
//! `SandboxConfig` is the contract between the control plane and driver
//! implementations. Validation fills defaults and rejects out-of-range
//! values before any backend call is made.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{DriverError, Result};

/// Default memory limit in MiB.
pub const DEFAULT_MEMORY_MB: i64 = 512;
/// Default CPU limit in fractional cores.
pub const DEFAULT_CPU_CORES: f64 = 1.0;
/// Default sandbox lifetime.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Default working directory inside the sandbox.
pub const DEFAULT_WORK_DIR: &str = "/workspace";

/// Hard cap on memory in MiB (8 GiB).
pub const MAX_MEMORY_MB: i64 = 8192;
/// Hard cap on fractional CPU cores.
pub const MAX_CPU_CORES: f64 = 4.0;
/// Hard cap on sandbox lifetime.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Specification of a requested execution environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Base image reference (e.g. `python:3.10-slim`).
    pub image: String,

    /// Memory limit in MiB.
    pub memory_mb: i64,

    /// CPU limit as fractional cores (1.0 = one core).
    pub cpu_cores: f64,

    /// Environment variables injected into the sandbox.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Hard upper bound on the sandbox lifetime, in seconds on the wire.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Working directory inside the sandbox.
    pub work_dir: String,

    /// Arbitrary metadata (user id, session id, ...).
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    /// Internet access rules.
    pub network_policy: NetworkPolicy,

    /// Files written into the sandbox before it becomes ready.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<FileInjection>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: String::new(),
            memory_mb: DEFAULT_MEMORY_MB,
            cpu_cores: DEFAULT_CPU_CORES,
            env: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            work_dir: DEFAULT_WORK_DIR.to_string(),
            labels: HashMap::new(),
            network_policy: NetworkPolicy::default(),
            context: Vec::new(),
        }
    }
}

impl SandboxConfig {
    /// Check the configuration, filling defaults for unset fields and
    /// rejecting values beyond the hard caps.
    pub fn validate(&mut self) -> Result<()> {
        if self.image.is_empty() {
            return Err(DriverError::InvalidConfig("image is required".to_string()));
        }

        if self.memory_mb <= 0 {
            self.memory_mb = DEFAULT_MEMORY_MB;
        }
        if self.cpu_cores <= 0.0 {
            self.cpu_cores = DEFAULT_CPU_CORES;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.work_dir.is_empty() {
            self.work_dir = DEFAULT_WORK_DIR.to_string();
        }

        if self.memory_mb > MAX_MEMORY_MB {
            return Err(DriverError::InvalidConfig(format!(
                "memory cannot exceed {MAX_MEMORY_MB} MiB"
            )));
        }
        if self.cpu_cores > MAX_CPU_CORES {
            return Err(DriverError::InvalidConfig(format!(
                "CPU cannot exceed {MAX_CPU_CORES} cores"
            )));
        }
        if self.timeout > MAX_TIMEOUT {
            return Err(DriverError::InvalidConfig(
                "timeout cannot exceed 30 minutes".to_string(),
            ));
        }

        Ok(())
    }
}

/// Network access rules for a sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkPolicy {
    /// Allow outbound internet access.
    pub enable_internet: bool,
    /// Egress allowlist when internet access is enabled.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow_domains: Vec<String>,
}

/// A file to write into the sandbox at boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInjection {
    /// Destination path; relative paths resolve against the working directory.
    pub path: String,
    /// File content, base64-encoded.
    pub content_base64: String,
}

/// A file or directory inside a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub mode: u32,
    pub is_dir: bool,
    pub last_modified: chrono::DateTime<chrono::Utc>,
}

/// Serialize a `Duration` as whole seconds on the wire.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SandboxConfig {
        SandboxConfig {
            image: "python:3.10-slim".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn validate_is_identity_on_defaults() {
        let mut cfg = base_config();
        let before = cfg.clone();
        cfg.validate().unwrap();
        assert_eq!(cfg.memory_mb, before.memory_mb);
        assert_eq!(cfg.cpu_cores, before.cpu_cores);
        assert_eq!(cfg.timeout, before.timeout);
        assert_eq!(cfg.work_dir, before.work_dir);
    }

    #[test]
    fn validate_requires_image() {
        let mut cfg = SandboxConfig::default();
        assert!(matches!(
            cfg.validate(),
            Err(DriverError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_fills_defaults() {
        let mut cfg = SandboxConfig {
            image: "python:3.10-slim".to_string(),
            memory_mb: 0,
            cpu_cores: 0.0,
            timeout: Duration::ZERO,
            work_dir: String::new(),
            ..Default::default()
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.memory_mb, DEFAULT_MEMORY_MB);
        assert_eq!(cfg.cpu_cores, DEFAULT_CPU_CORES);
        assert_eq!(cfg.timeout, DEFAULT_TIMEOUT);
        assert_eq!(cfg.work_dir, DEFAULT_WORK_DIR);
    }

    #[test]
    fn validate_rejects_excess_memory() {
        let mut cfg = base_config();
        cfg.memory_mb = MAX_MEMORY_MB + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_excess_cpu() {
        let mut cfg = base_config();
        cfg.cpu_cores = 4.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_excess_timeout() {
        let mut cfg = base_config();
        cfg.timeout = Duration::from_secs(31 * 60);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_values_at_the_caps() {
        let mut cfg = base_config();
        cfg.memory_mb = MAX_MEMORY_MB;
        cfg.cpu_cores = MAX_CPU_CORES;
        cfg.timeout = MAX_TIMEOUT;
        cfg.validate().unwrap();
    }

    #[test]
    fn timeout_serializes_as_seconds() {
        let cfg = base_config();
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["timeout"], serde_json::json!(300));
    }
}
