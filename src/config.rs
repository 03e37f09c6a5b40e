//! Configuration for the tunnel filter.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::capture::PCAP_GLOBAL_HEADER_LEN;

/// Default number of packet bytes kept per capture record.
pub const DEFAULT_RECORD_SIZE: usize = 64;

/// Default capture file size before it is truncated back to the header.
pub const DEFAULT_FILE_SIZE: u64 = 2 * 1024 * 1024;

/// Filter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Packet capture (disabled when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureConfig>,

    /// Connection policy
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Pcap capture configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capture file path
    pub path: PathBuf,

    /// Bytes of each packet kept in a record (pcap snaplen)
    #[serde(default = "default_record_size")]
    pub record_size: usize,

    /// File size limit in bytes
    #[serde(default = "default_file_size")]
    pub file_size: u64,
}

/// Connection policy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Blocked TLS server names; a name also blocks its subdomains
    #[serde(default)]
    pub blocked_hosts: Vec<String>,

    /// Blocked TCP destination ports
    #[serde(default)]
    pub blocked_ports: Vec<u16>,
}

fn default_record_size() -> usize {
    DEFAULT_RECORD_SIZE
}

fn default_file_size() -> u64 {
    DEFAULT_FILE_SIZE
}

impl CaptureConfig {
    /// Capture to `path` with default limits.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            record_size: DEFAULT_RECORD_SIZE,
            file_size: DEFAULT_FILE_SIZE,
        }
    }

    /// Validate capture limits
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            anyhow::bail!("Capture path cannot be empty");
        }

        if self.record_size == 0 {
            anyhow::bail!("Capture record size cannot be zero");
        }

        if self.file_size <= PCAP_GLOBAL_HEADER_LEN as u64 {
            anyhow::bail!(
                "Capture file size must exceed the {} byte pcap header",
                PCAP_GLOBAL_HEADER_LEN
            );
        }

        Ok(())
    }
}

impl FilterConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: FilterConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(capture) = &self.capture {
            capture.validate()?;
        }

        if self.policy.blocked_hosts.iter().any(|h| h.trim().is_empty()) {
            anyhow::bail!("Blocked host entries cannot be empty");
        }

        if self.policy.blocked_ports.contains(&0) {
            anyhow::bail!("Blocked port cannot be zero");
        }

        Ok(())
    }
}
