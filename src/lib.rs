//! Packet-intercepting TUN device adapter.
//!
//! Wraps a tunnel device so that every packet read from it is classified,
//! optionally captured, and (for IPv4/TCP) checked against a connection
//! policy. Blocked packets are reported as zero-length reads.

pub mod adapter;
pub mod capture;
pub mod config;
pub mod error;
pub mod packet;
pub mod policy;
pub mod tunnel;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod ffi;

// Re-export main types
pub use adapter::{EventStream, TunDevice, TunEvent};
pub use capture::{CaptureOutcome, NoCapture, PacketSink, PcapWriter};
pub use config::{CaptureConfig, FilterConfig, PolicyConfig};
pub use error::{Error, Result};
pub use policy::{AllowAll, BlockList, ConnectionFilter, ConnectionInfo, ConnectionPolicy, PacketPolicy};
pub use tunnel::{AdmissionDecision, TunnelAdapter};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use adapter::FdTun;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use tunnel::create_from_fd;

// Default configuration constants
pub const DEFAULT_CONFIG_FILE: &str = "tunfilter.json";
pub const DEFAULT_MTU: usize = 1500;
