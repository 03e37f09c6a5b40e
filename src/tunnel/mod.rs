//! Packet interception between a TUN device and the forwarding loop.
//!
//! [`TunnelAdapter`] wraps a [`TunDevice`](crate::adapter::TunDevice) and is
//! itself a `TunDevice`, so it can be handed to anything expecting a plain
//! device. Inbound IPv4/TCP packets are captured and checked against the
//! policy; outbound packets are captured after they are written.

mod adapter;

pub use adapter::{AdmissionDecision, TunnelAdapter};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use adapter::create_from_fd;
