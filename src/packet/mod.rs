//! Packet parsing helpers for raw IP datagrams read from a TUN device.
//!
//! This module contains:
//! - IPv4 classification (version nibble, protocol field) used on every packet
//! - IPv4/TCP header views for connection-level policy decisions
//! - TLS ClientHello server name extraction

pub mod ip;
pub mod tls;

pub use ip::{
    classify, ip_version, Classification, Ipv4Header, TcpHeader, TransportProtocol,
    IPPROTO_TCP, IPPROTO_UDP, IPV4_HEADER_LEN, IPV4_PROTOCOL_OFFSET, IPV4_VERSION, IPV6_VERSION,
    TCP_HEADER_LEN,
};
pub use tls::server_name;

/// Direction of a packet relative to the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    /// Read from the device (intercepted on `read`).
    Inbound,
    /// Written to the device (intercepted on `write`).
    Outbound,
}

impl PacketDirection {
    /// Short label used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketDirection::Inbound => "read",
            PacketDirection::Outbound => "write",
        }
    }
}
