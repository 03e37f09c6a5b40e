//! IPv4 and TCP header helpers.
//!
//! Only as much parsing as the filter needs: the version nibble, the IPv4
//! protocol field, addresses and TCP ports. IPv6 is recognized but never
//! parsed further.

use std::net::Ipv4Addr;

/// IP version nibble for IPv4.
pub const IPV4_VERSION: u8 = 4;

/// IP version nibble for IPv6.
pub const IPV6_VERSION: u8 = 6;

/// Minimum IPv4 header length (no options).
pub const IPV4_HEADER_LEN: usize = 20;

/// Offset of the protocol field in the IPv4 header.
pub const IPV4_PROTOCOL_OFFSET: usize = 9;

/// Minimum TCP header length (no options).
pub const TCP_HEADER_LEN: usize = 20;

/// IP protocol numbers
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// Transport protocol carried by an IPv4 packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    Tcp,
    Other(u8),
}

impl From<u8> for TransportProtocol {
    fn from(value: u8) -> Self {
        match value {
            IPPROTO_TCP => TransportProtocol::Tcp,
            other => TransportProtocol::Other(other),
        }
    }
}

/// Result of inspecting the first bytes of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// IPv4 with at least a minimal header.
    Ipv4(TransportProtocol),
    /// Version nibble says IPv4 but the packet is shorter than a header.
    Ipv4Malformed,
    /// IPv6. Recognized but not filtered.
    Ipv6,
    /// Empty packet or any other version nibble.
    Unknown,
}

/// Get the version nibble of an IP packet.
#[inline]
pub fn ip_version(packet: &[u8]) -> Option<u8> {
    packet.first().map(|b| (b >> 4) & 0x0F)
}

/// Classify a raw IP packet by version nibble and, for IPv4, protocol field.
#[inline]
pub fn classify(packet: &[u8]) -> Classification {
    match ip_version(packet) {
        Some(IPV4_VERSION) => {
            if packet.len() < IPV4_HEADER_LEN {
                return Classification::Ipv4Malformed;
            }
            Classification::Ipv4(TransportProtocol::from(packet[IPV4_PROTOCOL_OFFSET]))
        }
        Some(IPV6_VERSION) => Classification::Ipv6,
        _ => Classification::Unknown,
    }
}

/// Parsed view of an IPv4 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Header length in bytes (IHL * 4).
    pub header_len: usize,
    pub protocol: u8,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl Ipv4Header {
    /// Parse the IPv4 header at the start of `packet`.
    ///
    /// Returns `None` for non-IPv4 packets, truncated headers, or an IHL
    /// below the 5-word minimum.
    pub fn parse(packet: &[u8]) -> Option<Self> {
        if packet.len() < IPV4_HEADER_LEN || ip_version(packet)? != IPV4_VERSION {
            return None;
        }

        let header_len = (packet[0] & 0x0F) as usize * 4;
        if header_len < IPV4_HEADER_LEN {
            return None;
        }

        Some(Self {
            header_len,
            protocol: packet[IPV4_PROTOCOL_OFFSET],
            source: Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]),
            destination: Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]),
        })
    }
}

/// Parsed view of a TCP header inside an IPv4 packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    /// Header length in bytes (data offset * 4).
    pub header_len: usize,
    /// Offset of the TCP payload from the start of the IP packet.
    pub payload_offset: usize,
}

impl TcpHeader {
    /// Parse the TCP header following `ip` in `packet`.
    ///
    /// Returns `None` if the packet is not TCP or the header (including
    /// IPv4 options) does not fit.
    pub fn parse(ip: &Ipv4Header, packet: &[u8]) -> Option<Self> {
        if ip.protocol != IPPROTO_TCP {
            return None;
        }

        let start = ip.header_len;
        let tcp = packet.get(start..start + TCP_HEADER_LEN)?;

        let header_len = ((tcp[12] >> 4) & 0x0F) as usize * 4;
        if header_len < TCP_HEADER_LEN {
            return None;
        }

        Some(Self {
            source_port: u16::from_be_bytes([tcp[0], tcp[1]]),
            destination_port: u16::from_be_bytes([tcp[2], tcp[3]]),
            header_len,
            payload_offset: start + header_len,
        })
    }

    /// TCP payload of `packet`, or an empty slice if options run past the end.
    pub fn payload<'a>(&self, packet: &'a [u8]) -> &'a [u8] {
        packet.get(self.payload_offset..).unwrap_or(&[])
    }
}
