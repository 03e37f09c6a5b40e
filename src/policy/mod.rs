//! Connection admission policy.
//!
//! The adapter only asks a [`PacketPolicy`] whether an IPv4/TCP packet may
//! pass. [`ConnectionPolicy`] turns that packet into a [`ConnectionInfo`]
//! (addresses, ports, TLS server name) and defers to a [`ConnectionFilter`].

use std::collections::HashSet;
use std::net::Ipv4Addr;

use tracing::{debug, info};

use crate::config::PolicyConfig;
use crate::packet::{server_name, Ipv4Header, TcpHeader};

mod owner;

pub use owner::{find_uid, owner_uid, SocketTable};

/// Admission predicate over a raw IP packet.
pub trait PacketPolicy: Send + Sync {
    /// Return `false` to block the packet.
    fn is_packet_allowed(&self, packet: &[u8]) -> bool;
}

/// Policy that admits every packet.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PacketPolicy for AllowAll {
    fn is_packet_allowed(&self, _packet: &[u8]) -> bool {
        true
    }
}

impl<F> PacketPolicy for F
where
    F: Fn(&[u8]) -> bool + Send + Sync,
{
    fn is_packet_allowed(&self, packet: &[u8]) -> bool {
        self(packet)
    }
}

/// Connection details extracted from an IPv4/TCP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// IP protocol number (always TCP today).
    pub protocol: u8,
    pub source: Ipv4Addr,
    pub source_port: u16,
    pub destination: Ipv4Addr,
    pub destination_port: u16,
    /// TLS server name, when the packet carries a ClientHello.
    pub server_name: Option<String>,
    /// Owning app uid. Packet parsing leaves it `None`; see [`owner_uid`].
    pub uid: Option<u32>,
}

impl ConnectionInfo {
    /// Parse an IPv4/TCP packet. `None` if either header is truncated.
    pub fn from_ipv4_tcp(packet: &[u8]) -> Option<Self> {
        let ip = Ipv4Header::parse(packet)?;
        let tcp = TcpHeader::parse(&ip, packet)?;

        Some(Self {
            protocol: ip.protocol,
            source: ip.source,
            source_port: tcp.source_port,
            destination: ip.destination,
            destination_port: tcp.destination_port,
            server_name: server_name(tcp.payload(packet)),
            uid: None,
        })
    }
}

/// Connection-level allow/block decision.
pub trait ConnectionFilter: Send + Sync {
    /// Return `false` to block the connection.
    fn should_allow(&self, conn: &ConnectionInfo) -> bool;
}

/// [`PacketPolicy`] that parses the connection and asks a [`ConnectionFilter`].
///
/// Packets that cannot be parsed are allowed.
pub struct ConnectionPolicy<F> {
    filter: F,
}

impl<F: ConnectionFilter> ConnectionPolicy<F> {
    pub fn new(filter: F) -> Self {
        Self { filter }
    }
}

impl<F: ConnectionFilter> PacketPolicy for ConnectionPolicy<F> {
    fn is_packet_allowed(&self, packet: &[u8]) -> bool {
        let conn = match ConnectionInfo::from_ipv4_tcp(packet) {
            Some(conn) => conn,
            None => {
                debug!("TCP packet is too short");
                return true;
            }
        };

        if let Some(sn) = &conn.server_name {
            info!("TLS server {} ({}) found", sn, conn.destination);
        }

        self.filter.should_allow(&conn)
    }
}

/// Static block list of TLS server names and destination ports.
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    hosts: Vec<String>,
    ports: HashSet<u16>,
}

impl BlockList {
    pub fn new<I, S>(hosts: I, ports: impl IntoIterator<Item = u16>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().trim_end_matches('.').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            ports: ports.into_iter().collect(),
        }
    }

    /// Build from the policy section of the configuration.
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(&config.blocked_hosts, config.blocked_ports.iter().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.ports.is_empty()
    }

    /// Whether `name` or one of its parent domains is blocked.
    fn blocks_host(&self, name: &str) -> bool {
        let name = name.trim_end_matches('.').to_ascii_lowercase();
        self.hosts.iter().any(|blocked| {
            name == *blocked
                || (name.len() > blocked.len()
                    && name.ends_with(blocked.as_str())
                    && name.as_bytes()[name.len() - blocked.len() - 1] == b'.')
        })
    }
}

impl ConnectionFilter for BlockList {
    fn should_allow(&self, conn: &ConnectionInfo) -> bool {
        if self.ports.contains(&conn.destination_port) {
            return false;
        }

        match &conn.server_name {
            Some(name) => !self.blocks_host(name),
            None => true,
        }
    }
}

impl<F> ConnectionFilter for F
where
    F: Fn(&ConnectionInfo) -> bool + Send + Sync,
{
    fn should_allow(&self, conn: &ConnectionInfo) -> bool {
        self(conn)
    }
}
