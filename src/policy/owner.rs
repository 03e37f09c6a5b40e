//! Owning-app lookup through the kernel socket tables in `/proc/net`.
//!
//! Each row of `/proc/net/tcp` and `/proc/net/tcp6` lists a socket's local
//! and remote endpoint and the uid that owns it. Addresses are printed as
//! native-endian 32-bit words in hex, ports as big hex numbers.

use std::fs;
use std::io;
use std::net::Ipv4Addr;

use tracing::{debug, info, warn};

use super::ConnectionInfo;
use crate::packet::IPPROTO_TCP;

const PROC_NET_TCP: &str = "/proc/net/tcp";
const PROC_NET_TCP6: &str = "/proc/net/tcp6";

/// Which socket table a dump came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketTable {
    Tcp,
    Tcp6,
}

impl SocketTable {
    /// Number of 32-bit address words per endpoint.
    fn words(self) -> usize {
        match self {
            SocketTable::Tcp => 1,
            SocketTable::Tcp6 => 4,
        }
    }

    /// Address bytes as they appear in this table.
    fn address(self, addr: Ipv4Addr) -> Vec<u8> {
        match self {
            SocketTable::Tcp => addr.octets().to_vec(),
            SocketTable::Tcp6 => addr.to_ipv6_mapped().octets().to_vec(),
        }
    }
}

/// One parsed socket table row.
struct SocketRow {
    local: Vec<u8>,
    local_port: u16,
    remote: Vec<u8>,
    remote_port: u16,
    uid: u32,
}

impl SocketRow {
    fn parse(line: &str, table: SocketTable) -> Option<Self> {
        let mut fields = line.split_whitespace();
        fields.next()?; // slot
        let (local, local_port) = parse_endpoint(fields.next()?, table)?;
        let (remote, remote_port) = parse_endpoint(fields.next()?, table)?;
        // st, tx_queue:rx_queue, tr:tm->when, retrnsmt, then uid
        let uid = fields.nth(4)?.parse().ok()?;

        Some(Self {
            local,
            local_port,
            remote,
            remote_port,
            uid,
        })
    }

    /// Remote port 0 and all-zero addresses act as wildcards.
    fn matches(&self, local: &[u8], local_port: u16, remote: &[u8], remote_port: u16) -> bool {
        self.local_port == local_port
            && (self.remote_port == remote_port || self.remote_port == 0)
            && (self.local == local || is_unspecified(&self.local))
            && (self.remote == remote || is_unspecified(&self.remote))
    }
}

fn is_unspecified(addr: &[u8]) -> bool {
    addr.iter().all(|&b| b == 0)
}

/// Parse `HEXADDR:HEXPORT`.
fn parse_endpoint(field: &str, table: SocketTable) -> Option<(Vec<u8>, u16)> {
    let (addr, port) = field.split_once(':')?;
    if addr.len() != table.words() * 8 {
        return None;
    }

    let mut bytes = Vec::with_capacity(addr.len() / 2);
    for i in 0..table.words() {
        let word = u32::from_str_radix(addr.get(i * 8..i * 8 + 8)?, 16).ok()?;
        bytes.extend_from_slice(&word.to_ne_bytes());
    }

    Some((bytes, u16::from_str_radix(port, 16).ok()?))
}

/// Find the uid owning `conn` in a socket table dump.
///
/// The connection's source is the local end. When several rows match, the
/// last one wins.
pub fn find_uid(dump: &str, table: SocketTable, conn: &ConnectionInfo) -> Option<u32> {
    let local = table.address(conn.source);
    let remote = table.address(conn.destination);

    dump.lines()
        .skip(1) // header
        .filter_map(|line| SocketRow::parse(line, table))
        .filter(|row| row.matches(&local, conn.source_port, &remote, conn.destination_port))
        .map(|row| row.uid)
        .last()
}

/// Look up the uid of the app owning a TCP connection.
///
/// Dual-stack sockets show up in `tcp6` with IPv4-mapped addresses, so that
/// table is searched first. `Ok(None)` means no socket matched; an error
/// means `/proc/net/tcp` could not be read.
pub fn owner_uid(conn: &ConnectionInfo) -> io::Result<Option<u32>> {
    if conn.protocol != IPPROTO_TCP {
        return Ok(None);
    }

    match fs::read_to_string(PROC_NET_TCP6) {
        Ok(dump) => {
            if let Some(uid) = find_uid(&dump, SocketTable::Tcp6, conn) {
                info!(
                    "uid {}/{} > {}/{} => {} as inet6",
                    conn.source, conn.source_port, conn.destination, conn.destination_port, uid
                );
                return Ok(Some(uid));
            }
        }
        Err(e) => debug!("{} unreadable: {}", PROC_NET_TCP6, e),
    }

    let dump = fs::read_to_string(PROC_NET_TCP)?;
    let uid = find_uid(&dump, SocketTable::Tcp, conn);
    match uid {
        Some(uid) => info!(
            "uid {}/{} > {}/{} => {}",
            conn.source, conn.source_port, conn.destination, conn.destination_port, uid
        ),
        None => warn!(
            "uid {}/{} > {}/{} => not found",
            conn.source, conn.source_port, conn.destination, conn.destination_port
        ),
    }
    Ok(uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode";

    fn conn(sport: u16, dport: u16) -> ConnectionInfo {
        ConnectionInfo {
            protocol: IPPROTO_TCP,
            source: Ipv4Addr::new(10, 0, 0, 2),
            source_port: sport,
            destination: Ipv4Addr::new(93, 184, 216, 34),
            destination_port: dport,
            server_name: None,
            uid: None,
        }
    }

    /// Hex words the way the kernel prints them on this host.
    fn hex(bytes: &[u8]) -> String {
        bytes
            .chunks(4)
            .map(|w| format!("{:08X}", u32::from_ne_bytes([w[0], w[1], w[2], w[3]])))
            .collect()
    }

    fn row(slot: usize, local: &[u8], lport: u16, remote: &[u8], rport: u16, uid: u32) -> String {
        format!(
            "{:4}: {}:{:04X} {}:{:04X} 01 00000000:00000000 00:00000000 00000000 {:5}        0 {} 1 0000000000000000 20 4 30 10 -1",
            slot,
            hex(local),
            lport,
            hex(remote),
            rport,
            uid,
            40000 + slot
        )
    }

    fn dump(rows: &[String]) -> String {
        let mut out = String::from(HEADER);
        for r in rows {
            out.push('\n');
            out.push_str(r);
        }
        out.push('\n');
        out
    }

    #[test]
    fn test_exact_row_match() {
        let c = conn(40001, 443);
        let table = dump(&[
            row(0, &[127, 0, 0, 1], 5037, &[0; 4], 0, 2000),
            row(1, &c.source.octets(), 40001, &c.destination.octets(), 443, 10123),
        ]);
        assert_eq!(find_uid(&table, SocketTable::Tcp, &c), Some(10123));
    }

    #[test]
    fn test_wildcard_remote() {
        let c = conn(8080, 51000);
        let table = dump(&[row(0, &[0; 4], 8080, &[0; 4], 0, 10077)]);
        assert_eq!(find_uid(&table, SocketTable::Tcp, &c), Some(10077));
    }

    #[test]
    fn test_ipv4_mapped_row() {
        let c = conn(40002, 443);
        let table = dump(&[row(
            3,
            &c.source.to_ipv6_mapped().octets(),
            40002,
            &c.destination.to_ipv6_mapped().octets(),
            443,
            10250,
        )]);
        assert_eq!(find_uid(&table, SocketTable::Tcp6, &c), Some(10250));
        // A v6 dump never parses as the v4 table
        assert_eq!(find_uid(&table, SocketTable::Tcp, &c), None);
    }

    #[test]
    fn test_no_match() {
        let c = conn(40003, 443);
        let table = dump(&[
            row(0, &c.source.octets(), 40004, &c.destination.octets(), 443, 10001),
            row(1, &c.source.octets(), 40003, &c.destination.octets(), 80, 10002),
            row(2, &[10, 0, 0, 9], 40003, &c.destination.octets(), 443, 10003),
        ]);
        assert_eq!(find_uid(&table, SocketTable::Tcp, &c), None);
        assert_eq!(find_uid(HEADER, SocketTable::Tcp, &c), None);
    }

    #[test]
    fn test_garbage_rows_are_skipped() {
        let c = conn(40005, 443);
        let table = dump(&[
            "   0: nothex:0050 00000000:0000 0A".to_string(),
            row(1, &c.source.octets(), 40005, &c.destination.octets(), 443, 10444),
        ]);
        assert_eq!(find_uid(&table, SocketTable::Tcp, &c), Some(10444));
    }

    #[test]
    fn test_non_tcp_is_not_looked_up() {
        let mut c = conn(40006, 53);
        c.protocol = crate::packet::IPPROTO_UDP;
        assert_eq!(owner_uid(&c).unwrap(), None);
    }
}
