//! TLS ClientHello server name (SNI) extraction.
//!
//! Works on a single TCP segment payload. A ClientHello split across
//! segments yields `None`, which callers treat as "no server name".

use tracing::trace;

/// TLS record content type for handshake messages.
const CONTENT_TYPE_HANDSHAKE: u8 = 22;

/// Handshake message type for ClientHello.
const HANDSHAKE_CLIENT_HELLO: u8 = 1;

/// Extension type for server_name.
const EXTENSION_SERVER_NAME: u16 = 0;

/// server_name entry type for DNS host names.
const NAME_TYPE_HOST_NAME: u8 = 0;

/// Record header (5) + handshake header (4) + client version (2) + random (32).
const SESSION_ID_OFFSET: usize = 43;

/// Bounds-checked big-endian reader over a byte slice.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn u8(&mut self) -> Option<u8> {
        let v = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(v)
    }

    fn u16(&mut self) -> Option<u16> {
        let bytes = self.bytes(2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn skip(&mut self, len: usize) -> Option<()> {
        self.bytes(len).map(|_| ())
    }
}

/// Extract the SNI host name from a TLS ClientHello in a TCP payload.
pub fn server_name(payload: &[u8]) -> Option<String> {
    if payload.len() < 6 {
        return None;
    }

    let content_type = payload[0];
    let major = payload[1];
    if content_type != CONTENT_TYPE_HANDSHAKE {
        trace!("TLS packet is not handshake packet: {}", content_type);
        return None;
    }
    if major < 0x03 {
        trace!("TLS {} does not have SNI header", major);
        return None;
    }
    if payload[5] != HANDSHAKE_CLIENT_HELLO {
        trace!("TLS packet is not ClientHello msg {}", payload[5]);
        return None;
    }

    let mut cursor = Cursor::new(payload, SESSION_ID_OFFSET);

    let session_id_len = cursor.u8()? as usize;
    cursor.skip(session_id_len)?;

    let cipher_suites_len = cursor.u16()? as usize;
    cursor.skip(cipher_suites_len)?;

    let compression_len = cursor.u8()? as usize;
    cursor.skip(compression_len)?;

    let extensions_len = cursor.u16()? as usize;
    let extensions = cursor.bytes(extensions_len)?;
    let mut ext = Cursor::new(extensions, 0);

    while ext.pos < extensions.len() {
        let ext_type = ext.u16()?;
        let ext_len = ext.u16()? as usize;
        let data = ext.bytes(ext_len)?;

        if ext_type == EXTENSION_SERVER_NAME {
            return parse_server_name_list(data);
        }
    }

    trace!("TLS ClientHello without server_name extension");
    None
}

/// Parse a server_name extension body and return the first host name.
fn parse_server_name_list(data: &[u8]) -> Option<String> {
    let mut cursor = Cursor::new(data, 0);
    let list_len = cursor.u16()? as usize;
    let list = cursor.bytes(list_len)?;

    let mut entries = Cursor::new(list, 0);
    while entries.pos < list.len() {
        let name_type = entries.u8()?;
        let name_len = entries.u16()? as usize;
        let name = entries.bytes(name_len)?;

        if name_type == NAME_TYPE_HOST_NAME && !name.is_empty() {
            return std::str::from_utf8(name).ok().map(str::to_string);
        }
    }

    None
}
