//! Classic libpcap file writer for raw IP packets.
//!
//! File layout follows the libpcap format with `LINKTYPE_RAW`, written in
//! little-endian byte order. Records are cut to `record_size` bytes, and
//! the file is truncated back to its global header whenever it grows past
//! `file_size`, so a long session keeps only the most recent traffic.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info, trace, warn};

use super::{CaptureOutcome, PacketSink};
use crate::config::CaptureConfig;
use crate::error::{Error, Result};

/// Link type for raw IPv4/IPv6 packets without a link-layer header.
pub const LINKTYPE_RAW: u32 = 101;

/// Size of the pcap global header.
pub const PCAP_GLOBAL_HEADER_LEN: usize = 24;

/// Size of a pcap record header.
pub const PCAP_RECORD_HEADER_LEN: usize = 16;

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;

/// Build the pcap global header.
fn global_header(snaplen: u32) -> [u8; PCAP_GLOBAL_HEADER_LEN] {
    let mut hdr = [0u8; PCAP_GLOBAL_HEADER_LEN];
    hdr[0..4].copy_from_slice(&PCAP_MAGIC.to_le_bytes());
    hdr[4..6].copy_from_slice(&PCAP_VERSION_MAJOR.to_le_bytes());
    hdr[6..8].copy_from_slice(&PCAP_VERSION_MINOR.to_le_bytes());
    // thiszone (8..12) and sigfigs (12..16) stay zero
    hdr[16..20].copy_from_slice(&snaplen.to_le_bytes());
    hdr[20..24].copy_from_slice(&LINKTYPE_RAW.to_le_bytes());
    hdr
}

/// Build one record: header followed by at most `record_size` packet bytes.
fn record(packet: &[u8], record_size: usize, now: SystemTime) -> Vec<u8> {
    let ts = now.duration_since(UNIX_EPOCH).unwrap_or_default();
    let incl_len = packet.len().min(record_size);

    let mut rec = Vec::with_capacity(PCAP_RECORD_HEADER_LEN + incl_len);
    rec.extend_from_slice(&(ts.as_secs() as u32).to_le_bytes());
    rec.extend_from_slice(&ts.subsec_micros().to_le_bytes());
    rec.extend_from_slice(&(incl_len as u32).to_le_bytes());
    rec.extend_from_slice(&(packet.len() as u32).to_le_bytes());
    rec.extend_from_slice(&packet[..incl_len]);
    rec
}

/// An open capture file.
struct PcapFile {
    file: File,
    path: PathBuf,
    record_size: usize,
    file_size: u64,
    size: u64,
}

impl PcapFile {
    fn open(config: &CaptureConfig) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&config.path)
            .map_err(|e| {
                Error::capture(format!("PCAP open {}: {}", config.path.display(), e))
            })?;

        let mut size = file.metadata()?.len();
        if size == 0 {
            warn!("PCAP initialize");
            file.write_all(&global_header(config.record_size as u32))?;
            size = PCAP_GLOBAL_HEADER_LEN as u64;
        } else {
            warn!("PCAP current size {}", size);
        }

        Ok(Self {
            file,
            path: config.path.clone(),
            record_size: config.record_size,
            file_size: config.file_size,
            size,
        })
    }

    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        let rec = record(packet, self.record_size, SystemTime::now());
        self.file.write_all(&rec)?;
        self.size += rec.len() as u64;
        trace!("PCAP wrote {} @{}", rec.len(), self.size);

        if self.size > self.file_size {
            warn!("PCAP truncate @{}", self.size);
            // Append mode: the next record lands right after the header
            self.file.set_len(PCAP_GLOBAL_HEADER_LEN as u64)?;
            self.size = PCAP_GLOBAL_HEADER_LEN as u64;
        }

        Ok(())
    }

    fn close(self) {
        if let Err(e) = self.file.sync_all() {
            error!("PCAP fsync error {}: {}", self.path.display(), e);
        }
    }
}

/// Pcap capture sink. Disabled until [`PcapWriter::start`] succeeds.
#[derive(Default)]
pub struct PcapWriter {
    inner: Mutex<Option<PcapFile>>,
}

impl PcapWriter {
    /// Create a disabled writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer capturing to `config.path`.
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let writer = Self::new();
        writer.start(config)?;
        Ok(writer)
    }

    /// Start (or restart) capturing, closing any previous file.
    pub fn start(&self, config: &CaptureConfig) -> Result<()> {
        config.validate().map_err(|e| Error::config(e.to_string()))?;

        info!(
            "PCAP file {} record size {} truncate @{}",
            config.path.display(),
            config.record_size,
            config.file_size
        );
        let file = PcapFile::open(config)?;

        let mut guard = self
            .inner
            .lock()
            .map_err(|_| Error::capture("PCAP writer lock poisoned"))?;
        if let Some(previous) = guard.replace(file) {
            previous.close();
        }
        Ok(())
    }

    /// Stop capturing and close the file.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(file) = guard.take() {
                file.close();
            }
        }
        warn!("PCAP disabled");
    }

    /// Whether a capture file is open.
    pub fn is_enabled(&self) -> bool {
        self.inner.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

impl PacketSink for PcapWriter {
    fn write_capture(&self, packet: &[u8]) -> CaptureOutcome {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return CaptureOutcome::Failed,
        };

        let file = match guard.as_mut() {
            Some(file) => file,
            None => return CaptureOutcome::Skipped,
        };

        match file.write_packet(packet) {
            Ok(()) => CaptureOutcome::Recorded,
            Err(e) => {
                error!("PCAP write error {}: {}", file.path.display(), e);
                CaptureOutcome::Failed
            }
        }
    }
}

impl Drop for PcapWriter {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(file) = guard.take() {
                file.close();
            }
        }
    }
}
