//! Diagnostic packet capture.
//!
//! Capture is best effort: the adapter records what it sees and only logs
//! when a record could not be written.

mod pcap;

pub use pcap::{PcapWriter, LINKTYPE_RAW, PCAP_GLOBAL_HEADER_LEN, PCAP_RECORD_HEADER_LEN};

/// Result of a capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The packet was recorded.
    Recorded,
    /// Capture is disabled, nothing was recorded.
    Skipped,
    /// Capture is enabled but writing the record failed.
    Failed,
}

impl CaptureOutcome {
    /// Whether the packet ended up in the capture.
    pub fn is_recorded(&self) -> bool {
        matches!(self, CaptureOutcome::Recorded)
    }
}

/// Sink receiving raw IP packets for diagnostic capture.
pub trait PacketSink: Send + Sync {
    /// Record one packet.
    fn write_capture(&self, packet: &[u8]) -> CaptureOutcome;
}

/// Sink that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapture;

impl PacketSink for NoCapture {
    fn write_capture(&self, _packet: &[u8]) -> CaptureOutcome {
        CaptureOutcome::Skipped
    }
}

impl<F> PacketSink for F
where
    F: Fn(&[u8]) -> CaptureOutcome + Send + Sync,
{
    fn write_capture(&self, packet: &[u8]) -> CaptureOutcome {
        self(packet)
    }
}
