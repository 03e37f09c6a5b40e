//! FFI callbacks for the policy and capture hooks.
//!
//! Native hosts that keep policy and capture on their side register these
//! instead of using the built-in implementations.

use std::ffi::{c_int, c_void};

use crate::capture::{CaptureOutcome, PacketSink};
use crate::policy::PacketPolicy;

/// Connection policy callback.
///
/// # Parameters
/// - `context`: User-provided context pointer.
/// - `buffer`: IPv4/TCP datagram to check.
/// - `length`: Length of the datagram.
///
/// # Returns
/// Non-zero to allow the packet, 0 to block it.
pub type PacketAllowedCallback =
    Option<extern "C" fn(context: *mut c_void, buffer: *const u8, length: c_int) -> c_int>;

/// Packet capture callback.
///
/// # Parameters
/// - `context`: User-provided context pointer.
/// - `buffer`: IP datagram to record.
/// - `length`: Length of the datagram.
///
/// # Returns
/// 0 if the packet was recorded, negative if it was not.
pub type WritePcapCallback =
    Option<extern "C" fn(context: *mut c_void, buffer: *const u8, length: c_int) -> c_int>;

/// Collection of all callbacks.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TunFilterCallbacks {
    /// User context pointer passed to all callbacks.
    pub context: *mut c_void,
    /// Policy callback. When unset every packet is allowed.
    pub is_pkt_allowed: PacketAllowedCallback,
    /// Capture callback. When unset the built-in pcap writer is used.
    pub write_pcap: WritePcapCallback,
}

impl Default for TunFilterCallbacks {
    fn default() -> Self {
        Self {
            context: std::ptr::null_mut(),
            is_pkt_allowed: None,
            write_pcap: None,
        }
    }
}

// Safety: the host guarantees its callbacks and context may be used from
// whichever thread runs the forwarding loop.
unsafe impl Send for TunFilterCallbacks {}
unsafe impl Sync for TunFilterCallbacks {}

/// [`PacketPolicy`] backed by the `is_pkt_allowed` callback.
pub struct CallbackPolicy {
    callbacks: TunFilterCallbacks,
}

impl CallbackPolicy {
    pub fn new(callbacks: TunFilterCallbacks) -> Self {
        Self { callbacks }
    }
}

impl PacketPolicy for CallbackPolicy {
    fn is_packet_allowed(&self, packet: &[u8]) -> bool {
        match self.callbacks.is_pkt_allowed {
            Some(cb) => cb(self.callbacks.context, packet.as_ptr(), packet.len() as c_int) != 0,
            None => true,
        }
    }
}

/// [`PacketSink`] backed by the `write_pcap` callback.
pub struct CallbackSink {
    callbacks: TunFilterCallbacks,
}

impl CallbackSink {
    pub fn new(callbacks: TunFilterCallbacks) -> Self {
        Self { callbacks }
    }
}

impl PacketSink for CallbackSink {
    fn write_capture(&self, packet: &[u8]) -> CaptureOutcome {
        match self.callbacks.write_pcap {
            Some(cb) if cb(self.callbacks.context, packet.as_ptr(), packet.len() as c_int) < 0 => {
                CaptureOutcome::Failed
            }
            Some(_) => CaptureOutcome::Recorded,
            None => CaptureOutcome::Skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    extern "C" fn deny_short(context: *mut c_void, _buffer: *const u8, length: c_int) -> c_int {
        let calls = unsafe { &*(context as *const AtomicUsize) };
        calls.fetch_add(1, Ordering::SeqCst);
        (length >= 40) as c_int
    }

    extern "C" fn pcap_unavailable(_context: *mut c_void, _buffer: *const u8, _length: c_int) -> c_int {
        -1
    }

    extern "C" fn pcap_ok(_context: *mut c_void, _buffer: *const u8, _length: c_int) -> c_int {
        0
    }

    #[test]
    fn test_callback_policy() {
        let calls = AtomicUsize::new(0);
        let policy = CallbackPolicy::new(TunFilterCallbacks {
            context: &calls as *const AtomicUsize as *mut c_void,
            is_pkt_allowed: Some(deny_short),
            write_pcap: None,
        });

        assert!(policy.is_packet_allowed(&[0x45; 40]));
        assert!(!policy.is_packet_allowed(&[0x45; 20]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unset_callbacks() {
        let callbacks = TunFilterCallbacks::default();
        assert!(CallbackPolicy::new(callbacks).is_packet_allowed(&[0x45; 20]));
        assert_eq!(
            CallbackSink::new(callbacks).write_capture(&[0x45; 20]),
            CaptureOutcome::Skipped
        );
    }

    #[test]
    fn test_callback_sink_outcomes() {
        let failing = CallbackSink::new(TunFilterCallbacks {
            write_pcap: Some(pcap_unavailable),
            ..Default::default()
        });
        assert_eq!(failing.write_capture(&[0x45; 20]), CaptureOutcome::Failed);

        let recording = CallbackSink::new(TunFilterCallbacks {
            write_pcap: Some(pcap_ok),
            ..Default::default()
        });
        assert_eq!(recording.write_capture(&[0x45; 20]), CaptureOutcome::Recorded);
    }
}
