//! Filtering TUN adapter.

use std::io;
use std::os::fd::BorrowedFd;
use std::sync::Arc;

use tracing::debug;

use crate::adapter::{EventStream, TunDevice};
use crate::capture::{NoCapture, PacketSink};
use crate::packet::{classify, Classification, PacketDirection, TransportProtocol};
use crate::policy::{AllowAll, PacketPolicy};

/// Outcome of the policy check for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allow,
    Block,
}

/// TUN device wrapper that captures packets and blocks denied connections.
///
/// Blocking is reported as a zero-length read, never as an error: the
/// forwarding loop sees "nothing to forward" and keeps going. Only IPv4/TCP
/// packets on the read path are subject to the policy; IPv6 and other IPv4
/// protocols pass through unfiltered.
pub struct TunnelAdapter<D> {
    device: D,
    policy: Arc<dyn PacketPolicy>,
    sink: Arc<dyn PacketSink>,
}

impl<D: TunDevice> TunnelAdapter<D> {
    /// Wrap `device`, taking exclusive ownership of it.
    pub fn new(device: D, policy: Arc<dyn PacketPolicy>, sink: Arc<dyn PacketSink>) -> Self {
        Self {
            device,
            policy,
            sink,
        }
    }

    /// Wrap `device` without capture and admitting every packet.
    pub fn passthrough(device: D) -> Self {
        Self::new(device, Arc::new(AllowAll), Arc::new(NoCapture))
    }

    /// Get a reference to the wrapped device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Best-effort capture; failures are only logged.
    fn capture(&self, direction: PacketDirection, packet: &[u8]) {
        if !self.sink.write_capture(packet).is_recorded() {
            debug!(direction = direction.as_str(), "PCAP packet not written");
        }
    }

    fn admit(&self, packet: &[u8]) -> AdmissionDecision {
        if self.policy.is_packet_allowed(packet) {
            AdmissionDecision::Allow
        } else {
            AdmissionDecision::Block
        }
    }
}

impl<D: TunDevice> TunDevice for TunnelAdapter<D> {
    fn read(&self, buf: &mut [u8], offset: usize) -> io::Result<usize> {
        let n = self.device.read(buf, offset)?;
        let direction = PacketDirection::Inbound;

        let packet = match offset.checked_add(n).and_then(|end| buf.get(offset..end)) {
            Some(packet) => packet,
            None => {
                debug!(direction = direction.as_str(), len = n, "Invalid IP");
                return Ok(n);
            }
        };

        match classify(packet) {
            Classification::Ipv4(TransportProtocol::Tcp) => {}
            // Only TCP connections are checked for now
            Classification::Ipv4(TransportProtocol::Other(_)) => return Ok(n),
            Classification::Ipv4Malformed => {
                debug!(direction = direction.as_str(), len = n, "Skipping bad IPv4 pkt");
                return Ok(n);
            }
            // IPv6 is not filtered
            Classification::Ipv6 | Classification::Unknown => {
                debug!(direction = direction.as_str(), "Invalid IP");
                return Ok(n);
            }
        }

        // Capture before the policy check so blocked packets are recorded too
        self.capture(direction, packet);

        if self.admit(packet) == AdmissionDecision::Block {
            debug!(direction = direction.as_str(), len = n, "Blocking connection");
            return Ok(0);
        }

        Ok(n)
    }

    fn write(&self, buf: &[u8], offset: usize) -> io::Result<usize> {
        let result = self.device.write(buf, offset);

        if let Ok(n) = result {
            let packet = offset.checked_add(n).and_then(|end| buf.get(offset..end));
            if let Some(packet) = packet.filter(|p| !p.is_empty()) {
                self.capture(PacketDirection::Outbound, packet);
            }
        }

        result
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    fn file(&self) -> Option<BorrowedFd<'_>> {
        self.device.file()
    }

    fn mtu(&self) -> io::Result<usize> {
        self.device.mtu()
    }

    fn name(&self) -> io::Result<String> {
        self.device.name()
    }

    fn events(&mut self) -> Option<EventStream> {
        self.device.events()
    }

    fn close(&mut self) -> io::Result<()> {
        self.device.close()
    }
}

/// Wrap an already-open TUN file descriptor.
///
/// Returns the adapter and the interface name. Device errors are returned
/// unchanged.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn create_from_fd(
    fd: std::os::fd::OwnedFd,
    policy: Arc<dyn PacketPolicy>,
    sink: Arc<dyn PacketSink>,
) -> io::Result<(TunnelAdapter<crate::adapter::FdTun>, String)> {
    let device = crate::adapter::FdTun::from_fd(fd)?;
    let name = device.name()?;
    Ok((TunnelAdapter::new(device, policy, sink), name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::TunEvent;
    use crate::capture::CaptureOutcome;
    use crate::packet::ip::tests::{make_ipv4_packet, make_tcp_packet};
    use crate::packet::IPPROTO_UDP;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Device replaying scripted reads and recording writes.
    struct FakeDevice {
        reads: Mutex<VecDeque<io::Result<Vec<u8>>>>,
        writes: Mutex<Vec<Vec<u8>>>,
        write_error: Option<io::ErrorKind>,
        short_write: Option<usize>,
        events: Option<EventStream>,
        closed: AtomicUsize,
    }

    impl FakeDevice {
        fn new() -> Self {
            Self {
                reads: Mutex::new(VecDeque::new()),
                writes: Mutex::new(Vec::new()),
                write_error: None,
                short_write: None,
                events: None,
                closed: AtomicUsize::new(0),
            }
        }

        fn with_read(self, packet: &[u8]) -> Self {
            self.reads.lock().unwrap().push_back(Ok(packet.to_vec()));
            self
        }
    }

    impl TunDevice for FakeDevice {
        fn read(&self, buf: &mut [u8], offset: usize) -> io::Result<usize> {
            let next = self
                .reads
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(io::ErrorKind::WouldBlock.into()))?;
            buf[offset..offset + next.len()].copy_from_slice(&next);
            Ok(next.len())
        }

        fn write(&self, buf: &[u8], offset: usize) -> io::Result<usize> {
            if let Some(kind) = self.write_error {
                return Err(kind.into());
            }
            let len = self.short_write.unwrap_or(buf.len() - offset);
            self.writes
                .lock()
                .unwrap()
                .push(buf[offset..offset + len].to_vec());
            Ok(len)
        }

        fn file(&self) -> Option<BorrowedFd<'_>> {
            None
        }

        fn mtu(&self) -> io::Result<usize> {
            Ok(1280)
        }

        fn name(&self) -> io::Result<String> {
            Ok("tun-fake".to_string())
        }

        fn events(&mut self) -> Option<EventStream> {
            self.events.take()
        }

        fn close(&mut self) -> io::Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Sink remembering every packet it was offered.
    struct RecordingSink {
        outcome: CaptureOutcome,
        packets: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingSink {
        fn new(outcome: CaptureOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                packets: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.packets.lock().unwrap().len()
        }
    }

    impl PacketSink for RecordingSink {
        fn write_capture(&self, packet: &[u8]) -> CaptureOutcome {
            self.packets.lock().unwrap().push(packet.to_vec());
            self.outcome
        }
    }

    /// Policy with a fixed answer that counts how often it was asked.
    struct CountingPolicy {
        allow: bool,
        calls: AtomicUsize,
    }

    impl CountingPolicy {
        fn new(allow: bool) -> Arc<Self> {
            Arc::new(Self {
                allow,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PacketPolicy for CountingPolicy {
        fn is_packet_allowed(&self, _packet: &[u8]) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.allow
        }
    }

    fn make_adapter(
        device: FakeDevice,
        allow: bool,
        outcome: CaptureOutcome,
    ) -> (TunnelAdapter<FakeDevice>, Arc<CountingPolicy>, Arc<RecordingSink>) {
        let policy = CountingPolicy::new(allow);
        let sink = RecordingSink::new(outcome);
        let adapter = TunnelAdapter::new(device, policy.clone(), sink.clone());
        (adapter, policy, sink)
    }

    fn tcp_packet_40() -> Vec<u8> {
        let packet = make_tcp_packet(40000, 443, &[]);
        assert_eq!(packet.len(), 40);
        packet
    }

    #[test]
    fn test_read_tcp_allowed() {
        let device = FakeDevice::new().with_read(&tcp_packet_40());
        let (adapter, policy, sink) = make_adapter(device, true, CaptureOutcome::Recorded);

        let mut buf = [0u8; 1500];
        assert_eq!(adapter.read(&mut buf, 0).unwrap(), 40);
        assert_eq!(policy.calls(), 1);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_read_tcp_blocked_still_captured() {
        let packet = tcp_packet_40();
        let device = FakeDevice::new().with_read(&packet);
        let (adapter, policy, sink) = make_adapter(device, false, CaptureOutcome::Recorded);

        let mut buf = [0u8; 1500];
        assert_eq!(adapter.read(&mut buf, 0).unwrap(), 0);
        assert_eq!(policy.calls(), 1);
        assert_eq!(sink.packets.lock().unwrap()[0], packet);
    }

    /// Sink and policy sharing a step counter, each noting the step it ran at.
    struct StepRecorder {
        next: AtomicUsize,
        captured_at: Mutex<Option<usize>>,
        checked_at: Mutex<Option<usize>>,
    }

    impl StepRecorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                next: AtomicUsize::new(0),
                captured_at: Mutex::new(None),
                checked_at: Mutex::new(None),
            })
        }

        fn step(&self) -> usize {
            self.next.fetch_add(1, Ordering::SeqCst)
        }
    }

    impl PacketSink for StepRecorder {
        fn write_capture(&self, _packet: &[u8]) -> CaptureOutcome {
            *self.captured_at.lock().unwrap() = Some(self.step());
            CaptureOutcome::Recorded
        }
    }

    impl PacketPolicy for StepRecorder {
        fn is_packet_allowed(&self, _packet: &[u8]) -> bool {
            *self.checked_at.lock().unwrap() = Some(self.step());
            false
        }
    }

    #[test]
    fn test_read_captures_before_policy() {
        let device = FakeDevice::new().with_read(&tcp_packet_40());
        let steps = StepRecorder::new();
        let adapter = TunnelAdapter::new(device, steps.clone(), steps.clone());

        let mut buf = [0u8; 1500];
        assert_eq!(adapter.read(&mut buf, 0).unwrap(), 0);
        assert_eq!(*steps.captured_at.lock().unwrap(), Some(0));
        assert_eq!(*steps.checked_at.lock().unwrap(), Some(1));
    }

    #[test]
    fn test_read_unknown_version_passes_through() {
        for first in [0x00u8, 0x20] {
            let mut packet = vec![0u8; 30];
            packet[0] = first;
            let device = FakeDevice::new().with_read(&packet);
            let (adapter, policy, sink) = make_adapter(device, false, CaptureOutcome::Recorded);

            let mut buf = [0u8; 1500];
            assert_eq!(adapter.read(&mut buf, 0).unwrap(), 30, "first byte {:#04x}", first);
            assert_eq!(policy.calls(), 0);
            assert_eq!(sink.count(), 0);
        }
    }

    #[test]
    fn test_read_respects_offset() {
        let packet = tcp_packet_40();
        let device = FakeDevice::new().with_read(&packet);
        let (adapter, _policy, sink) = make_adapter(device, true, CaptureOutcome::Recorded);

        // Stale bytes around the packet region must not leak into capture
        let mut buf = [0x60u8; 256];
        assert_eq!(adapter.read(&mut buf, 16).unwrap(), 40);
        assert_eq!(sink.packets.lock().unwrap()[0], packet);
    }

    #[test]
    fn test_read_ipv6_passes_unfiltered() {
        let mut packet = vec![0u8; 60];
        packet[0] = 0x60;
        let device = FakeDevice::new().with_read(&packet);
        let (adapter, policy, sink) = make_adapter(device, false, CaptureOutcome::Recorded);

        let mut buf = [0u8; 1500];
        assert_eq!(adapter.read(&mut buf, 0).unwrap(), 60);
        assert_eq!(policy.calls(), 0);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_read_short_ipv4_passes() {
        let device = FakeDevice::new().with_read(&[0x45, 0, 0, 5, 0]);
        let (adapter, policy, sink) = make_adapter(device, false, CaptureOutcome::Recorded);

        let mut buf = [0u8; 1500];
        assert_eq!(adapter.read(&mut buf, 0).unwrap(), 5);
        assert_eq!(policy.calls(), 0);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_read_udp_passes_unchecked() {
        let packet = make_ipv4_packet(IPPROTO_UDP, &[0u8; 8]);
        let device = FakeDevice::new().with_read(&packet);
        let (adapter, policy, _sink) = make_adapter(device, false, CaptureOutcome::Recorded);

        let mut buf = [0u8; 1500];
        assert_eq!(adapter.read(&mut buf, 0).unwrap(), 28);
        assert_eq!(policy.calls(), 0);
    }

    #[test]
    fn test_read_empty_packet() {
        let device = FakeDevice::new().with_read(&[]);
        let (adapter, policy, _sink) = make_adapter(device, false, CaptureOutcome::Recorded);

        let mut buf = [0x45u8; 64];
        assert_eq!(adapter.read(&mut buf, 0).unwrap(), 0);
        assert_eq!(policy.calls(), 0);
    }

    #[test]
    fn test_read_error_returned_unchanged() {
        let device = FakeDevice::new();
        let (adapter, policy, sink) = make_adapter(device, false, CaptureOutcome::Recorded);

        let mut buf = [0u8; 64];
        let err = adapter.read(&mut buf, 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(policy.calls(), 0);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_capture_failure_does_not_change_read() {
        let device = FakeDevice::new().with_read(&tcp_packet_40());
        let (adapter, _policy, sink) = make_adapter(device, true, CaptureOutcome::Failed);

        let mut buf = [0u8; 1500];
        assert_eq!(adapter.read(&mut buf, 0).unwrap(), 40);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_write_captures_written_region() {
        let packet = tcp_packet_40();
        let mut buf = vec![0u8; 8];
        buf.extend_from_slice(&packet);

        let (adapter, policy, sink) = make_adapter(FakeDevice::new(), false, CaptureOutcome::Failed);
        assert_eq!(adapter.write(&buf, 8).unwrap(), 40);
        assert_eq!(adapter.device().writes.lock().unwrap()[0], packet);
        assert_eq!(sink.packets.lock().unwrap()[0], packet);
        // Policy never applies to writes
        assert_eq!(policy.calls(), 0);
    }

    #[test]
    fn test_write_short_write_captures_written_bytes() {
        let mut device = FakeDevice::new();
        device.short_write = Some(20);
        let (adapter, _policy, sink) = make_adapter(device, true, CaptureOutcome::Recorded);

        let packet = tcp_packet_40();
        assert_eq!(adapter.write(&packet, 0).unwrap(), 20);
        assert_eq!(sink.packets.lock().unwrap()[0], &packet[..20]);
    }

    #[test]
    fn test_write_error_skips_capture() {
        let mut device = FakeDevice::new();
        device.write_error = Some(io::ErrorKind::BrokenPipe);
        let (adapter, _policy, sink) = make_adapter(device, true, CaptureOutcome::Recorded);

        let err = adapter.write(&tcp_packet_40(), 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_write_nothing_written_skips_capture() {
        let mut device = FakeDevice::new();
        device.short_write = Some(0);
        let (adapter, _policy, sink) = make_adapter(device, true, CaptureOutcome::Recorded);

        assert_eq!(adapter.write(&tcp_packet_40(), 0).unwrap(), 0);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_pass_through_surface() {
        let (tx, rx) = mpsc::channel(1);
        tx.try_send(TunEvent::MtuUpdate(1400)).unwrap();
        let mut device = FakeDevice::new();
        device.events = Some(rx);

        let mut adapter = TunnelAdapter::passthrough(device);
        assert_eq!(adapter.mtu().unwrap(), 1280);
        assert_eq!(adapter.name().unwrap(), "tun-fake");
        assert!(adapter.file().is_none());
        assert!(adapter.flush().is_ok());

        let mut events = adapter.events().unwrap();
        assert_eq!(events.try_recv().unwrap(), TunEvent::MtuUpdate(1400));
        assert!(adapter.events().is_none());

        adapter.close().unwrap();
        assert_eq!(adapter.device().closed.load(Ordering::SeqCst), 1);
    }
}
