//! TUN device capability surface.
//!
//! Everything that can stand in for a tunnel device implements
//! [`TunDevice`]: the raw fd-backed device as well as the filtering
//! [`TunnelAdapter`](crate::tunnel::TunnelAdapter) that wraps it.

use std::io;
use std::os::fd::BorrowedFd;

use tokio::sync::mpsc;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod tun_linux;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use tun_linux::FdTun;

/// Device lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunEvent {
    /// The interface came up.
    Up,
    /// The interface went down or was closed.
    Down,
    /// The interface MTU changed.
    MtuUpdate(usize),
}

/// Stream of device events. Ends when the device is closed.
pub type EventStream = mpsc::Receiver<TunEvent>;

/// Generic TUN device trait.
///
/// Packets are exchanged through a caller-owned buffer with a start
/// `offset`; only `buf[offset..]` belongs to the packet.
pub trait TunDevice: Send + Sync {
    /// Read one packet into `buf[offset..]`, returning its length.
    fn read(&self, buf: &mut [u8], offset: usize) -> io::Result<usize>;

    /// Write the packet in `buf[offset..]`, returning the bytes written.
    fn write(&self, buf: &[u8], offset: usize) -> io::Result<usize>;

    /// Flush buffered packets. TUN devices have nothing to flush.
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    /// Borrow the underlying file descriptor, `None` once closed.
    fn file(&self) -> Option<BorrowedFd<'_>>;

    /// Get the device MTU.
    fn mtu(&self) -> io::Result<usize>;

    /// Get the device name.
    fn name(&self) -> io::Result<String>;

    /// Take the event stream. Only the first call returns `Some`.
    fn events(&mut self) -> Option<EventStream>;

    /// Close the device. Calling this twice is a caller error.
    fn close(&mut self) -> io::Result<()>;
}

/// Error returned by operations on a device that has been closed.
pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "TUN device is closed")
}

/// Resolve `buf[offset..]`, rejecting offsets past the end of the buffer.
pub(crate) fn packet_region(len: usize, offset: usize) -> io::Result<std::ops::Range<usize>> {
    if offset > len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("offset {} exceeds buffer length {}", offset, len),
        ));
    }
    Ok(offset..len)
}
