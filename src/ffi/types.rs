//! FFI types for C interoperability.

use std::ffi::c_void;
use std::io;

/// Result codes for FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunFilterResult {
    /// Operation succeeded.
    Ok = 0,
    /// Invalid parameter (null pointer, bad fd, etc.).
    InvalidParam = -1,
    /// Device already closed.
    Closed = -2,
    /// Operation would block.
    WouldBlock = -3,
    /// Capture could not be started.
    CaptureFailed = -4,
    /// I/O error.
    IoError = -7,
    /// Internal error.
    InternalError = -99,
}

impl From<&io::Error> for TunFilterResult {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotConnected => TunFilterResult::Closed,
            io::ErrorKind::WouldBlock => TunFilterResult::WouldBlock,
            io::ErrorKind::InvalidInput => TunFilterResult::InvalidParam,
            _ => TunFilterResult::IoError,
        }
    }
}

/// Opaque tunnel handle.
pub type TunFilterHandle = *mut c_void;

/// Null handle constant.
pub const TUNFILTER_HANDLE_NULL: TunFilterHandle = std::ptr::null_mut();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_from_io_error() {
        let err = io::Error::new(io::ErrorKind::NotConnected, "closed");
        assert_eq!(TunFilterResult::from(&err), TunFilterResult::Closed);

        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(TunFilterResult::from(&err), TunFilterResult::WouldBlock);

        let err = io::Error::from_raw_os_error(libc::EIO);
        assert_eq!(TunFilterResult::from(&err), TunFilterResult::IoError);
    }
}
