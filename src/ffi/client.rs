//! FFI tunnel implementation.
//!
//! This module provides the C-callable functions around a filtering TUN
//! adapter built from a file descriptor handed over by the host.

use std::ffi::{c_char, c_int, c_long, CStr};
use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::Arc;

use tracing::{debug, error, info};

use super::callbacks::*;
use super::types::*;
use crate::adapter::{FdTun, TunDevice};
use crate::capture::{PacketSink, PcapWriter};
use crate::config::CaptureConfig;
use crate::policy::PacketPolicy;
use crate::tunnel::{create_from_fd, TunnelAdapter};

/// Internal tunnel state behind a handle.
pub(crate) struct FfiTunnel {
    adapter: TunnelAdapter<FdTun>,
    name: String,
    // Built-in capture, used when the host registers no capture callback
    pcap: Arc<PcapWriter>,
}

impl FfiTunnel {
    /// Build a tunnel over `fd`. Without `sink` the built-in pcap writer
    /// records packets once started.
    pub(crate) fn new(
        fd: OwnedFd,
        policy: Arc<dyn PacketPolicy>,
        sink: Option<Arc<dyn PacketSink>>,
    ) -> io::Result<Self> {
        let pcap = Arc::new(PcapWriter::new());
        let sink = sink.unwrap_or_else(|| pcap.clone() as Arc<dyn PacketSink>);
        let (adapter, name) = create_from_fd(fd, policy, sink)?;
        info!("Tunnel filter attached to {}", name);
        Ok(Self {
            adapter,
            name,
            pcap,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn mtu(&self) -> io::Result<usize> {
        self.adapter.mtu()
    }

    pub(crate) fn pcap(&self) -> &PcapWriter {
        &self.pcap
    }

    pub(crate) fn into_handle(self) -> TunFilterHandle {
        Box::into_raw(Box::new(self)) as TunFilterHandle
    }

    /// Borrow the tunnel behind a handle.
    ///
    /// # Safety
    /// `handle` must be non-null and come from [`FfiTunnel::into_handle`].
    pub(crate) unsafe fn from_handle<'a>(handle: TunFilterHandle) -> &'a FfiTunnel {
        &*(handle as *const FfiTunnel)
    }

    /// Close the device and free the handle.
    ///
    /// # Safety
    /// Same as [`FfiTunnel::from_handle`]; the handle is invalid afterwards.
    pub(crate) unsafe fn close_handle(handle: TunFilterHandle) -> io::Result<()> {
        let mut tunnel = Box::from_raw(handle as *mut FfiTunnel);
        tunnel.pcap.stop();
        tunnel.adapter.close()
    }
}

/// Take ownership of a raw fd from the host.
fn owned_fd(fd: c_int) -> Option<OwnedFd> {
    if fd < 0 {
        return None;
    }
    // Safety: the host hands over an open descriptor it no longer uses
    Some(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Copy `name` as a null-terminated string into a caller buffer.
unsafe fn copy_name_out(name: &str, out: *mut c_char, out_len: usize) {
    if out.is_null() || out_len == 0 {
        return;
    }
    let n = name.len().min(out_len - 1);
    std::ptr::copy_nonoverlapping(name.as_ptr() as *const c_char, out, n);
    *out.add(n) = 0;
}

fn io_code(err: &io::Error) -> isize {
    TunFilterResult::from(err) as isize
}

// =============================================================================
// FFI Functions - C ABI
// =============================================================================

/// Create a filtering tunnel over an already-open TUN file descriptor.
///
/// The descriptor is owned by the tunnel from this call on, including when
/// creation fails.
///
/// # Parameters
/// - `fd`: Open TUN file descriptor.
/// - `callbacks`: Optional policy/capture callbacks (may be NULL).
/// - `name_out`: Optional buffer receiving the interface name.
/// - `name_len`: Size of `name_out` in bytes.
///
/// # Returns
/// Handle to the tunnel, or NULL on error.
///
/// # Safety
/// - `callbacks` must be NULL or point to a valid `TunFilterCallbacks`.
/// - `name_out` must be NULL or point to `name_len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn tunfilter_create_from_fd(
    fd: c_int,
    callbacks: *const TunFilterCallbacks,
    name_out: *mut c_char,
    name_len: usize,
) -> TunFilterHandle {
    let fd = match owned_fd(fd) {
        Some(fd) => fd,
        None => return TUNFILTER_HANDLE_NULL,
    };

    let cbs = if callbacks.is_null() {
        TunFilterCallbacks::default()
    } else {
        *callbacks
    };

    let policy: Arc<dyn PacketPolicy> = Arc::new(CallbackPolicy::new(cbs));
    let sink: Option<Arc<dyn PacketSink>> = cbs
        .write_pcap
        .map(|_| Arc::new(CallbackSink::new(cbs)) as Arc<dyn PacketSink>);

    match FfiTunnel::new(fd, policy, sink) {
        Ok(tunnel) => {
            copy_name_out(tunnel.name(), name_out, name_len);
            tunnel.into_handle()
        }
        Err(e) => {
            error!("Failed to create tunnel from fd: {}", e);
            TUNFILTER_HANDLE_NULL
        }
    }
}

/// Read one packet into `buffer[offset..len]`.
///
/// # Returns
/// - Packet length, or 0 if the packet was blocked.
/// - Negative `TunFilterResult` code on error.
///
/// # Safety
/// - `handle` must be a valid handle from `tunfilter_create_from_fd`.
/// - `buffer` must point to `len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn tunfilter_read(
    handle: TunFilterHandle,
    buffer: *mut u8,
    len: usize,
    offset: usize,
) -> isize {
    if handle.is_null() || buffer.is_null() {
        return TunFilterResult::InvalidParam as isize;
    }

    let tunnel = FfiTunnel::from_handle(handle);
    let buf = std::slice::from_raw_parts_mut(buffer, len);

    match tunnel.adapter.read(buf, offset) {
        Ok(n) => n as isize,
        Err(e) => {
            debug!("Read failed on {}: {}", tunnel.name, e);
            io_code(&e)
        }
    }
}

/// Write the packet in `buffer[offset..len]`.
///
/// # Returns
/// - Bytes written.
/// - Negative `TunFilterResult` code on error.
///
/// # Safety
/// - `handle` must be a valid handle from `tunfilter_create_from_fd`.
/// - `buffer` must point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn tunfilter_write(
    handle: TunFilterHandle,
    buffer: *const u8,
    len: usize,
    offset: usize,
) -> isize {
    if handle.is_null() || buffer.is_null() {
        return TunFilterResult::InvalidParam as isize;
    }

    let tunnel = FfiTunnel::from_handle(handle);
    let buf = std::slice::from_raw_parts(buffer, len);

    match tunnel.adapter.write(buf, offset) {
        Ok(n) => n as isize,
        Err(e) => {
            debug!("Write failed on {}: {}", tunnel.name, e);
            io_code(&e)
        }
    }
}

/// Get the interface MTU.
///
/// # Returns
/// MTU, or negative `TunFilterResult` code on error.
///
/// # Safety
/// `handle` must be a valid handle from `tunfilter_create_from_fd`.
#[no_mangle]
pub unsafe extern "C" fn tunfilter_mtu(handle: TunFilterHandle) -> c_int {
    if handle.is_null() {
        return TunFilterResult::InvalidParam as c_int;
    }

    match FfiTunnel::from_handle(handle).mtu() {
        Ok(mtu) => mtu as c_int,
        Err(e) => TunFilterResult::from(&e) as c_int,
    }
}

/// Start capturing to a pcap file with the built-in writer.
///
/// Has no effect on what is recorded when a `write_pcap` callback was
/// registered.
///
/// # Safety
/// - `handle` must be a valid handle from `tunfilter_create_from_fd`.
/// - `path` must be a valid null-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn tunfilter_pcap_start(
    handle: TunFilterHandle,
    path: *const c_char,
    record_size: c_int,
    file_size: c_long,
) -> TunFilterResult {
    if handle.is_null() || path.is_null() || record_size <= 0 || file_size <= 0 {
        return TunFilterResult::InvalidParam;
    }

    let path = match CStr::from_ptr(path).to_str() {
        Ok(p) => p,
        Err(_) => return TunFilterResult::InvalidParam,
    };

    let config = CaptureConfig {
        path: path.into(),
        record_size: record_size as usize,
        file_size: file_size as u64,
    };

    match FfiTunnel::from_handle(handle).pcap().start(&config) {
        Ok(()) => TunFilterResult::Ok,
        Err(e) => {
            error!("{}", e);
            TunFilterResult::CaptureFailed
        }
    }
}

/// Stop the built-in pcap writer.
///
/// # Safety
/// `handle` must be a valid handle from `tunfilter_create_from_fd`.
#[no_mangle]
pub unsafe extern "C" fn tunfilter_pcap_stop(handle: TunFilterHandle) -> TunFilterResult {
    if handle.is_null() {
        return TunFilterResult::InvalidParam;
    }

    FfiTunnel::from_handle(handle).pcap().stop();
    TunFilterResult::Ok
}

/// Close the tunnel device and release the handle.
///
/// # Safety
/// - `handle` must be a valid handle from `tunfilter_create_from_fd`.
/// - No read or write may be in progress on it.
/// - `handle` must not be used after this call.
#[no_mangle]
pub unsafe extern "C" fn tunfilter_close(handle: TunFilterHandle) -> TunFilterResult {
    if handle.is_null() {
        return TunFilterResult::InvalidParam;
    }

    match FfiTunnel::close_handle(handle) {
        Ok(()) => TunFilterResult::Ok,
        Err(e) => TunFilterResult::from(&e),
    }
}
