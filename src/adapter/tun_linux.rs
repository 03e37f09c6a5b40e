//! Linux/Android TUN device over an already-open file descriptor.
//!
//! The device is unmonitored: nothing watches netlink for link changes, so
//! the event stream carries a single `Up` at construction and `Down` on close.

use std::ffi::CStr;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use libc::{
    c_char, c_int, c_short, c_void, ioctl, open, read, socket, write, AF_INET, IFF_NO_PI,
    IFF_TUN, O_CLOEXEC, O_RDWR, SOCK_CLOEXEC, SOCK_DGRAM,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{closed_error, packet_region, EventStream, TunDevice, TunEvent};

/// TUNSETIFF ioctl number.
const TUNSETIFF: libc::c_ulong = 0x400454ca;

/// TUNGETIFF ioctl number.
const TUNGETIFF: libc::c_ulong = 0x800454d2;

/// SIOCGIFMTU - Get interface MTU.
const SIOCGIFMTU: libc::c_ulong = 0x8921;

/// Capacity of the event channel.
const EVENT_QUEUE: usize = 5;

/// Interface request structure.
#[repr(C)]
struct IfReq {
    ifr_name: [c_char; 16],
    ifr_flags: c_short,
    _pad: [u8; 22],
}

/// Interface request with MTU.
#[repr(C)]
struct IfReqMtu {
    ifr_name: [c_char; 16],
    ifr_mtu: c_int,
    _pad: [u8; 20],
}

/// TUN device backed by a file descriptor it owns.
pub struct FdTun {
    fd: Option<OwnedFd>,
    name: String,
    events_tx: Option<mpsc::Sender<TunEvent>>,
    events_rx: Option<EventStream>,
}

impl FdTun {
    /// Wrap an open TUN file descriptor (e.g. from Android's `VpnService`).
    ///
    /// The interface name is queried from the kernel; failure to do so is
    /// the only construction error.
    pub fn from_fd(fd: OwnedFd) -> io::Result<Self> {
        let name = query_name(fd.as_raw_fd())?;
        info!("Attached TUN device: {}", name);
        Ok(Self::with_name(fd, name))
    }

    /// Create a new TUN device through `/dev/net/tun`.
    ///
    /// If `name` is `None`, the kernel will assign a name like "tun0".
    pub fn open(name: Option<&str>) -> io::Result<Self> {
        let fd = unsafe {
            // Open the TUN clone device
            let raw = open(b"/dev/net/tun\0".as_ptr() as *const c_char, O_RDWR | O_CLOEXEC);
            if raw < 0 {
                return Err(io::Error::last_os_error());
            }
            OwnedFd::from_raw_fd(raw)
        };

        let mut ifr = IfReq {
            ifr_name: [0; 16],
            ifr_flags: (IFF_TUN | IFF_NO_PI) as c_short,
            _pad: [0; 22],
        };
        if let Some(name) = name {
            copy_name(name, &mut ifr.ifr_name);
        }

        // Create the TUN device
        if unsafe { ioctl(fd.as_raw_fd(), TUNSETIFF as _, &mut ifr as *mut _ as *mut c_void) } < 0 {
            return Err(io::Error::last_os_error());
        }

        let name = unsafe { CStr::from_ptr(ifr.ifr_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        info!("Created TUN device: {}", name);

        Ok(Self::with_name(fd, name))
    }

    fn with_name(fd: OwnedFd, name: String) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        if tx.try_send(TunEvent::Up).is_err() {
            warn!("Failed to queue up event for {}", name);
        }
        Self {
            fd: Some(fd),
            name,
            events_tx: Some(tx),
            events_rx: Some(rx),
        }
    }

    fn raw_fd(&self) -> io::Result<RawFd> {
        self.fd.as_ref().map(|fd| fd.as_raw_fd()).ok_or_else(closed_error)
    }
}

/// Ask the kernel for the interface name bound to a TUN fd.
fn query_name(fd: RawFd) -> io::Result<String> {
    let mut ifr = IfReq {
        ifr_name: [0; 16],
        ifr_flags: 0,
        _pad: [0; 22],
    };

    if unsafe { ioctl(fd, TUNGETIFF as _, &mut ifr as *mut _ as *mut c_void) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(unsafe { CStr::from_ptr(ifr.ifr_name.as_ptr()) }
        .to_string_lossy()
        .into_owned())
}

/// Copy interface name to a buffer.
fn copy_name(name: &str, buf: &mut [c_char; 16]) {
    for (i, byte) in name.bytes().take(15).enumerate() {
        buf[i] = byte as c_char;
    }
}

/// Create a control socket for ioctl operations.
fn control_socket() -> io::Result<OwnedFd> {
    let fd = unsafe { socket(AF_INET, SOCK_DGRAM | SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

impl TunDevice for FdTun {
    fn read(&self, buf: &mut [u8], offset: usize) -> io::Result<usize> {
        let fd = self.raw_fd()?;
        let region = packet_region(buf.len(), offset)?;
        let dst = &mut buf[region];

        let n = unsafe { read(fd, dst.as_mut_ptr() as *mut c_void, dst.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(n as usize)
    }

    fn write(&self, buf: &[u8], offset: usize) -> io::Result<usize> {
        let fd = self.raw_fd()?;
        let region = packet_region(buf.len(), offset)?;
        let src = &buf[region];

        let n = unsafe { write(fd, src.as_ptr() as *const c_void, src.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(n as usize)
    }

    fn file(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd())
    }

    fn mtu(&self) -> io::Result<usize> {
        self.raw_fd()?;
        let sock = control_socket()?;

        let mut ifr = IfReqMtu {
            ifr_name: [0; 16],
            ifr_mtu: 0,
            _pad: [0; 20],
        };
        copy_name(&self.name, &mut ifr.ifr_name);

        let rc = unsafe {
            ioctl(
                sock.as_raw_fd(),
                SIOCGIFMTU as _,
                &mut ifr as *mut _ as *mut c_void,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(ifr.ifr_mtu as usize)
    }

    fn name(&self) -> io::Result<String> {
        self.raw_fd()?;
        Ok(self.name.clone())
    }

    fn events(&mut self) -> Option<EventStream> {
        self.events_rx.take()
    }

    fn close(&mut self) -> io::Result<()> {
        let fd = self.fd.take().ok_or_else(closed_error)?;

        if let Some(tx) = self.events_tx.take() {
            let _ = tx.try_send(TunEvent::Down);
        }

        // Dropping the OwnedFd closes the descriptor
        drop(fd);
        debug!("Closed TUN device: {}", self.name);
        Ok(())
    }
}

impl Drop for FdTun {
    fn drop(&mut self) {
        if self.fd.is_some() {
            debug!("Dropping open TUN device: {}", self.name);
        }
    }
}
