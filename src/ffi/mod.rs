//! FFI (Foreign Function Interface) module for the Android VPN service.
//!
//! This module provides a C-compatible ABI around [`TunnelAdapter`]:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Android VpnService                        │
//! │        (owns the TUN fd, decides connection policy)       │
//! └────────────────────────┬─────────────────────────────────┘
//!                          │ fd, callbacks
//! ┌────────────────────────▼─────────────────────────────────┐
//! │                    C FFI Layer                            │
//! │  - tunfilter_create_from_fd()                            │
//! │  - tunfilter_read() / tunfilter_write()                  │
//! │  - tunfilter_pcap_start() / tunfilter_pcap_stop()        │
//! │  - tunfilter_close()                                     │
//! └────────────────────────┬─────────────────────────────────┘
//!                          │
//! ┌────────────────────────▼─────────────────────────────────┐
//! │   TunnelAdapter<FdTun>: classify → capture → policy       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage from C
//!
//! ```c
//! TunFilterCallbacks cbs = { .context = ctx, .is_pkt_allowed = allow_cb };
//! char name[16];
//! TunFilterHandle tun = tunfilter_create_from_fd(fd, &cbs, name, sizeof(name));
//!
//! uint8_t buf[65536];
//! intptr_t n = tunfilter_read(tun, buf, sizeof(buf), 0);
//! // n == 0: packet blocked, nothing to forward
//!
//! tunfilter_close(tun);
//! ```
//!
//! [`TunnelAdapter`]: crate::tunnel::TunnelAdapter

mod callbacks;
mod client;
mod types;

pub use callbacks::*;
pub use client::*;
pub use types::*;

#[cfg(feature = "jni")]
mod android;

#[cfg(feature = "jni")]
pub use android::*;
