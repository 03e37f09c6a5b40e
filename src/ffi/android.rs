//! Android platform bindings via JNI (Java Native Interface).
//!
//! These functions are called directly from Kotlin/Java. Connection
//! decisions are delegated back to the bridge object's `shouldAllow`
//! method; capture uses the built-in pcap writer.
//!
//! # Package Name
//! The JNI functions are named for package: `com.tunfilter`
//! Class: `TunFilterBridge`

use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::Arc;

use jni::objects::{GlobalRef, JClass, JObject, JString, JValue};
use jni::sys::{jint, jlong};
use jni::{JNIEnv, JavaVM};
use tracing::{error, warn};

use super::client::FfiTunnel;
use super::types::*;
use crate::config::CaptureConfig;
use crate::policy::{
    owner_uid, ConnectionFilter, ConnectionInfo, ConnectionPolicy, PacketPolicy,
};

/// `shouldAllow(protocol, source, sport, dest, dport, sni, uid)`
const SHOULD_ALLOW_SIG: &str =
    "(ILjava/lang/String;ILjava/lang/String;ILjava/lang/String;I)Z";

/// Get a String from a JString, returning None if null or invalid
fn get_string(env: &mut JNIEnv, s: &JString) -> Option<String> {
    if s.is_null() {
        return None;
    }
    env.get_string(s).ok().map(|s| s.into())
}

/// [`ConnectionFilter`] that asks the Java bridge object.
///
/// Only connections with a TLS server name reach Java; everything else and
/// every JNI failure is allowed.
struct JniFilter {
    jvm: JavaVM,
    bridge_ref: GlobalRef,
}

impl JniFilter {
    fn call_should_allow(
        &self,
        env: &mut JNIEnv,
        conn: &ConnectionInfo,
        sni: &str,
        uid: jint,
    ) -> jni::errors::Result<bool> {
        let source = env.new_string(conn.source.to_string())?;
        let dest = env.new_string(conn.destination.to_string())?;
        let sni = env.new_string(sni)?;

        let allow = env
            .call_method(
                &self.bridge_ref,
                "shouldAllow",
                SHOULD_ALLOW_SIG,
                &[
                    JValue::Int(conn.protocol as jint),
                    JValue::Object(&source),
                    JValue::Int(conn.source_port as jint),
                    JValue::Object(&dest),
                    JValue::Int(conn.destination_port as jint),
                    JValue::Object(&sni),
                    JValue::Int(uid),
                ],
            )?
            .z()?;

        let _ = env.delete_local_ref(source);
        let _ = env.delete_local_ref(dest);
        let _ = env.delete_local_ref(sni);
        Ok(allow)
    }
}

impl ConnectionFilter for JniFilter {
    fn should_allow(&self, conn: &ConnectionInfo) -> bool {
        let sni = match &conn.server_name {
            Some(sni) => sni,
            None => return true,
        };

        // -1: no socket found, -2: socket table unreadable
        let lookup = match conn.uid {
            Some(uid) => Ok(Some(uid)),
            None => owner_uid(conn),
        };
        let uid = match lookup {
            Ok(Some(uid)) => uid as jint,
            Ok(None) => -1,
            Err(e) => {
                error!("Socket table lookup failed: {}", e);
                -2
            }
        };

        let mut env = match self.jvm.attach_current_thread() {
            Ok(env) => env,
            Err(e) => {
                error!("Could not attach to JVM thread: {}", e);
                return true;
            }
        };

        match self.call_should_allow(&mut env, conn, sni, uid) {
            Ok(allow) => allow,
            Err(e) => {
                warn!("shouldAllow failed: {}", e);
                if env.exception_check().unwrap_or(false) {
                    let _ = env.exception_clear();
                }
                true
            }
        }
    }
}

// =============================================================================
// JNI Native Methods
// =============================================================================

/// Create a filtering tunnel over the VpnService TUN fd.
///
/// Returns a handle, or 0 on error.
#[no_mangle]
pub extern "system" fn Java_com_tunfilter_TunFilterBridge_nativeCreate(
    env: JNIEnv,
    obj: JObject,
    tun_fd: jint,
) -> jlong {
    if tun_fd < 0 {
        return 0;
    }

    let jvm = match env.get_java_vm() {
        Ok(jvm) => jvm,
        Err(e) => {
            error!("Could not get JVM: {}", e);
            return 0;
        }
    };
    let bridge_ref = match env.new_global_ref(&obj) {
        Ok(r) => r,
        Err(e) => {
            error!("Could not reference bridge object: {}", e);
            return 0;
        }
    };

    let policy: Arc<dyn PacketPolicy> =
        Arc::new(ConnectionPolicy::new(JniFilter { jvm, bridge_ref }));
    // Safety: VpnService detached the fd and hands ownership to us
    let fd = unsafe { OwnedFd::from_raw_fd(tun_fd) };

    match FfiTunnel::new(fd, policy, None) {
        Ok(tunnel) => tunnel.into_handle() as jlong,
        Err(e) => {
            error!("Failed to create tunnel from fd {}: {}", tun_fd, e);
            0
        }
    }
}

/// Get the interface name.
#[no_mangle]
pub extern "system" fn Java_com_tunfilter_TunFilterBridge_nativeGetName<'local>(
    env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
) -> JString<'local> {
    if handle == 0 {
        return JString::default();
    }

    let tunnel = unsafe { FfiTunnel::from_handle(handle as TunFilterHandle) };
    env.new_string(tunnel.name()).unwrap_or_default()
}

/// Get the interface MTU, or a negative result code.
#[no_mangle]
pub extern "system" fn Java_com_tunfilter_TunFilterBridge_nativeGetMtu(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jint {
    if handle == 0 {
        return TunFilterResult::InvalidParam as jint;
    }

    match unsafe { FfiTunnel::from_handle(handle as TunFilterHandle) }.mtu() {
        Ok(mtu) => mtu as jint,
        Err(e) => TunFilterResult::from(&e) as jint,
    }
}

/// Enable pcap capture to `name`, or disable it when `name` is null.
#[no_mangle]
pub extern "system" fn Java_com_tunfilter_TunFilterBridge_nativePcap(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    name: JString,
    record_size: jint,
    file_size: jint,
) -> jint {
    if handle == 0 {
        return TunFilterResult::InvalidParam as jint;
    }

    let tunnel = unsafe { FfiTunnel::from_handle(handle as TunFilterHandle) };
    let path = match get_string(&mut env, &name) {
        Some(path) => path,
        None => {
            tunnel.pcap().stop();
            return TunFilterResult::Ok as jint;
        }
    };

    if record_size <= 0 || file_size <= 0 {
        return TunFilterResult::InvalidParam as jint;
    }

    let config = CaptureConfig {
        path: path.into(),
        record_size: record_size as usize,
        file_size: file_size as u64,
    };
    match tunnel.pcap().start(&config) {
        Ok(()) => TunFilterResult::Ok as jint,
        Err(e) => {
            error!("{}", e);
            TunFilterResult::CaptureFailed as jint
        }
    }
}

/// Close the tunnel and release the handle.
#[no_mangle]
pub extern "system" fn Java_com_tunfilter_TunFilterBridge_nativeDestroy(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jint {
    if handle == 0 {
        return TunFilterResult::InvalidParam as jint;
    }

    match unsafe { FfiTunnel::close_handle(handle as TunFilterHandle) } {
        Ok(()) => TunFilterResult::Ok as jint,
        Err(e) => TunFilterResult::from(&e) as jint,
    }
}
