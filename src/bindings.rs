//! C Bindings for VenomBroadcast
//!
//! Provides a raw C API for creating broadcast channels, sending and
//! receiving notifications.

use crate::channel::{BroadcastChannel, ChannelConfig, DEFAULT_LOCK_TIMEOUT};
use crate::queue::{BroadcastMessage, MessageType};
use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;
use std::slice;
use std::time::Duration;

// Opaque handle
pub struct VenomBroadcastHandle(BroadcastChannel);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VenomBroadcastMessage {
    pub sender_process_id: u64,
    pub timestamp: u64,
    pub payload_id: u64,
    pub message_type: u8,
}

impl From<&BroadcastMessage> for VenomBroadcastMessage {
    fn from(message: &BroadcastMessage) -> Self {
        Self {
            sender_process_id: message.sender_process_id,
            timestamp: message.timestamp,
            payload_id: message.payload_id,
            message_type: message.message_type.as_raw(),
        }
    }
}

/// Create (or attach to) a broadcast channel
///
/// `process_id` of 0 uses the OS process id, `lock_timeout_ms` of 0 uses
/// the default bounded wait. Returns null on failure.
///
/// # Safety
/// name must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn venom_broadcast_create(
    name: *const c_char,
    capacity: usize,
    process_id: u64,
    lock_timeout_ms: u64,
) -> *mut VenomBroadcastHandle {
    if name.is_null() {
        return ptr::null_mut();
    }

    let c_str = CStr::from_ptr(name);
    let str_slice = match c_str.to_str() {
        Ok(s) => s,
        Err(_) => return ptr::null_mut(),
    };

    let mut config = ChannelConfig::default();
    if process_id != 0 {
        config.process_id = process_id;
    }
    config.lock_timeout = if lock_timeout_ms == 0 {
        DEFAULT_LOCK_TIMEOUT
    } else {
        Duration::from_millis(lock_timeout_ms)
    };

    let mut channel = BroadcastChannel::new(config);
    match channel.create(str_slice, capacity) {
        Ok(()) => Box::into_raw(Box::new(VenomBroadcastHandle(channel))),
        Err(err) => {
            log::error!("venom_broadcast_create('{}') failed: {}", str_slice, err);
            ptr::null_mut()
        }
    }
}

/// Destroy a channel handle, releasing the shared region
///
/// # Safety
/// handle must come from `venom_broadcast_create` and not be used afterwards
#[no_mangle]
pub unsafe extern "C" fn venom_broadcast_destroy(handle: *mut VenomBroadcastHandle) {
    if !handle.is_null() {
        let mut boxed = Box::from_raw(handle);
        if let Err(err) = boxed.0.destroy() {
            log::warn!("venom_broadcast_destroy failed: {}", err);
        }
    }
}

/// Broadcast a message
///
/// Returns `false` on lock timeout or invalid handle.
///
/// # Safety
/// handle must be null or a live handle
#[no_mangle]
pub unsafe extern "C" fn venom_broadcast_send(
    handle: *mut VenomBroadcastHandle,
    payload_id: u64,
    message_type: u8,
) -> bool {
    let Some(handle) = handle.as_mut() else {
        return false;
    };
    handle
        .0
        .broadcast(payload_id, MessageType::from_raw(message_type))
        .is_ok()
}

/// Receive new messages, newest first
///
/// Copies at most `max` messages into `out` and returns how many were
/// copied, or -1 on lock timeout or invalid arguments. Messages beyond `max`
/// are dropped; the cursor still advances.
///
/// # Safety
/// handle must be null or a live handle; out must point to `max` writable
/// messages
#[no_mangle]
pub unsafe extern "C" fn venom_broadcast_receive(
    handle: *mut VenomBroadcastHandle,
    timeout_ms: u64,
    loopback: bool,
    out: *mut VenomBroadcastMessage,
    max: usize,
) -> isize {
    let Some(handle) = handle.as_mut() else {
        return -1;
    };
    if out.is_null() && max > 0 {
        return -1;
    }

    let messages = match handle
        .0
        .receive_broadcast(Duration::from_millis(timeout_ms), loopback)
    {
        Ok(messages) => messages,
        Err(_) => return -1,
    };

    if max == 0 {
        return 0;
    }
    let out = slice::from_raw_parts_mut(out, max);
    let count = messages.len().min(max);
    for (dst, src) in out.iter_mut().zip(&messages) {
        *dst = VenomBroadcastMessage::from(src);
    }
    count as isize
}

/// Mark pending messages as seen for this handle only
///
/// # Safety
/// handle must be null or a live handle
#[no_mangle]
pub unsafe extern "C" fn venom_broadcast_flush_local(handle: *mut VenomBroadcastHandle) -> bool {
    match handle.as_mut() {
        Some(handle) => handle.0.flush_local().is_ok(),
        None => false,
    }
}

/// Empty the shared queue for every process
///
/// # Safety
/// handle must be null or a live handle
#[no_mangle]
pub unsafe extern "C" fn venom_broadcast_flush_global(handle: *mut VenomBroadcastHandle) -> bool {
    match handle.as_mut() {
        Some(handle) => handle.0.flush_global().is_ok(),
        None => false,
    }
}
