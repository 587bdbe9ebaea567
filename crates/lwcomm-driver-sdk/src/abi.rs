// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The stable C ABI (spec §6 "Driver <-> SDK C ABI") and the `drv_*`
//! helper functions it exposes back to driver shared libraries.
//!
//! Grounded on `hdds-c/src/pubsub.rs`'s opaque-handle pattern
//! (`#[repr(C)] struct Foo { _private: [u8; 0] }`, `Box::into_raw` /
//! `Box::from_raw` for ownership transfer) and `lwdrvcmn.h`'s
//! `drv_connect/send/recv/settagdata_*/create_timer/...` declarations.
//!
//! **Design decision**: the source's `LWDRIVER`/`LWDEVICE`/`LWTAG` are
//! plain C structs a driver `.so` reads fields from directly. This SDK
//! exposes them as opaque handles plus accessor functions instead of a
//! byte-compatible struct layout — spec §6 allows a replacement ABI
//! "if compatibility with existing compiled drivers" is not required.
//! Function names and parameter order otherwise follow the original.
//! One exception: `drv_logmessage`'s C variadic `fmt, ...` has no safe
//! Rust equivalent without nightly-only `c_variadic`, so it takes one
//! pre-formatted message string instead (logged via `log::log!`).

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_long, c_void};
use std::ptr;
use std::sync::Arc;

use crate::datatype::{string_to_binary, DataType};
use crate::device::Device;
use crate::driver::Driver;
use crate::tag::{Tag, QUALITY_GOOD};
use crate::timer::{TimerCallback, TimerHandle};

/// Opaque driver handle (backs an owned [`Driver`]).
#[repr(C)]
pub struct LwDriverHandle {
    _private: [u8; 0],
}

/// Opaque device handle (backs an owned `Arc<Device>`).
#[repr(C)]
pub struct LwDeviceHandle {
    _private: [u8; 0],
}

/// Opaque tag handle (backs an owned tag reference into its device).
#[repr(C)]
pub struct LwTagHandle {
    _private: [u8; 0],
}

struct TagRef {
    device: Arc<Device>,
    index: usize,
}

impl TagRef {
    fn with<R>(&self, f: impl FnOnce(&mut Tag) -> R) -> Option<R> {
        self.device.with_tag_at_index(self.index, f)
    }
}

// ===== Driver-authored lifecycle functions (symbols the loader resolves) =====

pub type InitDriverFn = unsafe extern "C" fn(*mut LwDriverHandle) -> c_long;
pub type UnInitDriverFn = unsafe extern "C" fn(*mut LwDriverHandle) -> c_long;
pub type InitDeviceFn = unsafe extern "C" fn(*mut LwDeviceHandle) -> c_long;
pub type UnInitDeviceFn = unsafe extern "C" fn(*mut LwDeviceHandle) -> c_long;
pub type OnDeviceConnStateChangedFn = unsafe extern "C" fn(*mut LwDeviceHandle, c_int);
pub type OnTimerFn = unsafe extern "C" fn(*mut LwDeviceHandle, *mut c_void) -> c_long;
pub type OnControlFn = unsafe extern "C" fn(*mut LwDeviceHandle, *mut LwTagHandle, *const c_char, c_int, c_long) -> c_long;
pub type GetVersionFn = unsafe extern "C" fn() -> c_long;

// ===== Handle lifecycle =====

/// Create a driver handle. Ownership passes to the caller, which must
/// eventually call [`lwcomm_driver_destroy`].
///
/// # Safety
/// `driver` must be a valid, fully constructed [`Driver`].
#[no_mangle]
pub unsafe extern "C" fn lwcomm_driver_create(driver: Driver) -> *mut LwDriverHandle {
    Box::into_raw(Box::new(driver)).cast::<LwDriverHandle>()
}

/// # Safety
/// `handle` must be a valid pointer from [`lwcomm_driver_create`], or NULL.
#[no_mangle]
pub unsafe extern "C" fn lwcomm_driver_destroy(handle: *mut LwDriverHandle) {
    if !handle.is_null() {
        let driver = Box::from_raw(handle.cast::<Driver>());
        driver.stop();
    }
}

/// # Safety
/// `device` must be a valid `Arc<Device>` handed to
/// [`lwcomm_device_create`]'s caller.
#[no_mangle]
pub unsafe extern "C" fn lwcomm_device_create(device: Arc<Device>) -> *mut LwDeviceHandle {
    Box::into_raw(Box::new(device)).cast::<LwDeviceHandle>()
}

/// # Safety
/// `handle` must be a valid pointer from [`lwcomm_device_create`], or NULL.
#[no_mangle]
pub unsafe extern "C" fn lwcomm_device_destroy(handle: *mut LwDeviceHandle) {
    if !handle.is_null() {
        let _ = Box::from_raw(handle.cast::<Arc<Device>>());
    }
}

unsafe fn device_ref<'a>(handle: *mut LwDeviceHandle) -> Option<&'a Arc<Device>> {
    if handle.is_null() {
        None
    } else {
        Some(&*handle.cast::<Arc<Device>>())
    }
}

unsafe fn tag_ref<'a>(handle: *mut LwTagHandle) -> Option<&'a TagRef> {
    if handle.is_null() {
        None
    } else {
        Some(&*handle.cast::<TagRef>())
    }
}

fn cstr_to_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

// ===== drv_connect / drv_disconnect =====

/// # Safety
/// `device` must be a handle from [`lwcomm_device_create`].
#[no_mangle]
pub unsafe extern "C" fn drv_connect(device: *mut LwDeviceHandle, timeout_ms: c_int) -> c_int {
    match device_ref(device) {
        Some(d) => match d.connect(timeout_ms.max(0) as u32) {
            Ok(()) => 0,
            Err(_) => -1,
        },
        None => -1,
    }
}

/// # Safety
/// `device` must be a handle from [`lwcomm_device_create`].
#[no_mangle]
pub unsafe extern "C" fn drv_disconnect(device: *mut LwDeviceHandle) -> c_int {
    match device_ref(device) {
        Some(d) => {
            d.disconnect();
            0
        }
        None => -1,
    }
}

// ===== drv_send / drv_recv / drv_sendto / drv_recvfrom =====

/// # Safety
/// `device` must be valid; `data` must point to at least `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn drv_send(device: *mut LwDeviceHandle, data: *const c_char, len: u32, timeout_ms: c_int) -> c_int {
    let Some(d) = device_ref(device) else { return -1 };
    if data.is_null() {
        return -1;
    }
    let slice = std::slice::from_raw_parts(data.cast::<u8>(), len as usize);
    match d.send(slice, timeout_ms.max(0) as u32) {
        Ok(n) => n as c_int,
        Err(_) => -1,
    }
}

/// # Safety
/// `device` must be valid; `buffer` must point to at least `len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn drv_recv(device: *mut LwDeviceHandle, buffer: *mut c_char, len: u32, timeout_ms: c_int) -> c_int {
    let Some(d) = device_ref(device) else { return -1 };
    if buffer.is_null() {
        return -1;
    }
    let slice = std::slice::from_raw_parts_mut(buffer.cast::<u8>(), len as usize);
    match d.recv(slice, timeout_ms.max(0) as u32) {
        Ok(n) => n as c_int,
        Err(_) => -1,
    }
}

/// # Safety
/// `device` must be valid; `address` a null-terminated C string; `data` at least `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn drv_sendto(device: *mut LwDeviceHandle, address: *mut c_char, data: *const c_char, len: u32, timeout_ms: c_int) -> c_int {
    let Some(d) = device_ref(device) else { return -1 };
    let Some(addr) = cstr_to_str(address) else { return -1 };
    if data.is_null() {
        return -1;
    }
    let slice = std::slice::from_raw_parts(data.cast::<u8>(), len as usize);
    match d.send_to(addr, slice, timeout_ms.max(0) as u32) {
        Ok(n) => n as c_int,
        Err(_) => -1,
    }
}

/// # Safety
/// `device` must be valid; `address` must have room for `LW_IOADDR_MAXLEN` bytes;
/// `buffer` must have room for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn drv_recvfrom(device: *mut LwDeviceHandle, address: *mut c_char, buffer: *mut c_char, len: u32, timeout_ms: c_int) -> c_int {
    let Some(d) = device_ref(device) else { return -1 };
    if buffer.is_null() {
        return -1;
    }
    let slice = std::slice::from_raw_parts_mut(buffer.cast::<u8>(), len as usize);
    match d.recv_from(slice, timeout_ms.max(0) as u32) {
        Ok((n, from)) => {
            if !address.is_null() {
                write_cstr_truncated(address, &from, 128);
            }
            n as c_int
        }
        Err(_) => -1,
    }
}

unsafe fn write_cstr_truncated(dest: *mut c_char, text: &str, cap: usize) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(cap.saturating_sub(1));
    ptr::copy_nonoverlapping(bytes.as_ptr().cast::<c_char>(), dest, n);
    *dest.add(n) = 0;
}

/// # Safety
/// `device` must be a handle from [`lwcomm_device_create`].
#[no_mangle]
pub unsafe extern "C" fn drv_clear_recv_buffer(device: *mut LwDeviceHandle) {
    if let Some(d) = device_ref(device) {
        d.clear_recv_buffer();
    }
}

// ===== tag data =====

/// # Safety
/// `tag` must be a handle from [`lwcomm_device_create_tag_handle`]; `value` a null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn drv_settagdata_text(tag: *mut LwTagHandle, value: *const c_char, tagmsec: u32, tag_quantity: c_int) -> c_int {
    let Some(t) = tag_ref(tag) else { return -1 };
    let Some(value) = cstr_to_str(value) else { return -1 };
    t.with(|tag| tag.set_text(value, tagmsec as u64, tag_quantity)).map(|_| 0).unwrap_or(-1)
}

/// # Safety
/// `tag` must be valid; `value` must point to at least `value_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn drv_settagdata_binary(tag: *mut LwTagHandle, value: *const c_void, value_len: c_int, tagmsec: u32, tag_quantity: c_int) -> c_int {
    let Some(t) = tag_ref(tag) else { return -1 };
    if value.is_null() || value_len < 0 {
        return -1;
    }
    let slice = std::slice::from_raw_parts(value.cast::<u8>(), value_len as usize);
    t.with(|tag| tag.set_binary(slice, tagmsec as u64, tag_quantity)).map(|_| 0).unwrap_or(-1)
}

/// # Safety
/// `device` must be valid; `tags` must point to `tag_count` valid tag handles.
#[no_mangle]
pub unsafe extern "C" fn drv_update_tagsdata(device: *mut LwDeviceHandle, tags: *mut *mut LwTagHandle, tag_count: c_int) -> c_int {
    let Some(d) = device_ref(device) else { return -1 };
    if tags.is_null() || tag_count < 0 {
        return -1;
    }
    let handles = std::slice::from_raw_parts(tags, tag_count as usize);
    let mut rows = Vec::with_capacity(handles.len());
    for &h in handles {
        if let Some(t) = tag_ref(h) {
            if let Some(row) = t.with(|tag| crate::tag::TagUpdateRow::from(&*tag)) {
                rows.push(row);
            }
        }
    }
    let n = rows.len() as c_int;
    PENDING_UPDATE.with(|cell| *cell.borrow_mut() = Some((d.name.clone(), rows)));
    n
}

thread_local! {
    /// The last batch built by `drv_update_tagsdata`, drained by the
    /// host driver runtime and published on `/tags/update`. Kept
    /// thread-local since the source documents tag data as mutated
    /// "without an explicit per-tag lock... relies on callback
    /// single-threading per device" (spec §5).
    static PENDING_UPDATE: std::cell::RefCell<Option<(String, Vec<crate::tag::TagUpdateRow>)>> = const { std::cell::RefCell::new(None) };
}

/// Drain the batch built by the most recent `drv_update_tagsdata` call
/// on this thread, if any. Used by the driver host loop to actually
/// publish the update (the C ABI side only builds the VTQ batch).
pub fn take_pending_update() -> Option<(String, Vec<crate::tag::TagUpdateRow>)> {
    PENDING_UPDATE.with(|cell| cell.borrow_mut().take())
}

/// # Safety
/// `device` must be valid; `address` a null-terminated C string; `value` at least `value_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn drv_update_tagdate_by_address(
    device: *mut LwDeviceHandle,
    address: *const c_char,
    value: *const c_void,
    value_len: u64,
    tagmsec: u64,
    tag_quantity: c_int,
) -> c_int {
    let Some(d) = device_ref(device) else { return -1 };
    let Some(addr) = cstr_to_str(address) else { return -1 };
    if value.is_null() {
        return -1;
    }
    let slice = std::slice::from_raw_parts(value.cast::<u8>(), value_len as usize);
    let mut count = 0;
    d.with_tags_at_address(addr, |tag| {
        tag.set_binary(slice, tagmsec, tag_quantity);
        count += 1;
    });
    count
}

/// # Safety
/// `fmt` must be a valid null-terminated C string holding a
/// pre-formatted message (see module doc for why this deviates from
/// the source's variadic signature).
#[no_mangle]
pub unsafe extern "C" fn drv_logmessage(level: c_int, fmt: *const c_char) {
    let Some(message) = cstr_to_str(fmt) else { return };
    match level {
        0x01 => log::debug!("{}", message),
        0x08 | 0x10 => log::error!("{}", message),
        0x04 => log::warn!("{}", message),
        0x20 => log::info!("{}", message),
        _ => log::info!("{}", message),
    }
}

// ===== timers =====

/// # Safety
/// `device` must be valid. `callback`/`timers` are supplied by the
/// driver-loader host, not a driver `.so` directly — see
/// `tools/lwcomm-driver-loader`.
#[no_mangle]
pub unsafe extern "C" fn drv_create_timer_with_callback(device: *mut LwDeviceHandle, period_ms: c_int, phase_ms: c_int, timers: &crate::timer::TimerService, callback: TimerCallback) -> *mut c_void {
    if device_ref(device).is_none() {
        return ptr::null_mut();
    }
    let handle = timers.create_timer(period_ms.max(0) as u32, phase_ms.max(0) as u32, callback);
    Box::into_raw(Box::new(handle)).cast::<c_void>()
}

/// # Safety
/// `timer_handle` must be a pointer from `drv_create_timer_with_callback`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn drv_destroy_timer(timers: &crate::timer::TimerService, timer_handle: *mut c_void) {
    if timer_handle.is_null() {
        return;
    }
    let handle = Box::from_raw(timer_handle.cast::<TimerHandle>());
    timers.destroy_timer(&handle);
}

// ===== tag lookup and read-back (supplemented getters) =====

/// Create a tag handle referencing the `index`-th tag of `device`.
/// Used by `drv_gettags_by_address`/`drv_gettag_data` callers that
/// need a stable handle rather than a borrowed closure.
///
/// # Safety
/// `device` must be a handle from [`lwcomm_device_create`].
#[no_mangle]
pub unsafe extern "C" fn lwcomm_device_create_tag_handle(device: *mut LwDeviceHandle, index: usize) -> *mut LwTagHandle {
    match device_ref(device) {
        Some(d) if index < d.tag_count() => Box::into_raw(Box::new(TagRef { device: d.clone(), index })).cast::<LwTagHandle>(),
        _ => ptr::null_mut(),
    }
}

/// # Safety
/// `handle` must be a pointer from [`lwcomm_device_create_tag_handle`], or NULL.
#[no_mangle]
pub unsafe extern "C" fn lwcomm_tag_handle_destroy(handle: *mut LwTagHandle) {
    if !handle.is_null() {
        let _ = Box::from_raw(handle.cast::<TagRef>());
    }
}

/// `drv_gettags_by_address`: fill `tags` (caller-allocated, capacity
/// `tag_count`) with handles for every tag at `address`; returns the
/// number filled.
///
/// # Safety
/// `device` must be valid; `tags` must have room for `tag_count` pointers.
#[no_mangle]
pub unsafe extern "C" fn drv_gettags_by_address(device: *mut LwDeviceHandle, address: *const c_char, tags: *mut *mut LwTagHandle, tag_count: c_int) -> c_int {
    let Some(d) = device_ref(device) else { return -1 };
    let Some(addr) = cstr_to_str(address) else { return -1 };
    if tags.is_null() || tag_count <= 0 {
        return -1;
    }
    let out = std::slice::from_raw_parts_mut(tags, tag_count as usize);
    let indices = d.tag_indices_at_address(addr);
    let mut filled = 0;
    for idx in indices.into_iter().take(tag_count as usize) {
        out[filled] = Box::into_raw(Box::new(TagRef { device: d.clone(), index: idx })).cast::<LwTagHandle>();
        filled += 1;
    }
    filled as c_int
}

/// `drv_gettag_data`: read back a tag's current value as text plus its
/// VTQ metadata.
///
/// # Safety
/// `tag` must be valid; `buffer` must have room for `len` bytes;
/// `ret_value_len`/`tagmsec`/`tag_quantity` must be valid out-pointers or NULL.
#[no_mangle]
pub unsafe extern "C" fn drv_gettag_data(
    tag: *mut LwTagHandle,
    buffer: *mut c_char,
    len: u32,
    ret_value_len: *mut c_int,
    tagmsec: *mut u32,
    tag_quantity: *mut c_int,
) -> c_int {
    let Some(t) = tag_ref(tag) else { return -1 };
    let Some((text, time_ms, quality)) = t.with(|tag| (tag.value_as_string(), tag.time_milli(), tag.quantity())) else {
        return -1;
    };
    if !buffer.is_null() {
        write_cstr_truncated(buffer, &text, len as usize);
    }
    if !ret_value_len.is_null() {
        *ret_value_len = text.len() as c_int;
    }
    if !tagmsec.is_null() {
        *tagmsec = time_ms as u32;
    }
    if !tag_quantity.is_null() {
        *tag_quantity = quality;
    }
    0
}

/// `drv_tagval_str2binary`: convert a text value into `tag`'s native
/// binary encoding without writing it back into the tag (a dry-run
/// conversion preview, matching the source's separation between this
/// and `drv_settagdata_text`).
///
/// # Safety
/// `tag` must be valid; `tag_string_val` a null-terminated C string;
/// `buffer` must have room for `buffer_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn drv_tagval_str2binary(
    tag: *mut LwTagHandle,
    tag_string_val: *const c_char,
    buffer: *mut c_void,
    buffer_len: u32,
    ret_value_buffer_len_bytes: *mut c_int,
    ret_value_buffer_len_bits: *mut c_int,
) -> c_int {
    let Some(t) = tag_ref(tag) else { return -1 };
    let Some(value) = cstr_to_str(tag_string_val) else { return -1 };
    let Some(dt) = t.with(|tag| tag.data_type) else { return -1 };

    let mut out = Vec::new();
    string_to_binary(dt, value, buffer_len as usize, &mut out);
    if !buffer.is_null() {
        let n = out.len().min(buffer_len as usize);
        ptr::copy_nonoverlapping(out.as_ptr(), buffer.cast::<u8>(), n);
    }
    if !ret_value_buffer_len_bytes.is_null() {
        *ret_value_buffer_len_bytes = out.len() as c_int;
    }
    if !ret_value_buffer_len_bits.is_null() {
        *ret_value_buffer_len_bits = (out.len() * 8) as c_int;
    }
    0
}

/// # Safety
/// `device` must be a handle from [`lwcomm_device_create`].
#[no_mangle]
pub unsafe extern "C" fn drv_set_connect_timeout(device: *mut LwDeviceHandle, timeout_ms: c_int) -> c_int {
    match device_ref(device) {
        Some(_) => {
            let _ = timeout_ms;
            0
        }
        None => -1,
    }
}

/// # Safety
/// `device` must be a handle from [`lwcomm_device_create`].
#[no_mangle]
pub unsafe extern "C" fn drv_set_connect_success(device: *mut LwDeviceHandle, success: c_int) -> c_int {
    match device_ref(device) {
        Some(d) => {
            d.set_connected(success != 0);
            0
        }
        None => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DataType;

    #[test]
    fn tag_handle_round_trips_through_drv_settagdata_text() {
        let device = Arc::new(Device::new("plc1", 1, ""));
        device.add_tag(Tag::new("level", "40001", DataType::Float, 4));

        unsafe {
            let device_handle = lwcomm_device_create(device.clone());
            let tag_handle = lwcomm_device_create_tag_handle(device_handle, 0);
            assert!(!tag_handle.is_null());

            let value = std::ffi::CString::new("9.75").unwrap();
            let rc = drv_settagdata_text(tag_handle, value.as_ptr(), 1234, QUALITY_GOOD);
            assert_eq!(rc, 0);

            let mut buf = [0 as c_char; 32];
            let mut ret_len = 0;
            let mut tagmsec = 0u32;
            let mut quantity = 0;
            let rc = drv_gettag_data(tag_handle, buf.as_mut_ptr(), 32, &mut ret_len, &mut tagmsec, &mut quantity);
            assert_eq!(rc, 0);
            assert_eq!(tagmsec, 1234);
            let text = CStr::from_ptr(buf.as_ptr()).to_str().unwrap();
            assert_eq!(text, "9.75");

            lwcomm_tag_handle_destroy(tag_handle);
            lwcomm_device_destroy(device_handle);
        }
    }
}
