// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `lwcomm-driver-loader` - loads one or more compiled driver plugins
//! (shared libraries exporting the spec §6 C ABI) and runs their
//! devices against the messaging core: an embedded local server per
//! driver plus an auto-reconnecting client to the process-wide hub
//! (spec §4.6 "Model").
//!
//! The row shapes this reads (driver/device/tag configuration) mirror
//! the out-of-scope configuration-loader's SQLite schema (spec §1);
//! only the JSON projection of those rows is specified here, the same
//! way `lwcomm-alarm-server` only consumes `t_points`/`t_alarm_rules`
//! rows without owning the schema that produces them.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::raw::{c_int, c_long, c_void};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use libloading::Library;
use serde::Deserialize;

use lwcomm::Address;
use lwcomm_driver_sdk::abi::{self, GetVersionFn, InitDeviceFn, InitDriverFn, LwDeviceHandle, LwDriverHandle, OnControlFn, OnDeviceConnStateChangedFn, OnTimerFn, UnInitDeviceFn, UnInitDriverFn};
use lwcomm_driver_sdk::datatype::DataType;
use lwcomm_driver_sdk::device::Device;
use lwcomm_driver_sdk::driver::{Driver, DriverCallbacks, DriverConfig};
use lwcomm_driver_sdk::tag::Tag;

#[derive(Parser, Debug)]
#[command(name = "lwcomm-driver-loader")]
#[command(version, about = "Loads lwcomm driver plugins and runs their devices against the messaging core")]
struct Args {
    /// Per-service JSON config file name, resolved via LWCOMM_CONFIG_PATH.
    #[arg(short, long, default_value = "driver-loader.json")]
    config: String,
}

#[derive(Deserialize)]
struct LoaderConfig {
    drivers: Vec<DriverRow>,
    #[serde(default = "default_hub_addr")]
    hub_addr: String,
}

fn default_hub_addr() -> String {
    "tcp://127.0.0.1:7878".to_string()
}

/// One driver instance: which `.so` to load, its local listen address,
/// and the devices/tags it owns. The `.so` is expected to be a Rust
/// cdylib built against `lwcomm-driver-sdk` (see
/// `crates/lwcomm-driver-sdk/src/abi.rs`'s module doc on why the stable
/// ABI here targets Rust cdylib drivers rather than arbitrary C ones).
#[derive(Deserialize)]
struct DriverRow {
    name: String,
    #[serde(default)]
    desc: String,
    so_path: String,
    listen: String,
    #[serde(default)]
    param1: String,
    #[serde(default)]
    param2: String,
    #[serde(default)]
    param3: String,
    #[serde(default)]
    param4: String,
    #[serde(default = "default_reconnect_ms")]
    reconnect_interval_ms: u64,
    devices: Vec<DeviceRow>,
}

fn default_reconnect_ms() -> u64 {
    3000
}

#[derive(Deserialize)]
struct DeviceRow {
    name: String,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    conn_type: i32,
    #[serde(default)]
    conn_param: String,
    #[serde(default = "default_timeout_ms")]
    conn_timeout_ms: u32,
    #[serde(default = "default_timeout_ms")]
    recv_timeout_ms: u32,
    /// Period of the per-device user timer (spec §4.6 "Start sequence":
    /// "start...each user-declared per-device timer"). Zero disables it.
    #[serde(default)]
    poll_interval_ms: u32,
    tags: Vec<TagRow>,
}

fn default_timeout_ms() -> u32 {
    3000
}

#[derive(Deserialize)]
struct TagRow {
    name: String,
    address: String,
    data_type: i32,
    data_length: usize,
}

fn main() {
    let args = Args::parse();
    env_logger::init();

    let config: LoaderConfig = match lwcomm::config::load_json(&args.config) {
        Ok(c) => c,
        Err(e) => {
            log::error!("driver-loader: could not load {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config) {
        log::error!("driver-loader: fatal: {}", e);
        std::process::exit(1);
    }
}

fn run(config: LoaderConfig) -> Result<(), Box<dyn std::error::Error>> {
    let hub_addr = Address::parse(&config.hub_addr)?;

    let mut loaded = Vec::new();
    for row in config.drivers {
        match load_driver(&row, &hub_addr) {
            Ok(driver) => loaded.push(driver),
            Err(e) => log::error!("driver-loader: failed to load driver {}: {}", row.name, e),
        }
    }
    if loaded.is_empty() {
        return Err("no driver loaded successfully".into());
    }

    for driver in &loaded {
        driver.start()?;
    }
    log::info!("lwcomm-driver-loader running {} driver(s)", loaded.len());

    let running = Arc::new(AtomicBool::new(true));
    let running_for_handler = running.clone();
    ctrlc::set_handler(move || running_for_handler.store(false, Ordering::SeqCst)).ok();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    log::info!("lwcomm-driver-loader shutting down");
    for driver in &loaded {
        driver.stop_and_unload();
    }
    Ok(())
}

/// A loaded driver: the `.so` (kept alive for as long as its resolved
/// symbols might be called), the running [`Driver`], and the ABI
/// handles passed to the plugin's lifecycle functions.
struct LoadedDriver {
    driver: Driver,
    driver_handle: RawHandle,
}

impl LoadedDriver {
    fn start(&self) -> std::io::Result<()> {
        self.driver.start()
    }

    /// `UnInitDevice`/`UnInitDriver` fire as a side effect of
    /// [`abi::lwcomm_driver_destroy`] calling `Driver::stop` on the
    /// handle's own (shared) `Driver` clone; the loader does not call
    /// `Driver::stop` a second time to avoid double `UnInit*` calls
    /// into the plugin.
    fn stop_and_unload(&self) {
        unsafe { abi::lwcomm_driver_destroy(self.driver_handle.0.cast::<LwDriverHandle>()) };
    }
}

/// Raw pointers aren't `Send`/`Sync` by default; these are only ever
/// dereferenced through the ABI functions they were created for, which
/// is sound as long as the owning [`Library`] outlives them (enforced
/// by leaking it into [`DriverSymbols`] below, dropped only at process
/// exit).
#[derive(Clone, Copy)]
struct RawHandle(*mut c_void);
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

struct DriverSymbols {
    _lib: Library,
    init_driver: InitDriverFn,
    uninit_driver: UnInitDriverFn,
    init_device: InitDeviceFn,
    uninit_device: UnInitDeviceFn,
    on_conn_changed: OnDeviceConnStateChangedFn,
    on_timer: OnTimerFn,
    on_control: OnControlFn,
}

/// Bridges [`DriverCallbacks`] (the Rust-native seam `Driver` invokes)
/// to the plugin's raw C-ABI symbols, holding one [`LwDeviceHandle`]
/// per device so the plugin always sees the same handle across calls.
struct PluginCallbacks {
    symbols: DriverSymbols,
    device_handles: HashMap<String, RawHandle>,
    /// Set once, after the [`Driver`] itself exists (see
    /// [`load_driver`]) and before `Driver::start` can call
    /// `init_driver` — construction order otherwise can't give this
    /// struct its own driver handle at creation time.
    driver_handle: parking_lot::Mutex<Option<RawHandle>>,
}

impl DriverCallbacks for PluginCallbacks {
    fn init_driver(&self, _driver: &Driver) -> i64 {
        match self.driver_ffi_handle() {
            Some(handle) => unsafe { (self.symbols.init_driver)(handle) },
            None => -1,
        }
    }

    fn uninit_driver(&self, _driver: &Driver) -> i64 {
        match self.driver_ffi_handle() {
            Some(handle) => unsafe { (self.symbols.uninit_driver)(handle) },
            None => -1,
        }
    }

    fn init_device(&self, device: &Arc<Device>) -> i64 {
        match self.device_handles.get(&device.name) {
            Some(h) => unsafe { (self.symbols.init_device)(h.0.cast::<LwDeviceHandle>()) },
            None => -1,
        }
    }

    fn uninit_device(&self, device: &Arc<Device>) -> i64 {
        match self.device_handles.get(&device.name) {
            Some(h) => unsafe { (self.symbols.uninit_device)(h.0.cast::<LwDeviceHandle>()) },
            None => -1,
        }
    }

    fn on_device_conn_state_changed(&self, device: &Arc<Device>, connected: bool) {
        if let Some(h) = self.device_handles.get(&device.name) {
            unsafe { (self.symbols.on_conn_changed)(h.0.cast::<LwDeviceHandle>(), connected as c_int) };
        }
    }

    fn on_timer(&self, device: &Arc<Device>) -> i64 {
        match self.device_handles.get(&device.name) {
            Some(h) => unsafe { (self.symbols.on_timer)(h.0.cast::<LwDeviceHandle>(), std::ptr::null_mut()) },
            None => -1,
        }
    }

    fn on_control(&self, device: &Arc<Device>, tag_name: &str, value: &str, cmd_id: i64) -> i64 {
        let Some(h) = self.device_handles.get(&device.name) else { return -1 };
        let Some(index) = device.tag_index_named(tag_name) else { return -1 };
        let tag_handle = unsafe { abi::lwcomm_device_create_tag_handle(h.0.cast::<LwDeviceHandle>(), index) };
        if tag_handle.is_null() {
            return -1;
        }
        let value_c = match std::ffi::CString::new(value) {
            Ok(c) => c,
            Err(_) => return -1,
        };
        let rc = unsafe { (self.symbols.on_control)(h.0.cast::<LwDeviceHandle>(), tag_handle, value_c.as_ptr(), value.len() as c_int, cmd_id as c_long) };
        unsafe { abi::lwcomm_tag_handle_destroy(tag_handle) };
        rc
    }
}

impl PluginCallbacks {
    fn set_driver_handle(&self, handle: RawHandle) {
        *self.driver_handle.lock() = Some(handle);
    }

    fn driver_ffi_handle(&self) -> Option<*mut LwDriverHandle> {
        self.driver_handle.lock().map(|h| h.0.cast::<LwDriverHandle>())
    }
}

fn load_driver(row: &DriverRow, hub_addr: &Address) -> Result<LoadedDriver, Box<dyn std::error::Error>> {
    let lib = unsafe { Library::new(OsStr::new(&row.so_path))? };
    let init_driver: InitDriverFn = unsafe { *lib.get::<InitDriverFn>(b"InitDriver\0")? };
    let uninit_driver: UnInitDriverFn = unsafe { *lib.get::<UnInitDriverFn>(b"UnInitDriver\0")? };
    let init_device: InitDeviceFn = unsafe { *lib.get::<InitDeviceFn>(b"InitDevice\0")? };
    let uninit_device: UnInitDeviceFn = unsafe { *lib.get::<UnInitDeviceFn>(b"UnInitDevice\0")? };
    let on_conn_changed: OnDeviceConnStateChangedFn = unsafe { *lib.get::<OnDeviceConnStateChangedFn>(b"OnDeviceConnStateChanged\0")? };
    let on_timer: OnTimerFn = unsafe { *lib.get::<OnTimerFn>(b"OnTimer\0")? };
    let on_control: OnControlFn = unsafe { *lib.get::<OnControlFn>(b"OnControl\0")? };
    if let Ok(get_version) = unsafe { lib.get::<GetVersionFn>(b"GetVersion\0") } {
        log::info!("driver {}: plugin ABI version {}", row.name, unsafe { get_version() });
    }

    let local_addr = Address::parse(&row.listen)?;
    let driver_config = DriverConfig {
        name: row.name.clone(),
        desc: row.desc.clone(),
        param1: row.param1.clone(),
        param2: row.param2.clone(),
        param3: row.param3.clone(),
        param4: row.param4.clone(),
        local_addr,
        hub_addr: hub_addr.clone(),
        reconnect_interval: Duration::from_millis(row.reconnect_interval_ms),
    };

    let mut device_handles = HashMap::new();
    let devices: Vec<Arc<Device>> = row
        .devices
        .iter()
        .map(|d| {
            let device = Arc::new(build_device(d));
            let handle = unsafe { abi::lwcomm_device_create(device.clone()) };
            device_handles.insert(d.name.clone(), RawHandle(handle.cast::<c_void>()));
            device
        })
        .collect();

    let callbacks = Arc::new(PluginCallbacks {
        symbols: DriverSymbols {
            _lib: lib,
            init_driver,
            uninit_driver,
            init_device,
            uninit_device,
            on_conn_changed,
            on_timer,
            on_control,
        },
        device_handles,
        driver_handle: parking_lot::Mutex::new(None),
    });

    let driver = Driver::new(driver_config, callbacks.clone());
    for (device, row) in devices.into_iter().zip(row.devices.iter()) {
        driver.add_device(device.clone());
        if row.poll_interval_ms > 0 {
            spawn_device_poll_timer(&driver, &device, row.poll_interval_ms, callbacks.clone());
        }
    }

    let driver_handle = RawHandle(unsafe { abi::lwcomm_driver_create(driver.clone()) }.cast::<c_void>());
    callbacks.set_driver_handle(driver_handle);

    Ok(LoadedDriver { driver, driver_handle })
}

/// Registers the per-device user timer (spec §4.6 "start...each
/// user-declared per-device timer"): since a genuine `.so` plugin
/// cannot construct the `Arc<dyn Fn()>` that
/// `drv_create_timer_with_callback` expects (see `abi.rs`'s module
/// doc), the loader declares this one timer per device from
/// configuration instead and bridges each tick to the plugin's
/// `OnTimer` symbol.
fn spawn_device_poll_timer(driver: &Driver, device: &Arc<Device>, period_ms: u32, callbacks: Arc<PluginCallbacks>) {
    let device = device.clone();
    driver.timers().create_timer(
        period_ms,
        period_ms,
        Arc::new(move || {
            let rc = callbacks.on_timer(&device);
            if rc != 0 {
                log::warn!("driver: OnTimer for device {} returned {}", device.name, rc);
            }
        }),
    );
}

fn build_device(row: &DeviceRow) -> Device {
    let mut device = Device::new(row.name.clone(), row.conn_type, row.conn_param.clone());
    device.desc = row.desc.clone();
    device.conn_timeout_ms = row.conn_timeout_ms;
    device.recv_timeout_ms = row.recv_timeout_ms;
    for tag_row in &row.tags {
        let data_type = DataType::from_i32(tag_row.data_type);
        device.add_tag(Tag::new(tag_row.name.clone(), tag_row.address.clone(), data_type, tag_row.data_length));
    }
    device
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_device_copies_config_and_tags() {
        let row = DeviceRow {
            name: "plc1".to_string(),
            desc: "main plc".to_string(),
            conn_type: 1,
            conn_param: "192.168.1.10:502".to_string(),
            conn_timeout_ms: 2000,
            recv_timeout_ms: 2000,
            poll_interval_ms: 500,
            tags: vec![TagRow {
                name: "level".to_string(),
                address: "40001".to_string(),
                data_type: 10,
                data_length: 4,
            }],
        };
        let device = build_device(&row);
        assert_eq!(device.name, "plc1");
        assert_eq!(device.tag_count(), 1);
        assert!(device.with_tag_named("level", |t| t.data_type == DataType::Float).unwrap());
    }
}
