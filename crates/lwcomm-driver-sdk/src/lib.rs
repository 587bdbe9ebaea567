// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Driver/device/tag runtime and the stable C ABI field-bus drivers
//! link against (spec §4.6, §6).
//!
//! A [`Driver`] owns many [`Device`]s, each owning many [`Tag`]s. The
//! driver embeds a local [`lwcomm::Server`] (direct subscribers and
//! control RPCs) and an auto-reconnecting [`lwcomm::Client`] to the
//! process-wide hub, and runs a shared [`TimerService`] for
//! per-device user timers. [`abi`] exposes the `InitDriver`/`OnControl`/
//! `drv_*` C ABI that compiled driver plugins link against.

pub mod abi;
pub mod datatype;
pub mod device;
pub mod driver;
pub mod tag;
pub mod timer;

pub use datatype::DataType;
pub use device::Device;
pub use driver::{Driver, DriverCallbacks, DriverConfig};
pub use tag::{Tag, TagUpdateRow};
pub use timer::{TimerHandle, TimerService};
