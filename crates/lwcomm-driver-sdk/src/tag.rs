// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tag model: name, address, data type, linear-scaling parameters, and
//! the value/time/quality (VTQ) triple (spec §3 "Tag"; source's `LWTAG`
//! in `lwdrvcmn.h`).

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::datatype::{binary_to_string, string_to_binary, DataType};

/// Point type: a directly-polled device variable, or a value computed
/// from other tags (source's `point_type` field; `1`/`2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    DeviceVariable,
    ComputedVariable,
}

impl PointType {
    pub fn from_i32(v: i32) -> PointType {
        if v == 2 {
            PointType::ComputedVariable
        } else {
            PointType::DeviceVariable
        }
    }
}

/// Linear scaling parameters applied between the raw device reading
/// and the engineering-unit value the tag reports (source's
/// `linear_raw_min/max` / `linear_eng_min/max`).
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearScale {
    pub raw_min: f64,
    pub raw_max: f64,
    pub eng_min: f64,
    pub eng_max: f64,
}

impl LinearScale {
    pub fn apply(&self, raw: f64) -> f64 {
        if (self.raw_max - self.raw_min).abs() < f64::EPSILON {
            return raw;
        }
        let ratio = (raw - self.raw_min) / (self.raw_max - self.raw_min);
        self.eng_min + ratio * (self.eng_max - self.eng_min)
    }
}

/// One tag: static configuration plus the mutable VTQ (value, time,
/// quality) the driver writes on every poll or control command.
#[derive(Debug, Clone)]
pub struct Tag {
    pub name: String,
    pub address: String,
    pub data_type: DataType,
    pub point_type: PointType,
    pub data_length: usize,
    pub polling_interval_ms: u32,
    pub linear_scale: Option<LinearScale>,
    pub enable_control: bool,
    pub enable_history: bool,

    data: Vec<u8>,
    time_milli: u64,
    quantity: i32,
}

/// Quality codes mirroring the source's `quantity` field: 0 is good,
/// nonzero flags a stale or bad reading.
pub const QUALITY_GOOD: i32 = 0;
pub const QUALITY_BAD: i32 = 1;

impl Tag {
    pub fn new(name: impl Into<String>, address: impl Into<String>, data_type: DataType, data_length: usize) -> Tag {
        Tag {
            name: name.into(),
            address: address.into(),
            data_type,
            point_type: PointType::DeviceVariable,
            data_length,
            polling_interval_ms: 1000,
            linear_scale: None,
            enable_control: false,
            enable_history: false,
            data: vec![0u8; data_length],
            time_milli: 0,
            quantity: QUALITY_BAD,
        }
    }

    /// `drv_settagdata_text`: set VTQ from a text-format value. Only
    /// the in-memory VTQ is updated; the caller is responsible for
    /// publishing the change (spec §4.6 "Write-command flow").
    pub fn set_text(&mut self, value: &str, tagmsec: u64, quantity: i32) {
        string_to_binary(self.data_type, value, self.data_length, &mut self.data);
        self.time_milli = tagmsec;
        self.quantity = quantity;
    }

    /// `drv_settagdata_binary`: set VTQ from a raw byte slice,
    /// truncated to `data_length`.
    pub fn set_binary(&mut self, value: &[u8], tagmsec: u64, quantity: i32) {
        self.data.clear();
        self.data.extend_from_slice(&value[..value.len().min(self.data_length)]);
        self.time_milli = tagmsec;
        self.quantity = quantity;
    }

    pub fn value_as_string(&self) -> String {
        binary_to_string(self.data_type, &self.data)
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn time_milli(&self) -> u64 {
        self.time_milli
    }

    pub fn quantity(&self) -> i32 {
        self.quantity
    }

    pub fn touch_now(&mut self) {
        self.time_milli = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
    }
}

/// One row of the `/tags/update` batch (spec §6): `[{name, value,
/// time_ms, quality}]`.
#[derive(Debug, Clone, Serialize)]
pub struct TagUpdateRow {
    pub name: String,
    pub value: String,
    pub time: u64,
    pub quality: i32,
}

impl From<&Tag> for TagUpdateRow {
    fn from(tag: &Tag) -> TagUpdateRow {
        TagUpdateRow {
            name: tag.name.clone(),
            value: tag.value_as_string(),
            time: tag.time_milli,
            quality: tag.quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_text_updates_vtq() {
        let mut tag = Tag::new("level", "40001", DataType::Float, 4);
        tag.set_text("12.5", 1000, QUALITY_GOOD);
        assert_eq!(tag.value_as_string(), "12.5");
        assert_eq!(tag.time_milli(), 1000);
        assert_eq!(tag.quantity(), QUALITY_GOOD);
    }

    #[test]
    fn linear_scale_maps_raw_range_to_engineering_range() {
        let scale = LinearScale {
            raw_min: 0.0,
            raw_max: 4095.0,
            eng_min: 0.0,
            eng_max: 100.0,
        };
        assert!((scale.apply(2047.5) - 50.0).abs() < 0.1);
    }

    #[test]
    fn update_row_mirrors_current_vtq() {
        let mut tag = Tag::new("running", "10001", DataType::Bool, 1);
        tag.set_text("1", 42, QUALITY_GOOD);
        let row = TagUpdateRow::from(&tag);
        assert_eq!(row.name, "running");
        assert_eq!(row.value, "true");
        assert_eq!(row.time, 42);
    }
}
