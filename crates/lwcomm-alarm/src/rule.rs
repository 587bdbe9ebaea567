// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Alarm rules and the eight-method evaluation logic (spec §4.7,
//! §3 "AlarmRule").
//!
//! Grounded on `alarm_server.h`'s `AlarmRule::getPriority` (the total
//! order fixed < HH < H < L < LL < rate < duration < deviation, ties
//! broken by id) and `alarm_rule_processor.cpp`'s per-method
//! processors, one-to-one with [`Method`]'s variants below.

use std::time::Duration;

/// One of the eight rule methods (spec GLOSSARY: "Rule method").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// 1 — high-high: triggers when `value > threshold`.
    HighHigh,
    /// 2 — high: triggers when `value > threshold`.
    High,
    /// 3 — low: triggers when `value < threshold`.
    Low,
    /// 4 — low-low: triggers when `value < threshold`.
    LowLow,
    /// 5 — fixed value: triggers when `|value - threshold| < 1e-6`.
    Fixed,
    /// 6 — rate of change over a `param1`-second window.
    RateOfChange,
    /// 7 — sustained breach for at least `param2` seconds.
    Duration,
    /// 8 — deviation from `param3` exceeding `threshold`.
    Deviation,
}

impl Method {
    pub fn from_i32(v: i32) -> Option<Method> {
        match v {
            1 => Some(Method::HighHigh),
            2 => Some(Method::High),
            3 => Some(Method::Low),
            4 => Some(Method::LowLow),
            5 => Some(Method::Fixed),
            6 => Some(Method::RateOfChange),
            7 => Some(Method::Duration),
            8 => Some(Method::Deviation),
            _ => None,
        }
    }

    pub fn to_i32(self) -> i32 {
        match self {
            Method::HighHigh => 1,
            Method::High => 2,
            Method::Low => 3,
            Method::LowLow => 4,
            Method::Fixed => 5,
            Method::RateOfChange => 6,
            Method::Duration => 7,
            Method::Deviation => 8,
        }
    }

    /// Priority order used to pick at most one triggering rule per
    /// point: smaller sorts first. Fixed value wins over every
    /// threshold rule (spec T8).
    fn priority(self) -> u8 {
        match self {
            Method::Fixed => 0,
            Method::HighHigh => 1,
            Method::High => 2,
            Method::Low => 3,
            Method::LowLow => 4,
            Method::RateOfChange => 5,
            Method::Duration => 6,
            Method::Deviation => 7,
        }
    }
}

/// One alarm rule, immutable for the lifetime of the process once
/// rule loading (§4.7 "Rule loading") completes.
#[derive(Debug, Clone)]
pub struct AlarmRule {
    pub id: i64,
    pub name: String,
    pub method: Method,
    pub threshold: f32,
    /// Rate-of-change window, seconds.
    pub param1: f32,
    /// Duration required, seconds.
    pub param2: f32,
    /// Deviation reference value.
    pub param3: f32,
    pub enabled: bool,
    pub point_id: String,
    pub point_name: String,
}

impl AlarmRule {
    pub fn window(&self) -> Duration {
        Duration::from_secs_f32(self.param1.max(0.0))
    }

    pub fn required_duration(&self) -> Duration {
        Duration::from_secs_f32(self.param2.max(0.0))
    }
}

/// Total order over rules attached to one point: priority first,
/// then id, matching `AlarmRule::operator<` in the source.
pub fn rule_order(a: &AlarmRule, b: &AlarmRule) -> std::cmp::Ordering {
    a.method.priority().cmp(&b.method.priority()).then(a.id.cmp(&b.id))
}

/// Sort `rules` in place by [`rule_order`] (spec §4.7 "Rule loading":
/// "sorts per point by the priority order above").
pub fn sort_rules(rules: &mut [AlarmRule]) {
    rules.sort_by(rule_order);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: i64, method: Method, threshold: f32) -> AlarmRule {
        AlarmRule {
            id,
            name: format!("rule-{id}"),
            method,
            threshold,
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            enabled: true,
            point_id: "7".to_string(),
            point_name: "p7".to_string(),
        }
    }

    #[test]
    fn fixed_outranks_thresholds() {
        let mut rules = vec![rule(1, Method::High, 8.0), rule(2, Method::Fixed, 10.0), rule(3, Method::Low, 5.0)];
        sort_rules(&mut rules);
        assert_eq!(rules[0].method, Method::Fixed);
        assert_eq!(rules[1].method, Method::High);
        assert_eq!(rules[2].method, Method::Low);
    }

    #[test]
    fn ties_break_by_id() {
        let mut rules = vec![rule(5, Method::High, 1.0), rule(2, Method::High, 1.0)];
        sort_rules(&mut rules);
        assert_eq!(rules[0].id, 2);
        assert_eq!(rules[1].id, 5);
    }
}
