// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-(point, rule) alarm state, per-point value history, and the
//! eight rule processors that decide whether a rule fires for a given
//! value (spec §4.7 step 2).
//!
//! Grounded on `alarm_rule_processor.cpp`'s five processor classes
//! (`ThresholdRuleProcessor` covers both HH/H and L/LL by a boolean
//! flag, as here) and `AlarmServer::AlarmState`/`ValueHistory`.

use std::collections::HashMap;

use crate::rule::{AlarmRule, Method};

/// `{active, last_trigger_ms, activation_ms}` per (point, rule) —
/// spec §3 "AlarmState".
#[derive(Debug, Clone, Copy, Default)]
pub struct AlarmState {
    pub active: bool,
    pub last_trigger_ms: i64,
    pub activation_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    value: f32,
    ts_ms: i64,
}

/// All mutable evaluation state: per-(point,rule) alarm state and
/// per-point value history, used only by the rate-of-change and
/// duration rules (spec §3 "ValueHistory").
///
/// `duration_activation` tracks the duration rule's (method 7) own
/// in-progress breach timer, keyed by (point, rule) like `states` but
/// kept separate from it: `states` is the publish-level "is a
/// TRIGGER currently active" flag that `mark_triggered`/`mark_cleared`
/// flip on every evaluation, including the "no rule triggered" branch
/// that clears every rule not currently triggering. If the duration
/// processor reused that same flag to remember it had started
/// counting, the engine's own clear bookkeeping would wipe it out on
/// every sample before the duration elapsed, so the rule could never
/// actually fire.
#[derive(Default)]
pub struct StateTables {
    states: HashMap<(String, i64), AlarmState>,
    histories: HashMap<String, Vec<HistoryEntry>>,
    duration_activation: HashMap<(String, i64), i64>,
}

impl StateTables {
    pub fn new() -> Self {
        StateTables::default()
    }

    pub fn state(&self, point_id: &str, rule_id: i64) -> AlarmState {
        self.states.get(&(point_id.to_string(), rule_id)).copied().unwrap_or_default()
    }

    fn state_mut(&mut self, point_id: &str, rule_id: i64) -> &mut AlarmState {
        self.states.entry((point_id.to_string(), rule_id)).or_default()
    }

    /// Evaluate `rule` against `value` for `point_id` at `now_ms`,
    /// mutating history/state as each method requires. Returns
    /// whether the rule triggers on this evaluation (spec §4.7 step 2).
    pub fn evaluate(&mut self, rule: &AlarmRule, value: f32, point_id: &str, now_ms: i64) -> bool {
        match rule.method {
            Method::HighHigh | Method::High => value > rule.threshold,
            Method::Low | Method::LowLow => value < rule.threshold,
            Method::Fixed => (value - rule.threshold).abs() < 1e-6,
            Method::RateOfChange => self.evaluate_rate_of_change(rule, value, point_id, now_ms),
            Method::Duration => self.evaluate_duration(rule, value, point_id, now_ms),
            Method::Deviation => (value - rule.param3).abs() > rule.threshold,
        }
    }

    fn evaluate_rate_of_change(&mut self, rule: &AlarmRule, value: f32, point_id: &str, now_ms: i64) -> bool {
        let window_ms = (rule.param1 * 1000.0) as i64;
        let history = self.histories.entry(point_id.to_string()).or_default();
        history.push(HistoryEntry { value, ts_ms: now_ms });
        history.retain(|e| now_ms - e.ts_ms <= window_ms);

        if history.len() < 2 {
            return false;
        }
        let first = history.first().unwrap();
        let last = history.last().unwrap();
        let dt_ms = last.ts_ms - first.ts_ms;
        if dt_ms <= 0 {
            return false;
        }
        let rate = (last.value - first.value).abs() / (dt_ms as f32 / 1000.0);
        rate > rule.threshold
    }

    fn evaluate_duration(&mut self, rule: &AlarmRule, value: f32, point_id: &str, now_ms: i64) -> bool {
        let key = (point_id.to_string(), rule.id);
        if value > rule.threshold {
            match self.duration_activation.get(&key).copied() {
                Some(activation_ms) => now_ms - activation_ms >= (rule.param2 * 1000.0) as i64,
                None => {
                    self.duration_activation.insert(key, now_ms);
                    false
                }
            }
        } else {
            self.duration_activation.remove(&key);
            false
        }
    }

    /// Record that `rule` triggered for `point_id` at `now_ms`, setting
    /// `active=true` and bumping `last_trigger_ms`. Returns `true` if
    /// this is a new transition (was not already active) — used to
    /// decide whether a `TRIGGER` should be published (spec T9).
    pub fn mark_triggered(&mut self, point_id: &str, rule_id: i64, now_ms: i64) -> bool {
        let state = self.state_mut(point_id, rule_id);
        let is_new = !state.active;
        state.active = true;
        state.last_trigger_ms = now_ms;
        if is_new {
            state.activation_ms = now_ms;
        }
        is_new
    }

    /// Flip a previously active (point, rule) to inactive. Returns
    /// `true` if it actually was active (a `CLEAR` should be published).
    pub fn mark_cleared(&mut self, point_id: &str, rule_id: i64) -> bool {
        let state = self.state_mut(point_id, rule_id);
        let was_active = state.active;
        state.active = false;
        was_active
    }

    pub fn is_active(&self, point_id: &str, rule_id: i64) -> bool {
        self.state(point_id, rule_id).active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: i64, method: Method, threshold: f32) -> AlarmRule {
        AlarmRule {
            id,
            name: format!("r{id}"),
            method,
            threshold,
            param1: 5.0,
            param2: 2.0,
            param3: 0.0,
            enabled: true,
            point_id: "7".to_string(),
            point_name: "p7".to_string(),
        }
    }

    #[test]
    fn duration_rule_requires_sustained_breach() {
        let mut tables = StateTables::new();
        let r = rule(1, Method::Duration, 10.0);
        assert!(!tables.evaluate(&r, 11.0, "7", 0));
        assert!(!tables.evaluate(&r, 11.0, "7", 500));
        assert!(!tables.evaluate(&r, 11.0, "7", 1_500));
        assert!(tables.evaluate(&r, 11.0, "7", 2_000));
    }

    #[test]
    fn duration_rule_clears_on_drop_below_threshold() {
        let mut tables = StateTables::new();
        let r = rule(1, Method::Duration, 10.0);
        tables.evaluate(&r, 11.0, "7", 0);
        assert!(!tables.evaluate(&r, 9.0, "7", 500));
        // dropping below resets activation; a later breach must wait
        // the full duration again, measured from its own re-activation.
        assert!(!tables.evaluate(&r, 11.0, "7", 600));
        assert!(!tables.evaluate(&r, 11.0, "7", 2_000));
        assert!(tables.evaluate(&r, 11.0, "7", 2_600));
    }

    #[test]
    fn rate_of_change_needs_two_points_in_window() {
        let mut tables = StateTables::new();
        let r = rule(1, Method::RateOfChange, 1.0);
        assert!(!tables.evaluate(&r, 0.0, "7", 0));
        assert!(tables.evaluate(&r, 10.0, "7", 1_000));
    }

    #[test]
    fn mark_triggered_reports_new_transition_once() {
        let mut tables = StateTables::new();
        assert!(tables.mark_triggered("7", 1, 0));
        assert!(!tables.mark_triggered("7", 1, 10));
        assert!(tables.mark_cleared("7", 1));
        assert!(!tables.mark_cleared("7", 1));
    }
}
