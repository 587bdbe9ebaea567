// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `lwcomm-alarm`: a priority-ordered tag alarm rule engine (spec §4.7).
//!
//! Rules are loaded once per point ([`config::load_rules`]), sorted by
//! [`rule::rule_order`], and evaluated by [`engine::AlarmEngine`] as tag
//! updates arrive. At most one rule triggers per point per update; every
//! other previously-active rule on that point clears. Both kinds of
//! transition are logged asynchronously via [`log::AlarmLogSaver`].

pub mod config;
pub mod engine;
pub mod log;
pub mod rule;
pub mod state;

pub use engine::{AlarmEngine, AlarmEngineCallbacks, AlarmEventKind, AlarmNotification, QUEUE_CAPACITY};
pub use log::{recent_rows, AlarmLogRow, AlarmLogSaver, SharedLogSaver, EVENT_CLEAR, EVENT_TRIGGER};
pub use rule::{rule_order, sort_rules, AlarmRule, Method};
pub use state::{AlarmState, StateTables};
