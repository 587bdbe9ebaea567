// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The alarm evaluation loop: a bounded ingestion queue drained by a
//! single worker thread that walks each point's rules in priority
//! order, triggers at most one, clears every other previously-active
//! rule on that point, and logs both kinds of transition (spec §4.7
//! steps 1-4).
//!
//! Grounded on `alarm_server.h`'s `AlarmServer::run` /
//! `PushAlarmMsg` (a `Poco::NotificationQueue` of `AlarmPointMessage`)
//! and `alarm_state_manager.cpp`'s `processAlarmState` /
//! `processAlarmClear` — the transition bookkeeping this module
//! reproduces over a plain `HashMap<String, Vec<AlarmRule>>` instead
//! of the source's point-config map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::log::{AlarmLogRow, AlarmLogSaver, EVENT_CLEAR, EVENT_TRIGGER};
use crate::rule::AlarmRule;
use crate::state::StateTables;

/// Bounded ingestion queue capacity (spec §4.7 "Ingestion").
pub const QUEUE_CAPACITY: usize = 1000;

/// Alarm transition kind published to `/v1/alarm_server/alarm_info/`
/// (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmEventKind {
    Trigger,
    Clear,
}

/// Payload of one alarm notification (spec §6's
/// `/v1/alarm_server/alarm_info/` shape).
#[derive(Debug, Clone)]
pub struct AlarmNotification {
    pub point_id: String,
    pub point_name: String,
    pub point_value: f32,
    pub rule_id: i64,
    pub rule_name: String,
    pub rule_method: i32,
    pub kind: AlarmEventKind,
    pub timestamp_ms: i64,
}

#[derive(Clone, Default)]
pub struct AlarmEngineCallbacks {
    pub on_notify: Option<Arc<dyn Fn(&AlarmNotification) + Send + Sync>>,
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

struct Inner {
    rules: HashMap<String, Vec<AlarmRule>>,
    tables: Mutex<StateTables>,
    callbacks: AlarmEngineCallbacks,
    log_saver: Arc<AlarmLogSaver>,
    running: AtomicBool,
}

/// The running alarm engine: an ingestion queue plus its worker
/// thread. Rules are immutable for the engine's lifetime (spec §4.7
/// "Rule objects are immutable for the lifetime of the process").
pub struct AlarmEngine {
    inner: Arc<Inner>,
    sender: Sender<(String, String)>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AlarmEngine {
    pub fn start(rules: HashMap<String, Vec<AlarmRule>>, log_saver: Arc<AlarmLogSaver>, callbacks: AlarmEngineCallbacks) -> AlarmEngine {
        let (sender, receiver) = crossbeam_channel::bounded(QUEUE_CAPACITY);
        let inner = Arc::new(Inner {
            rules,
            tables: Mutex::new(StateTables::new()),
            callbacks,
            log_saver,
            running: AtomicBool::new(true),
        });
        let thread = spawn_worker(inner.clone(), receiver);
        AlarmEngine {
            inner,
            sender,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Push an inbound `(point_id, point_value)` tag update onto the
    /// ingestion queue. Returns `false` (and logs) if the queue is
    /// full — the spec has no back-pressure path to the publisher.
    pub fn push(&self, point_id: impl Into<String>, point_value: impl Into<String>) -> bool {
        match self.sender.try_send((point_id.into(), point_value.into())) {
            Ok(()) => true,
            Err(TrySendError::Full((point_id, _))) => {
                log::warn!("alarm ingest queue full ({} cap), dropping update for point {}", QUEUE_CAPACITY, point_id);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

fn spawn_worker(inner: Arc<Inner>, receiver: Receiver<(String, String)>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while inner.running.load(Ordering::SeqCst) {
            let (point_id, point_value) = match receiver.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(item) => item,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            };
            process_update(&inner, &point_id, &point_value);
        }
    })
}

fn process_update(inner: &Arc<Inner>, point_id: &str, point_value: &str) {
    let rules = match inner.rules.get(point_id) {
        Some(rules) if !rules.is_empty() => rules,
        _ => return,
    };
    let value: f32 = match point_value.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            log::warn!("alarm ingest: point {} value {:?} is not numeric, dropping", point_id, point_value);
            return;
        }
    };
    let now = now_ms();

    let mut tables = inner.tables.lock();
    let mut triggered_rule: Option<&AlarmRule> = None;
    for rule in rules {
        if tables.evaluate(rule, value, point_id, now) {
            triggered_rule = Some(rule);
            break;
        }
    }

    if let Some(rule) = triggered_rule {
        for other in rules {
            if other.id == rule.id {
                continue;
            }
            if tables.mark_cleared(point_id, other.id) {
                notify(inner, other, point_id, value, AlarmEventKind::Clear, now);
                log_event(inner, other, point_id, value, EVENT_CLEAR, now, now);
            }
        }
        let is_new = tables.mark_triggered(point_id, rule.id, now);
        if is_new {
            notify(inner, rule, point_id, value, AlarmEventKind::Trigger, now);
            log_event(inner, rule, point_id, value, EVENT_TRIGGER, now, now);
        }
    } else {
        for rule in rules {
            if tables.mark_cleared(point_id, rule.id) {
                notify(inner, rule, point_id, value, AlarmEventKind::Clear, now);
                log_event(inner, rule, point_id, value, EVENT_CLEAR, now, now);
            }
        }
    }
}

fn notify(inner: &Arc<Inner>, rule: &AlarmRule, point_id: &str, value: f32, kind: AlarmEventKind, now_ms: i64) {
    if let Some(cb) = &inner.callbacks.on_notify {
        cb(&AlarmNotification {
            point_id: point_id.to_string(),
            point_name: rule.point_name.clone(),
            point_value: value,
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            rule_method: rule.method.to_i32(),
            kind,
            timestamp_ms: now_ms,
        });
    }
}

fn log_event(inner: &Arc<Inner>, rule: &AlarmRule, point_id: &str, value: f32, event_type: i32, start_ms: i64, now_ms: i64) {
    let end_ms = if event_type == EVENT_TRIGGER { 0 } else { now_ms };
    inner.log_saver.enqueue(AlarmLogRow {
        rule_id: rule.id,
        point_id: point_id.to_string(),
        point_name: rule.point_name.clone(),
        event_type,
        value,
        threshold: rule.threshold,
        message: rule.name.clone(),
        ack_status: 0,
        start_time_ms: start_ms,
        end_time_ms: end_ms,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Method;
    use rusqlite::Connection;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    fn rule(id: i64, method: Method, threshold: f32) -> AlarmRule {
        AlarmRule {
            id,
            name: format!("r{id}"),
            method,
            threshold,
            param1: 0.0,
            param2: 2.0,
            param3: 0.0,
            enabled: true,
            point_id: "7".to_string(),
            point_name: "p7".to_string(),
        }
    }

    fn test_saver() -> Arc<AlarmLogSaver> {
        let conn = Connection::open_in_memory().unwrap();
        crate::log::ensure_schema(&conn).unwrap();
        Arc::new(AlarmLogSaver::start_with_connection(conn))
    }

    /// spec S5: H(>50)/L(<10) on point 7; 60 -> TRIGGER H; 60 again ->
    /// nothing new; 5 -> CLEAR H then TRIGGER L. Exactly three
    /// notifications in total.
    #[test]
    fn s5_alarm_end_to_end() {
        let mut rules = HashMap::new();
        rules.insert("7".to_string(), vec![rule(1, Method::High, 50.0), rule(2, Method::Low, 10.0)]);

        let events: Arc<StdMutex<Vec<(AlarmEventKind, i64)>>> = Arc::new(StdMutex::new(Vec::new()));
        let events_clone = events.clone();
        let callbacks = AlarmEngineCallbacks {
            on_notify: Some(Arc::new(move |n: &AlarmNotification| {
                events_clone.lock().unwrap().push((n.kind, n.rule_id));
            })),
        };

        let engine = AlarmEngine::start(rules, test_saver(), callbacks);
        engine.push("7", "60");
        std::thread::sleep(std::time::Duration::from_millis(50));
        engine.push("7", "60");
        std::thread::sleep(std::time::Duration::from_millis(50));
        engine.push("7", "5");
        std::thread::sleep(std::time::Duration::from_millis(50));
        engine.stop();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3, "{:?}", *events);
        assert_eq!(events[0], (AlarmEventKind::Trigger, 1));
        assert_eq!(events[1], (AlarmEventKind::Clear, 1));
        assert_eq!(events[2], (AlarmEventKind::Trigger, 2));
    }

    /// spec T8: fixed(=10), H(>8), L(<5) on one point.
    #[test]
    fn t8_alarm_priority() {
        let mut rules = HashMap::new();
        rules.insert(
            "7".to_string(),
            vec![rule(1, Method::Fixed, 10.0), rule(2, Method::High, 8.0), rule(3, Method::Low, 5.0)],
        );
        let triggered = Arc::new(AtomicUsize::new(0));
        let last_rule = Arc::new(StdMutex::new(0i64));
        let t2 = triggered.clone();
        let lr2 = last_rule.clone();
        let callbacks = AlarmEngineCallbacks {
            on_notify: Some(Arc::new(move |n: &AlarmNotification| {
                if n.kind == AlarmEventKind::Trigger {
                    t2.fetch_add(1, Ordering::SeqCst);
                    *lr2.lock().unwrap() = n.rule_id;
                }
            })),
        };
        let engine = AlarmEngine::start(rules, test_saver(), callbacks);

        engine.push("7", "10");
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(*last_rule.lock().unwrap(), 1); // fixed wins over H

        engine.push("7", "6");
        std::thread::sleep(std::time::Duration::from_millis(30));
        // value 6 triggers nothing new (between L(<5) and H(>8)): prior
        // fixed trigger should clear, no new trigger fires.

        engine.stop();
        assert!(triggered.load(Ordering::SeqCst) >= 1);
    }

    /// spec T10: the duration rule's own activation timer must survive
    /// the engine's per-sample clear bookkeeping for every *other* rule
    /// on the point — a regression test for the engine actually firing
    /// a duration rule, not just `StateTables::evaluate` in isolation.
    #[test]
    fn duration_rule_fires_through_the_engine() {
        let mut rules = HashMap::new();
        rules.insert("7".to_string(), vec![rule(1, Method::Duration, 10.0)]);

        let events: Arc<StdMutex<Vec<AlarmEventKind>>> = Arc::new(StdMutex::new(Vec::new()));
        let events_clone = events.clone();
        let callbacks = AlarmEngineCallbacks {
            on_notify: Some(Arc::new(move |n: &AlarmNotification| {
                events_clone.lock().unwrap().push(n.kind);
            })),
        };

        let engine = AlarmEngine::start(rules, test_saver(), callbacks);
        engine.push("7", "11");
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(events.lock().unwrap().is_empty(), "duration rule must not trigger before param2 elapses");

        std::thread::sleep(std::time::Duration::from_millis(2_100));
        engine.push("7", "11");
        std::thread::sleep(std::time::Duration::from_millis(50));
        engine.stop();

        assert_eq!(*events.lock().unwrap(), vec![AlarmEventKind::Trigger]);
    }
}
