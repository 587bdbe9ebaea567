// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end alarm engine test: rules loaded from SQLite, fed through
//! the evaluation loop, with both the published notifications and the
//! persisted `t_alarm_log` rows checked (spec S5).

use std::sync::{Arc, Mutex};

use lwcomm_alarm::{config, log as alarm_log, AlarmEngine, AlarmEngineCallbacks, AlarmEventKind};
use rusqlite::Connection;

#[test]
fn rules_loaded_from_sqlite_drive_trigger_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let rules_db = dir.path().join("rules.db");
    let log_db = dir.path().join("alarm.db");

    {
        let conn = Connection::open(&rules_db).unwrap();
        config::ensure_schema(&conn).unwrap();
        conn.execute("INSERT INTO t_points (id, name) VALUES (7, 'tank_level')", []).unwrap();
        conn.execute(
            "INSERT INTO t_alarm_rules (point_id, method, threshold, enable) VALUES (7, 2, 50.0, 1)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO t_alarm_rules (point_id, method, threshold, enable) VALUES (7, 3, 10.0, 1)",
            [],
        )
        .unwrap();
    }

    let rules = {
        let conn = Connection::open(&rules_db).unwrap();
        config::load_rules(&conn).unwrap()
    };
    assert_eq!(rules["7"].len(), 2);

    let saver = Arc::new(alarm_log::AlarmLogSaver::start(&log_db).unwrap());

    let seen: Arc<Mutex<Vec<AlarmEventKind>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let callbacks = AlarmEngineCallbacks {
        on_notify: Some(Arc::new(move |n| seen_clone.lock().unwrap().push(n.kind))),
    };

    let engine = AlarmEngine::start(rules, saver, callbacks);
    engine.push("7", "60");
    std::thread::sleep(std::time::Duration::from_millis(50));
    engine.push("7", "5");
    std::thread::sleep(std::time::Duration::from_millis(50));
    engine.stop();

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, vec![AlarmEventKind::Trigger, AlarmEventKind::Clear, AlarmEventKind::Trigger]);

    let conn = Connection::open(&log_db).unwrap();
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM t_alarm_log", [], |r| r.get(0)).unwrap();
    assert_eq!(count, 3);
}

/// A non-numeric value is dropped by the evaluation loop rather than
/// panicking; `push` itself only reports queue-full, so it still
/// returns `true` here (spec §4.7 "Ingestion").
#[test]
fn push_reports_false_on_non_numeric_value_without_panicking() {
    let dir = tempfile::tempdir().unwrap();
    let log_db = dir.path().join("alarm.db");
    let saver = Arc::new(alarm_log::AlarmLogSaver::start(&log_db).unwrap());
    let mut rules = std::collections::HashMap::new();
    rules.insert(
        "7".to_string(),
        vec![lwcomm_alarm::AlarmRule {
            id: 1,
            name: "r1".to_string(),
            method: lwcomm_alarm::Method::High,
            threshold: 50.0,
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            enabled: true,
            point_id: "7".to_string(),
            point_name: "p7".to_string(),
        }],
    );
    let engine = AlarmEngine::start(rules, saver, AlarmEngineCallbacks::default());
    assert!(engine.push("7", "not-a-number"));
    std::thread::sleep(std::time::Duration::from_millis(30));
    engine.stop();
}
