// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Asynchronous alarm log persistence: the evaluation thread enqueues
//! a notification, a dedicated saver thread drains it and writes
//! `t_alarm_log` rows inside a transaction (spec §4.7 "Alarm log").
//!
//! Grounded on `alarm_log.h`'s `AlarmLogMessage`/`AlarmLogSaver`: a
//! `Poco::NotificationQueue` + worker thread there becomes a
//! `crossbeam_channel` + `std::thread` here.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use rusqlite::Connection;

/// One `t_alarm_log` row (spec §4.7's column list).
#[derive(Debug, Clone)]
pub struct AlarmLogRow {
    pub rule_id: i64,
    pub point_id: String,
    pub point_name: String,
    /// 1 = trigger, 2 = clear.
    pub event_type: i32,
    pub value: f32,
    pub threshold: f32,
    pub message: String,
    pub ack_status: i32,
    pub start_time_ms: i64,
    /// 0 for a trigger event; equal to `start_time_ms` for a clear
    /// (spec: "the log row records a point-in-time clear, not an
    /// interval").
    pub end_time_ms: i64,
}

pub const EVENT_TRIGGER: i32 = 1;
pub const EVENT_CLEAR: i32 = 2;

/// Create `t_alarm_log` if it does not already exist (the schema the
/// alarm engine writes to; the table's lifecycle — migrations, other
/// columns — is the config-loader's concern, out of scope per spec §1).
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS t_alarm_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rule_id INTEGER NOT NULL,
            point_id TEXT NOT NULL,
            point_name TEXT NOT NULL,
            event_type INTEGER NOT NULL,
            value REAL NOT NULL,
            threshold REAL NOT NULL,
            message TEXT NOT NULL,
            ack_status INTEGER NOT NULL,
            start_time INTEGER NOT NULL,
            end_time INTEGER NOT NULL
        )",
    )
}

/// Read back the `limit` most recent `t_alarm_log` rows, newest first.
/// The out-of-scope HTTP admin façade would call this; exposed here as
/// a typed query so that surface has something concrete to call.
pub fn recent_rows(conn: &Connection, limit: u32) -> rusqlite::Result<Vec<AlarmLogRow>> {
    let mut stmt = conn.prepare(
        "SELECT rule_id, point_id, point_name, event_type, value, threshold, message, ack_status, start_time, end_time
         FROM t_alarm_log ORDER BY start_time DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit], |r| {
        Ok(AlarmLogRow {
            rule_id: r.get(0)?,
            point_id: r.get(1)?,
            point_name: r.get(2)?,
            event_type: r.get(3)?,
            value: r.get(4)?,
            threshold: r.get(5)?,
            message: r.get(6)?,
            ack_status: r.get(7)?,
            start_time_ms: r.get(8)?,
            end_time_ms: r.get(9)?,
        })
    })?;
    rows.collect()
}

fn insert_row(conn: &Connection, row: &AlarmLogRow) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO t_alarm_log
            (rule_id, point_id, point_name, event_type, value, threshold, message, ack_status, start_time, end_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            row.rule_id,
            row.point_id,
            row.point_name,
            row.event_type,
            row.value,
            row.threshold,
            row.message,
            row.ack_status,
            row.start_time_ms,
            row.end_time_ms,
        ],
    )?;
    Ok(())
}

/// Dedicated log-saver thread: drains a channel of [`AlarmLogRow`]s
/// and writes each as its own transaction (spec: "writes to
/// `t_alarm_log` one row per event within a transaction").
pub struct AlarmLogSaver {
    sender: crossbeam_channel::Sender<AlarmLogRow>,
    handle: Option<JoinHandle<()>>,
}

impl AlarmLogSaver {
    /// Open (creating if needed) the SQLite file at `db_path` and
    /// start the saver thread.
    pub fn start(db_path: &Path) -> rusqlite::Result<AlarmLogSaver> {
        let conn = Connection::open(db_path)?;
        ensure_schema(&conn)?;
        Ok(Self::start_with_connection(conn))
    }

    /// Start with an already-open connection (used by tests to share
    /// an in-memory database).
    pub fn start_with_connection(conn: Connection) -> AlarmLogSaver {
        let (sender, receiver) = crossbeam_channel::unbounded::<AlarmLogRow>();
        let handle = std::thread::spawn(move || {
            while let Ok(row) = receiver.recv() {
                let tx = match conn.unchecked_transaction() {
                    Ok(tx) => tx,
                    Err(e) => {
                        log::error!("alarm log: failed to open transaction: {}", e);
                        continue;
                    }
                };
                if let Err(e) = insert_row(&tx, &row) {
                    log::error!("alarm log: insert failed: {}", e);
                    continue;
                }
                if let Err(e) = tx.commit() {
                    log::error!("alarm log: commit failed: {}", e);
                }
            }
        });
        AlarmLogSaver {
            sender,
            handle: Some(handle),
        }
    }

    /// Enqueue a log row; never blocks the evaluation thread on disk I/O.
    pub fn enqueue(&self, row: AlarmLogRow) {
        if self.sender.send(row).is_err() {
            log::error!("alarm log: saver thread is gone, dropping row");
        }
    }

    /// Stop accepting new rows and wait for the queue to drain.
    pub fn stop(mut self) {
        let handle = self.handle.take();
        // Dropping the sender closes the channel so the saver thread's
        // `recv` loop exits once it has drained everything already queued.
        drop(self);
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// Shared handle to the log saver, cloned into the evaluation thread.
pub type SharedLogSaver = Arc<AlarmLogSaver>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserts_trigger_and_clear_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("alarm.db");
        let saver = AlarmLogSaver::start(&db_path).unwrap();
        saver.enqueue(AlarmLogRow {
            rule_id: 1,
            point_id: "7".to_string(),
            point_name: "p7".to_string(),
            event_type: EVENT_TRIGGER,
            value: 60.0,
            threshold: 50.0,
            message: "H".to_string(),
            ack_status: 0,
            start_time_ms: 100,
            end_time_ms: 0,
        });
        saver.enqueue(AlarmLogRow {
            rule_id: 1,
            point_id: "7".to_string(),
            point_name: "p7".to_string(),
            event_type: EVENT_CLEAR,
            value: 5.0,
            threshold: 50.0,
            message: "H".to_string(),
            ack_status: 0,
            start_time_ms: 200,
            end_time_ms: 200,
        });
        saver.stop();

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t_alarm_log", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
        let event_types: Vec<i32> = {
            let mut stmt = conn.prepare("SELECT event_type FROM t_alarm_log ORDER BY start_time").unwrap();
            stmt.query_map([], |r| r.get(0)).unwrap().collect::<Result<_, _>>().unwrap()
        };
        assert_eq!(event_types, vec![EVENT_TRIGGER, EVENT_CLEAR]);

        let recent = recent_rows(&conn, 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event_type, EVENT_CLEAR);
        assert_eq!(recent[1].event_type, EVENT_TRIGGER);
    }
}
