// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Rule loading: `t_alarm_rules` joined with `t_points`, filtered on
//! `enable=1`, sorted per point by priority (spec §4.7 "Rule loading").
//!
//! The row shapes are ported from the source's config-row consumption
//! (spec §1 scopes the SQLite schema/loader itself out; only the rows
//! the alarm engine reads are specified here, per §6 "Persisted data").

use std::collections::HashMap;

use rusqlite::Connection;

use crate::rule::{sort_rules, AlarmRule, Method};

/// Create the `t_points`/`t_alarm_rules` tables if absent — used by
/// tests and standalone demos; production deployments populate these
/// via the out-of-scope configuration loader (spec §1).
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS t_points (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS t_alarm_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            point_id INTEGER NOT NULL,
            method INTEGER NOT NULL,
            threshold REAL NOT NULL,
            param1 REAL NOT NULL DEFAULT 0,
            param2 REAL NOT NULL DEFAULT 0,
            param3 REAL NOT NULL DEFAULT 0,
            enable INTEGER NOT NULL DEFAULT 1
        )",
    )
}

/// Load every enabled rule, grouped by `point_id` and sorted within
/// each group by [`crate::rule::rule_order`].
pub fn load_rules(conn: &Connection) -> rusqlite::Result<HashMap<String, Vec<AlarmRule>>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.point_id, p.name, r.method, r.threshold, r.param1, r.param2, r.param3
         FROM t_alarm_rules r
         JOIN t_points p ON p.id = r.point_id
         WHERE r.enable = 1",
    )?;
    let rows = stmt.query_map([], |row| {
        let id: i64 = row.get(0)?;
        let point_id: i64 = row.get(1)?;
        let point_name: String = row.get(2)?;
        let method: i32 = row.get(3)?;
        let threshold: f64 = row.get(4)?;
        let param1: f64 = row.get(5)?;
        let param2: f64 = row.get(6)?;
        let param3: f64 = row.get(7)?;
        Ok((id, point_id, point_name, method, threshold, param1, param2, param3))
    })?;

    let mut by_point: HashMap<String, Vec<AlarmRule>> = HashMap::new();
    for row in rows {
        let (id, point_id, point_name, method_raw, threshold, param1, param2, param3) = row?;
        let method = match Method::from_i32(method_raw) {
            Some(m) => m,
            None => {
                log::warn!("alarm rule {} has unknown method {}, skipping", id, method_raw);
                continue;
            }
        };
        let point_id = point_id.to_string();
        by_point.entry(point_id.clone()).or_default().push(AlarmRule {
            id,
            name: format!("rule-{id}"),
            method,
            threshold: threshold as f32,
            param1: param1 as f32,
            param2: param2 as f32,
            param3: param3 as f32,
            enabled: true,
            point_id,
            point_name,
        });
    }
    for rules in by_point.values_mut() {
        sort_rules(rules);
    }
    Ok(by_point)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_sorts_rules_per_point() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn.execute("INSERT INTO t_points (id, name) VALUES (7, 'p7')", []).unwrap();
        conn.execute(
            "INSERT INTO t_alarm_rules (point_id, method, threshold, enable) VALUES (7, 2, 8.0, 1)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO t_alarm_rules (point_id, method, threshold, enable) VALUES (7, 5, 10.0, 1)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO t_alarm_rules (point_id, method, threshold, enable) VALUES (7, 3, 5.0, 0)",
            [],
        )
        .unwrap();

        let by_point = load_rules(&conn).unwrap();
        let rules = &by_point["7"];
        // the disabled L rule is filtered out; Fixed outranks High.
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].method, Method::Fixed);
        assert_eq!(rules[1].method, Method::High);
    }
}
