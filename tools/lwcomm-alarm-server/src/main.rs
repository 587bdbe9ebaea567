// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `lwcomm-alarm-server` - subscribes to `/tags/update` on the hub,
//! feeds each point value through the priority-ordered alarm rule
//! engine, and publishes `TRIGGER`/`CLEAR` notifications on
//! `/v1/alarm_server/alarm_info/` (spec §4.7, §6).
//!
//! Rule loading and alarm log persistence use SQLite row shapes the
//! alarm engine consumes/produces (spec §6 "Persisted data"); the
//! schema loader and HTTP admin façade around this process are out of
//! scope (spec §1).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use lwcomm::{Address, Client, ClientCallbacks, ClientOptions, Server, ServerCallbacks, ServerOptions};
use lwcomm_alarm::{config as alarm_config, log as alarm_log, AlarmEngine, AlarmEngineCallbacks, AlarmEventKind, AlarmNotification};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

const ALARM_INFO_URL: &str = "/v1/alarm_server/alarm_info/";
const TAG_UPDATE_URL: &str = "/tags/update";

#[derive(Parser, Debug)]
#[command(name = "lwcomm-alarm-server")]
#[command(version, about = "lwcomm priority-ordered alarm rule engine")]
struct Args {
    /// Per-service JSON config file name, resolved via LWCOMM_CONFIG_PATH.
    #[arg(short, long, default_value = "alarm-server.json")]
    config: String,
}

#[derive(Deserialize)]
struct AlarmServerConfig {
    #[serde(default = "default_hub_addr")]
    hub_addr: String,
    #[serde(default = "default_listen")]
    listen: String,
    #[serde(default = "default_db_path")]
    db_path: PathBuf,
}

fn default_hub_addr() -> String {
    "tcp://127.0.0.1:7878".to_string()
}
fn default_listen() -> String {
    "tcp://0.0.0.0:7879".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./alarm.db")
}

impl Default for AlarmServerConfig {
    fn default() -> Self {
        AlarmServerConfig {
            hub_addr: default_hub_addr(),
            listen: default_listen(),
            db_path: default_db_path(),
        }
    }
}

/// Row shape of a `/tags/update` datagram entry (spec §6).
#[derive(Deserialize)]
struct TagUpdateRow {
    name: String,
    value: String,
}

/// `/v1/alarm_server/alarm_info/` publish payload (spec §6).
#[derive(Serialize)]
struct AlarmInfo<'a> {
    point_id: &'a str,
    point_name: &'a str,
    point_value: f32,
    rule_id: i64,
    rule_name: &'a str,
    rule_method: i32,
    message_type: &'static str,
    timestamp: i64,
}

fn main() {
    let args = Args::parse();
    env_logger::init();

    let config: AlarmServerConfig = match lwcomm::config::load_json(&args.config) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("alarm-server: could not load {}: {} - using defaults", args.config, e);
            AlarmServerConfig::default()
        }
    };

    if let Err(e) = run(config) {
        log::error!("alarm-server: fatal: {}", e);
        std::process::exit(1);
    }
}

fn run(config: AlarmServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let conn = Connection::open(&config.db_path)?;
    alarm_config::ensure_schema(&conn)?;
    alarm_log::ensure_schema(&conn)?;
    let rules = alarm_config::load_rules(&conn)?;
    let rule_count: usize = rules.values().map(|v| v.len()).sum();
    log::info!("alarm-server: loaded {} rule(s) across {} point(s)", rule_count, rules.len());

    let log_saver = Arc::new(alarm_log::AlarmLogSaver::start(&config.db_path)?);

    let listen_addr = Address::parse(&config.listen)?;
    let info_server = Server::start(&listen_addr, ServerOptions::default(), ServerCallbacks::default())?;

    let notify_server = info_server.clone();
    let engine_callbacks = AlarmEngineCallbacks {
        on_notify: Some(Arc::new(move |n: &AlarmNotification| publish_notification(&notify_server, n))),
    };
    let engine = Arc::new(AlarmEngine::start(rules, log_saver, engine_callbacks));

    let hub_addr = Address::parse(&config.hub_addr)?;
    let hub_client = connect_and_subscribe(&hub_addr, engine.clone())?;

    log::info!("lwcomm-alarm-server listening on {}, hub {}", config.listen, config.hub_addr);

    let running = Arc::new(AtomicBool::new(true));
    let running_for_handler = running.clone();
    ctrlc::set_handler(move || running_for_handler.store(false, Ordering::SeqCst)).ok();

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    log::info!("lwcomm-alarm-server shutting down");
    hub_client.disconnect();
    info_server.stop();
    engine.stop();
    Ok(())
}

fn connect_and_subscribe(hub_addr: &Address, engine: Arc<AlarmEngine>) -> lwcomm::Result<Client> {
    let client = Client::connect(hub_addr, ClientOptions::default(), ClientCallbacks::default())?;
    client.set_on_message(Arc::new(move |url, payload| {
        if url == TAG_UPDATE_URL {
            ingest_tag_update(&engine, payload);
        }
    }));
    client.subscribe(TAG_UPDATE_URL, None)?;
    Ok(client)
}

fn ingest_tag_update(engine: &AlarmEngine, payload: &[u8]) {
    let rows: Vec<TagUpdateRow> = match serde_json::from_slice(payload) {
        Ok(rows) => rows,
        Err(e) => {
            log::warn!("alarm-server: malformed /tags/update payload: {}", e);
            return;
        }
    };
    for row in rows {
        engine.push(row.name, row.value);
    }
}

fn publish_notification(server: &Server, n: &AlarmNotification) {
    let message_type = match n.kind {
        AlarmEventKind::Trigger => "TRIGGER",
        AlarmEventKind::Clear => "CLEAR",
    };
    let info = AlarmInfo {
        point_id: &n.point_id,
        point_name: &n.point_name,
        point_value: n.point_value,
        rule_id: n.rule_id,
        rule_name: &n.rule_name,
        rule_method: n.rule_method,
        message_type,
        timestamp: n.timestamp_ms,
    };
    match serde_json::to_vec(&info) {
        Ok(payload) => server.publish(ALARM_INFO_URL, &payload),
        Err(e) => log::error!("alarm-server: failed to serialise alarm info: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_local_hub() {
        let cfg = AlarmServerConfig::default();
        assert_eq!(cfg.hub_addr, "tcp://127.0.0.1:7878");
    }

    #[test]
    fn ingest_parses_tag_update_rows_and_drops_malformed_payload() {
        let rules = std::collections::HashMap::new();
        let conn = Connection::open_in_memory().unwrap();
        alarm_log::ensure_schema(&conn).unwrap();
        let engine = AlarmEngine::start(rules, Arc::new(alarm_log::AlarmLogSaver::start_with_connection(conn)), AlarmEngineCallbacks::default());

        ingest_tag_update(&engine, br#"[{"name":"7","value":"60"}]"#);
        ingest_tag_update(&engine, b"not json");
        engine.stop();
    }
}
