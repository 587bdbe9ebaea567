// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `lwcomm-edge-core` - the process-wide hub node: the `node_server`
//! messaging server that driver instances connect to (spec §4.6
//! "a local messaging client to the process-wide node_server hub"),
//! plus the SPDP and legacy discovery planes (spec §4.4-§4.5).
//!
//! The hub is deliberately thin: it tracks which driver owns which tag
//! name (learned from `/tags/init` datagrams), re-publishes
//! `/tags/update` datagrams so other clients (the alarm server,
//! operator tools) can subscribe to them, and routes `/tags/control`
//! RPCs to the owning driver. The registration/resource-monitor
//! shells around this (source's `edge-core`) are out of scope per
//! spec §1; only the hub messaging role they host is implemented here.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use lwcomm::{Address, Server, ServerCallbacks, ServerOptions, Status};
use lwcomm_discovery::spdp::{ParticipantInfo, SpdpCallbacks, SpdpConfig, SpdpParticipant, TopicInfo};
use serde::{Deserialize, Serialize};

/// Edge-core hub: the `node_server` driver instances connect to.
#[derive(Parser, Debug)]
#[command(name = "lwcomm-edge-core")]
#[command(version, about = "lwcomm hub node: node_server messaging + SPDP discovery")]
struct Args {
    /// Per-service JSON config file name, resolved via LWCOMM_CONFIG_PATH.
    #[arg(short, long, default_value = "edge-core.json")]
    config: String,
}

#[derive(Deserialize, Serialize)]
struct EdgeCoreConfig {
    #[serde(default = "default_listen")]
    listen: String,
    #[serde(default)]
    domain_id: u32,
    #[serde(default = "default_participant_name")]
    participant_name: String,
    #[serde(default = "default_participant_id")]
    participant_id: u32,
    #[serde(default = "default_multicast_addr")]
    spdp_multicast_addr: Ipv4Addr,
    #[serde(default = "default_spdp_port")]
    spdp_port: u16,
    #[serde(default = "default_announce_interval")]
    spdp_announce_interval_sec: u64,
    #[serde(default = "default_lease")]
    spdp_lease_duration_sec: u64,
    #[serde(default)]
    legacy_discovery_enabled: bool,
}

fn default_listen() -> String {
    "tcp://0.0.0.0:7878".to_string()
}
fn default_participant_name() -> String {
    "lwcomm-edge-core".to_string()
}
fn default_participant_id() -> u32 {
    1
}
fn default_multicast_addr() -> Ipv4Addr {
    Ipv4Addr::new(239, 255, 0, 1)
}
fn default_spdp_port() -> u16 {
    7400
}
fn default_announce_interval() -> u64 {
    3
}
fn default_lease() -> u64 {
    10
}

impl Default for EdgeCoreConfig {
    fn default() -> Self {
        EdgeCoreConfig {
            listen: default_listen(),
            domain_id: 0,
            participant_name: default_participant_name(),
            participant_id: default_participant_id(),
            spdp_multicast_addr: default_multicast_addr(),
            spdp_port: default_spdp_port(),
            spdp_announce_interval_sec: default_announce_interval(),
            spdp_lease_duration_sec: default_lease(),
            legacy_discovery_enabled: false,
        }
    }
}

#[derive(Deserialize)]
struct TagInitDevice {
    device_name: String,
    taglist: Vec<String>,
}

#[derive(Deserialize)]
struct TagInitMessage {
    driver_name: String,
    devtags: Vec<TagInitDevice>,
}

#[derive(Deserialize)]
struct ControlRequest {
    name: String,
    value: String,
}

/// name -> owning driver, learned from `/tags/init`.
type TagRoutingTable = Arc<Mutex<HashMap<String, String>>>;

fn main() {
    let args = Args::parse();
    env_logger::init();

    let config: EdgeCoreConfig = match lwcomm::config::load_json(&args.config) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("edge-core: could not load {}: {} - using defaults", args.config, e);
            EdgeCoreConfig::default()
        }
    };

    if let Err(e) = run(config) {
        log::error!("edge-core: fatal: {}", e);
        std::process::exit(1);
    }
}

fn run(config: EdgeCoreConfig) -> std::io::Result<()> {
    let addr = Address::parse(&config.listen).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    let routing: TagRoutingTable = Arc::new(Mutex::new(HashMap::new()));

    // `on_datagram` needs to call back into the server (to re-publish
    // /tags/update to this server's own subscribers), so the callback
    // captures a handle to the server it is about to be installed on.
    let server_slot: Arc<Mutex<Option<Server>>> = Arc::new(Mutex::new(None));
    let server = {
        let routing = routing.clone();
        let server_slot = server_slot.clone();
        let callbacks = ServerCallbacks {
            on_connect: Some(Arc::new(|client_id, connected| {
                log::info!("edge-core: client {} {}", client_id, if connected { "connected" } else { "disconnected" });
            })),
            on_datagram: Some(Arc::new(move |_client_id, url, payload| {
                if let Some(server) = server_slot.lock().unwrap().as_ref() {
                    handle_datagram(&routing, server, url, payload);
                }
            })),
            on_auth: None,
        };
        Server::start(&addr, ServerOptions::default(), callbacks)?
    };
    *server_slot.lock().unwrap() = Some(server.clone());

    {
        let routing = routing.clone();
        let server_for_control = server.clone();
        server.register_handler(
            "/tags/control",
            Arc::new(move |_client_id, payload| handle_control(&routing, &server_for_control, payload)),
        );
    }
    log::info!("lwcomm-edge-core listening on {}", config.listen);

    let spdp = start_spdp(&config)?;

    let legacy = if config.legacy_discovery_enabled {
        Some(lwcomm_discovery::broadcast::BroadcastDiscovery::server(
            lwcomm_discovery::broadcast::BroadcastOptions {
                name: config.participant_name.clone(),
                advertised_port: addr.socket_addr().map(|s| s.port()).unwrap_or(0),
                ..Default::default()
            },
        )?)
    } else {
        None
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_for_handler = running.clone();
    ctrlc::set_handler(move || running_for_handler.store(false, Ordering::SeqCst)).ok();

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    log::info!("lwcomm-edge-core shutting down");
    spdp.stop();
    if let Some(legacy) = legacy {
        legacy.stop();
    }
    server.stop();
    Ok(())
}

fn handle_datagram(routing: &TagRoutingTable, server: &Server, url: &str, payload: &[u8]) {
    match url {
        "/tags/init" => {
            let msg: TagInitMessage = match serde_json::from_slice(payload) {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("edge-core: malformed /tags/init: {}", e);
                    return;
                }
            };
            let mut table = routing.lock().unwrap();
            for device in &msg.devtags {
                for tag in &device.taglist {
                    table.insert(tag.clone(), msg.driver_name.clone());
                }
            }
            log::info!("edge-core: registered {} tag(s) for driver {}", msg.devtags.iter().map(|d| d.taglist.len()).sum::<usize>(), msg.driver_name);
        }
        "/tags/update" => {
            // Re-publish so clients that only talk to the hub (the
            // alarm server, operator tools) can subscribe to
            // /tags/update without connecting to every driver directly.
            server.publish("/tags/update", payload);
        }
        other => {
            log::debug!("edge-core: unhandled datagram url {}", other);
        }
    }
}

fn handle_control(routing: &TagRoutingTable, server: &Server, payload: &[u8]) -> (Status, Vec<u8>) {
    let request: ControlRequest = match serde_json::from_slice(payload) {
        Ok(r) => r,
        Err(_) => return (Status::BadArguments, Vec::new()),
    };
    let driver_name = routing.lock().unwrap().get(&request.name).cloned();
    match driver_name {
        Some(driver_name) => {
            server.publish(&format!("/{}/control", driver_name), payload);
            (Status::Success, Vec::new())
        }
        None => (Status::NoResponding, Vec::new()),
    }
}

fn start_spdp(config: &EdgeCoreConfig) -> std::io::Result<SpdpParticipant> {
    let spdp_config = SpdpConfig {
        domain_id: config.domain_id,
        participant_id: config.participant_id,
        participant: ParticipantInfo {
            name: config.participant_name.clone(),
            protocol_version: 1,
            vendor_id: 0,
            product_id: 0,
            host_id: std::process::id(),
            application_id: 0,
            instance_id: config.participant_id,
            lease_sec: config.spdp_lease_duration_sec as u32,
            lease_nsec: 0,
        },
        multicast_address: config.spdp_multicast_addr,
        multicast_port: config.spdp_port,
        announce_interval: Duration::from_secs(config.spdp_announce_interval_sec),
        lease_duration: Duration::from_secs(config.spdp_lease_duration_sec),
    };
    let topics: lwcomm_discovery::spdp::TopicProvider = Arc::new(|| -> Vec<TopicInfo> { Vec::new() });
    let callbacks = SpdpCallbacks {
        on_participant: Some(Arc::new(|p: &ParticipantInfo, is_new| {
            if is_new {
                log::info!("edge-core: discovered participant {}", p.name);
            }
        })),
        on_topic: Some(Arc::new(|t: &TopicInfo, is_new| {
            if is_new {
                log::info!("edge-core: discovered topic {}", t.topic_name);
            }
        })),
    };
    SpdpParticipant::start(spdp_config, topics, callbacks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_ports() {
        let cfg = EdgeCoreConfig::default();
        assert_eq!(cfg.spdp_port, 7400);
        assert_eq!(cfg.spdp_lease_duration_sec, 10);
    }

    #[test]
    fn control_routes_to_owning_driver_and_unknown_tag_is_no_responding() {
        let routing: TagRoutingTable = Arc::new(Mutex::new(HashMap::new()));
        routing.lock().unwrap().insert("t1".to_string(), "plc_driver".to_string());

        let server = Server::start(
            &Address::parse("tcp://127.0.0.1:0").unwrap(),
            ServerOptions::default(),
            ServerCallbacks::default(),
        )
        .unwrap();

        let payload = serde_json::to_vec(&ControlRequestTest { name: "t1".to_string(), value: "1".to_string() }).unwrap();
        let (status, _) = handle_control(&routing, &server, &payload);
        assert!(matches!(status, Status::Success));

        let payload = serde_json::to_vec(&ControlRequestTest { name: "unknown".to_string(), value: "1".to_string() }).unwrap();
        let (status, _) = handle_control(&routing, &server, &payload);
        assert!(matches!(status, Status::NoResponding));

        server.stop();
    }

    #[derive(Serialize)]
    struct ControlRequestTest {
        name: String,
        value: String,
    }
}
