// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-service configuration loading.
//!
//! Mirrors the source's `LWComm::GetConfigPath()` directory convention:
//! an environment variable override, else a platform config directory,
//! else `./config` relative to the working directory. Each service
//! binary (`lwcomm-driver-loader`, `lwcomm-alarm-server`,
//! `lwcomm-edge-core`) reads its own JSON file from that directory.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the config directory.
pub const CONFIG_PATH_ENV: &str = "LWCOMM_CONFIG_PATH";

/// Resolve the directory holding per-service JSON config files.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(p);
    }
    PathBuf::from("./config")
}

/// Load and parse `<config_path()>/<file_name>` as JSON.
pub fn load_json<T: DeserializeOwned>(file_name: &str) -> std::io::Result<T> {
    load_json_from(&config_path(), file_name)
}

/// Load and parse `<dir>/<file_name>` as JSON (used directly by tests
/// that want to avoid the environment-dependent default directory).
pub fn load_json_from<T: DeserializeOwned>(dir: &Path, file_name: &str) -> std::io::Result<T> {
    let path = dir.join(file_name);
    let text = std::fs::read_to_string(&path)?;
    serde_json::from_str(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Example {
        name: String,
        #[serde(default)]
        port: u16,
    }

    #[test]
    fn loads_json_from_explicit_dir() {
        let dir = tempdir();
        std::fs::write(dir.join("svc.json"), r#"{"name":"hub","port":7400}"#).unwrap();
        let cfg: Example = load_json_from(&dir, "svc.json").unwrap();
        assert_eq!(cfg.name, "hub");
        assert_eq!(cfg.port, 7400);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("lwcomm-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
