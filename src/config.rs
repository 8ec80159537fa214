//! Layered configuration (§6.3, §10.3): defaults, overridden by an optional
//! TOML file, overridden by `RPCMUX_*` environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RpcMuxError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsDefaults {
    pub ssl_ca_file: Option<String>,
    pub ssl_client_cert_file: Option<String>,
    pub ssl_server_name: Option<String>,
    pub reconnect_interval_min_ms: u64,
    pub reconnect_interval_max_ms: u64,
    pub idle_close_timeout_ms: u64,
}

impl Default for WsDefaults {
    fn default() -> Self {
        Self {
            ssl_ca_file: None,
            ssl_client_cert_file: None,
            ssl_server_name: None,
            reconnect_interval_min_ms: 1_000,
            reconnect_interval_max_ms: 30_000,
            idle_close_timeout_ms: 0,
        }
    }
}

impl WsDefaults {
    /// Applies the `key=value` overrides parsed out of a destination URI's
    /// fragment (§4.3) on top of the configured defaults.
    pub fn merged_with_fragment(&self, params: &std::collections::HashMap<String, String>) -> WsDefaults {
        let mut merged = self.clone();
        if let Some(v) = params.get("reconnect_interval_min_ms").and_then(|s| s.parse().ok()) {
            merged.reconnect_interval_min_ms = v;
        }
        if let Some(v) = params.get("reconnect_interval_max_ms").and_then(|s| s.parse().ok()) {
            merged.reconnect_interval_max_ms = v;
        }
        if let Some(v) = params.get("idle_close_timeout_ms").and_then(|s| s.parse().ok()) {
            merged.idle_close_timeout_ms = v;
        }
        if let Some(v) = params.get("ssl_server_name") {
            merged.ssl_server_name = Some(v.clone());
        }
        merged
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub enable: bool,
    pub max_queue_length: usize,
    pub auth_domain: String,
    pub auth_file: Option<String>,
    pub ws: WsDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: true,
            max_queue_length: 256,
            auth_domain: "rpcmux".to_string(),
            auth_file: None,
            ws: WsDefaults::default(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Config, RpcMuxError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str(&text)?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RPCMUX_ENABLE") {
            if let Ok(b) = v.parse() {
                self.enable = b;
            }
        }
        if let Ok(v) = std::env::var("RPCMUX_MAX_QUEUE_LENGTH") {
            if let Ok(n) = v.parse() {
                self.max_queue_length = n;
            }
        }
        if let Ok(v) = std::env::var("RPCMUX_AUTH_DOMAIN") {
            self.auth_domain = v;
        }
        if let Ok(v) = std::env::var("RPCMUX_AUTH_FILE") {
            self.auth_file = Some(v);
        }
        if let Ok(v) = std::env::var("RPCMUX_WS_RECONNECT_INTERVAL_MIN_MS") {
            if let Ok(n) = v.parse() {
                self.ws.reconnect_interval_min_ms = n;
            }
        }
        if let Ok(v) = std::env::var("RPCMUX_WS_RECONNECT_INTERVAL_MAX_MS") {
            if let Ok(n) = v.parse() {
                self.ws.reconnect_interval_max_ms = n;
            }
        }
    }
}
