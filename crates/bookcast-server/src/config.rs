//! Downstream server configuration.

use serde::{Deserialize, Serialize};

/// HTTP/WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent socket clients.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Venue REST endpoint proxied by `/asset_pairs`.
    #[serde(default = "default_asset_pairs_url")]
    pub asset_pairs_url: String,
    /// Timeout for the asset pairs request in milliseconds.
    #[serde(default = "default_asset_pairs_timeout_ms")]
    pub asset_pairs_timeout_ms: u64,
    /// Messages buffered per client before its forwarders block.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    256
}

fn default_asset_pairs_url() -> String {
    "https://api.kraken.com/0/public/AssetPairs".to_string()
}

fn default_asset_pairs_timeout_ms() -> u64 {
    10_000
}

fn default_outbound_buffer() -> usize {
    512
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            asset_pairs_url: default_asset_pairs_url(),
            asset_pairs_timeout_ms: default_asset_pairs_timeout_ms(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
