use std::env;
use std::net::SocketAddr;

use crate::RelayError;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: String,
    pub port: u16,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind: env::var("SHORE_RELAY_BIND")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.bind),
            port: env::var("SHORE_RELAY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, RelayError> {
        let raw = format!("{}:{}", self.bind, self.port);
        raw.parse()
            .map_err(|_| RelayError::Config(format!("invalid bind address {raw}")))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}
