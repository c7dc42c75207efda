use std::env;
use std::time::Duration;

const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8080";
const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
const DEFAULT_RING_TIMEOUT_SECS: u64 = 45;

/// Client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Relay base URL; `/ws?user_id=` is appended at connect time
    pub relay_url: String,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub ice_servers: Vec<String>,
    pub disable_stun: bool,
    /// How long an unanswered outgoing call rings. `None` rings forever.
    pub ring_timeout: Option<Duration>,
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let relay_url = env::var("SHORE_RELAY_URL")
            .map(|url| normalize_localhost(&url))
            .unwrap_or(defaults.relay_url);
        let user_id = non_blank(env::var("SHORE_USER_ID").ok());
        let display_name = non_blank(env::var("SHORE_DISPLAY_NAME").ok());
        let ice_servers = match env::var("SHORE_ICE_SERVERS") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_owned)
                .collect(),
            Err(_) => defaults.ice_servers,
        };
        let disable_stun = env::var("SHORE_DISABLE_STUN")
            .map(|v| v != "0" && !v.is_empty())
            .unwrap_or(false);
        let ring_timeout = match env::var("SHORE_RING_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.ring_timeout,
        };

        Self {
            relay_url,
            user_id,
            display_name,
            ice_servers,
            disable_stun,
            ring_timeout,
        }
    }

    pub fn effective_ice_servers(&self) -> Vec<String> {
        if self.disable_stun {
            Vec::new()
        } else {
            self.ice_servers.clone()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            user_id: None,
            display_name: None,
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            disable_stun: false,
            ring_timeout: Some(Duration::from_secs(DEFAULT_RING_TIMEOUT_SECS)),
        }
    }
}

// Normalize localhost to IPv4 to avoid IPv6 (::1) preference on macOS
fn normalize_localhost(url: &str) -> String {
    url.replacen("://localhost", "://127.0.0.1", 1)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Mutex to ensure environment variable tests don't run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "SHORE_RELAY_URL",
        "SHORE_USER_ID",
        "SHORE_DISPLAY_NAME",
        "SHORE_ICE_SERVERS",
        "SHORE_DISABLE_STUN",
        "SHORE_RING_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test_timeout::timeout]
    fn defaults_without_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();

        let config = ClientConfig::from_env();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.ring_timeout, Some(Duration::from_secs(45)));
    }

    #[test_timeout::timeout]
    fn env_overrides_are_applied() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("SHORE_RELAY_URL", "ws://localhost:9000");
            env::set_var("SHORE_USER_ID", " alice ");
            env::set_var("SHORE_DISPLAY_NAME", "  ");
            env::set_var("SHORE_ICE_SERVERS", "stun:a.example:3478, ,turn:b.example");
            env::set_var("SHORE_RING_TIMEOUT_SECS", "0");
        }

        let config = ClientConfig::from_env();
        assert_eq!(config.relay_url, "ws://127.0.0.1:9000");
        assert_eq!(config.user_id.as_deref(), Some("alice"));
        assert_eq!(config.display_name, None);
        assert_eq!(
            config.ice_servers,
            vec!["stun:a.example:3478".to_string(), "turn:b.example".to_string()]
        );
        assert_eq!(config.ring_timeout, None);

        clear_env();
    }

    #[test_timeout::timeout]
    fn disable_stun_empties_ice_servers() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("SHORE_DISABLE_STUN", "1");
        }

        let config = ClientConfig::from_env();
        assert!(config.disable_stun);
        assert!(config.effective_ice_servers().is_empty());
        assert!(!config.ice_servers.is_empty());

        clear_env();
    }
}
