use std::env;
use std::time::Duration;

use crate::alerts::DEFAULT_EVENT_BUFFER;
use crate::engine::DEFAULT_STORE_TIMEOUT;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub store_timeout: Duration,
    pub event_buffer: usize,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            database_url: env_opt("DATABASE_URL"),
            max_connections: env_parse("SIGNAL_WATCH_MAX_CONNECTIONS", 5),
            store_timeout: Duration::from_millis(env_parse(
                "SIGNAL_WATCH_STORE_TIMEOUT_MS",
                DEFAULT_STORE_TIMEOUT.as_millis() as u64,
            )),
            event_buffer: env_parse("SIGNAL_WATCH_EVENT_BUFFER", DEFAULT_EVENT_BUFFER),
        }
    }
}
