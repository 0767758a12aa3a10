//! Environment-driven client configuration

use crate::runtime::{CoordinatorConfig, DEFAULT_POLL_INTERVAL};
use crate::state_machine::DEFAULT_COOLDOWN;
use crate::transport::AuthMode;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_CONTEXT_PATH: &str = "/promotions";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the promotion agent client
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub http_timeout: Duration,
    pub poll_interval: Duration,
    pub cooldown: Duration,
    /// Dashboard location sent with every new conversation
    pub context_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            username: None,
            password: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cooldown: DEFAULT_COOLDOWN,
            context_path: DEFAULT_CONTEXT_PATH.to_string(),
        }
    }
}

fn parsed<V: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<V> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|value| !value.is_empty())
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unparseable values fall back
    /// to defaults.
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            api_url: non_empty(lookup, "PROMO_API_URL").unwrap_or(defaults.api_url),
            username: non_empty(lookup, "PROMO_API_USERNAME"),
            password: non_empty(lookup, "PROMO_API_PASSWORD"),
            http_timeout: parsed::<u64>(lookup, "PROMO_HTTP_TIMEOUT_SECS")
                .map_or(defaults.http_timeout, Duration::from_secs),
            poll_interval: parsed::<u64>(lookup, "PROMO_POLL_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .map_or(defaults.poll_interval, Duration::from_millis),
            cooldown: parsed::<u64>(lookup, "PROMO_TURN_COOLDOWN_SECS").map_or(defaults.cooldown, Duration::from_secs),
            context_path: non_empty(lookup, "PROMO_CONTEXT_PATH").unwrap_or(defaults.context_path),
        }
    }

    /// Basic auth when both credentials are set, otherwise rely on a proxy
    pub fn auth_mode(&self) -> AuthMode {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => AuthMode::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            _ => AuthMode::Proxy,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            poll_interval: self.poll_interval,
            cooldown: self.cooldown,
        }
    }
}
