//! Session configuration.
//!
//! Built in code with [`SessionConfig::new`] or loaded from `FOLIO_*`
//! environment variables (optionally seeded from a `.env` file):
//!
//! | Variable | Default |
//! |----------|---------|
//! | `FOLIO_BASE_URL` | `wss://localhost` |
//! | `FOLIO_TEMPLATE_ID` | required |
//! | `FOLIO_USER_ID` | random v4 UUID |
//! | `FOLIO_USER_NAME` | unset |
//! | `FOLIO_HEARTBEAT_INTERVAL_MS` | `30000` |
//! | `FOLIO_RECONNECT_BASE_DELAY_MS` | `1000` |
//! | `FOLIO_RECONNECT_MAX_ATTEMPTS` | `5` |
//! | `FOLIO_RECONNECT_MULTIPLIER` | `2` |
//! | `FOLIO_EVENT_CAPACITY` | `256` |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backoff::ReconnectPolicy;
use crate::error::ConfigError;

/// Path of the collaboration endpoint, relative to the base URL.
pub const TEMPLATE_WS_PATH: &str = "/ws/collaboration/ws/template";

const ENV_PREFIX: &str = "FOLIO_";

/// Everything one collaboration session needs to connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Scheme and host of the collaboration server, e.g. `wss://app.example.com`
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Template (document) being edited
    pub template_id: String,
    /// Local user id; also the `sender_id` of every outgoing frame
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// Display name announced in the joined presence frame
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
    #[serde(default = "default_reconnect_multiplier")]
    pub reconnect_multiplier: u32,
    /// Buffered events before the host starts missing them
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_base_url() -> String {
    "wss://localhost".to_string()
}

fn default_user_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_attempts() -> u32 {
    5
}

fn default_reconnect_multiplier() -> u32 {
    2
}

fn default_event_capacity() -> usize {
    256
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            template_id: String::new(),
            user_id: default_user_id(),
            user_name: None,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            reconnect_multiplier: default_reconnect_multiplier(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl SessionConfig {
    pub fn new(
        base_url: impl Into<String>,
        template_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            template_id: template_id.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_base_delay_ms = u64::try_from(policy.base_delay.as_millis()).unwrap_or(u64::MAX);
        self.reconnect_max_attempts = policy.max_attempts;
        self.reconnect_multiplier = policy.multiplier;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Load from `FOLIO_*` environment variables, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            log::debug!("Loaded .env file");
        }
        let config = Self::from_vars(std::env::vars())?;
        log::info!(
            "Loaded session config for template {} (user {})",
            config.template_id,
            config.user_id
        );
        Ok(config)
    }

    /// Load from an explicit set of `FOLIO_*` key/value pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the session relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("ws://") || self.base_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidScheme(self.base_url.clone()));
        }
        if self.template_id.trim().is_empty() {
            return Err(ConfigError::MissingTemplate);
        }
        if self.user_id.trim().is_empty() {
            return Err(ConfigError::MissingUser);
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.reconnect_multiplier == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect_multiplier",
                reason: "must be at least 1".into(),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "event_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_attempts: self.reconnect_max_attempts,
            multiplier: self.reconnect_multiplier,
        }
    }

    /// Endpoint URL for this template, with `token` embedded as a query
    /// parameter. A missing token is sent empty; rejecting it is the
    /// server's job.
    pub fn session_url(&self, token: Option<&str>) -> String {
        format!(
            "{}{}/{}?token={}",
            self.base_url.trim_end_matches('/'),
            TEMPLATE_WS_PATH,
            urlencoding::encode(&self.template_id),
            urlencoding::encode(token.unwrap_or_default()),
        )
    }
}
