//! Monitor configuration
//!
//! All fields have defaults, so an empty TOML document is a valid config:
//!
//! ```toml
//! pairing_window_ms = 50
//! poll_timeout_ms = 25
//! use_cookies = true
//! coalesce_changes = true
//! backend = "native"
//! poll_interval_ms = 250
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which watch mechanism backs the monitor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The platform's native notification API
    #[default]
    Native,
    /// Periodic directory scanning (network shares, exotic filesystems)
    Poll,
}

/// Tunables for a `FileMonitor`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// How long a deletion waits for a matching creation before it is
    /// reported as a plain deletion (default: 50ms)
    #[serde(default = "default_pairing_window_ms")]
    pub pairing_window_ms: u64,

    /// Upper bound on a single backend poll; also bounds how long `stop`
    /// waits for the dispatcher thread (default: 25ms)
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Pair renames by native cookie where the backend provides one
    /// (default: true)
    #[serde(default = "default_true")]
    pub use_cookies: bool,

    /// Collapse adjacent change events for the same path (default: true)
    #[serde(default = "default_true")]
    pub coalesce_changes: bool,

    /// Watch mechanism (default: native)
    #[serde(default)]
    pub backend: BackendKind,

    /// Scan interval for the poll backend (default: 250ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            pairing_window_ms: default_pairing_window_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            use_cookies: true,
            coalesce_changes: true,
            backend: BackendKind::default(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl MonitorConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the dispatcher spin or never pair
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pairing_window_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "pairing_window_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_timeout_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.backend == BackendKind::Poll && self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: "must be at least 1 when backend = \"poll\"".to_string(),
            });
        }
        Ok(())
    }

    pub fn pairing_window(&self) -> Duration {
        Duration::from_millis(self.pairing_window_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Set the pairing window, rounded up to whole milliseconds
    pub fn with_pairing_window(mut self, window: Duration) -> Self {
        self.pairing_window_ms = ceil_millis(window);
        self
    }

    /// Set the poll timeout, rounded up to whole milliseconds
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = ceil_millis(timeout);
        self
    }

    pub fn with_cookies(mut self, use_cookies: bool) -> Self {
        self.use_cookies = use_cookies;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }
}

fn ceil_millis(duration: Duration) -> u64 {
    let millis = duration.as_nanos().div_ceil(1_000_000);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn default_pairing_window_ms() -> u64 {
    50
}

fn default_poll_timeout_ms() -> u64 {
    25
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}
