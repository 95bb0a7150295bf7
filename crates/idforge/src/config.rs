//! Plain configuration structs for the three strategies.
//!
//! Defaults match what deployments get when a setting is left out. With the
//! `serde` feature every struct deserializes from camelCase keys, and
//! missing keys fall back to the defaults.

use core::time::Duration;

use crate::RetryConfig;

/// Settings for the local Snowflake strategy.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, rename_all = "camelCase")
)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalConfig {
    /// Datacenter used by the parameterless facade calls, in `[0, 31]`.
    pub datacenter_id: u64,
    /// Machine used by the parameterless facade calls, in `[0, 31]`.
    pub machine_id: u64,
}

/// Settings for the shared-cache counter strategy.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, rename_all = "camelCase")
)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterConfig {
    /// Namespace prepended to every counter key.
    pub prefix: String,
    /// Width of the counter suffix.
    pub length: usize,
    /// Increment applied per ID.
    pub step: u64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            prefix: "idforge".to_string(),
            length: 8,
            step: 1,
        }
    }
}

/// Settings for the coordination-service sequence strategy.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, rename_all = "camelCase")
)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinationConfig {
    /// Root node name; sequence nodes live under `/<prefix>`.
    pub prefix: String,
    /// Comma-separated `host:port` list. Required.
    pub connect_string: String,
    pub session_timeout_ms: u64,
    pub connection_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl CoordinationConfig {
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            prefix: "idforge".to_string(),
            connect_string: String::new(),
            session_timeout_ms: 15_000,
            connection_timeout_ms: 15_000,
            retry: RetryConfig::default(),
        }
    }
}
