use serde::{Deserialize, Serialize};

/// Reconnect policy for the signaling socket.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_interval_ms() -> u64 {
    1_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

/// Liveness-check policy for the signaling socket.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthConfig {
    /// How often the monitor wakes up to inspect the last-ack timestamp.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Maximum silence before the connection is declared dead.
    #[serde(default = "default_liveness_threshold_ms")]
    pub liveness_threshold_ms: u64,
}

fn default_check_interval_ms() -> u64 {
    25_000
}

fn default_liveness_threshold_ms() -> u64 {
    60_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            liveness_threshold_ms: default_liveness_threshold_ms(),
        }
    }
}

/// Video codec the session asks the SFU to prefer.
///
/// Passed explicitly through session construction; there is deliberately
/// no process-wide default to mutate.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CodecPreference {
    #[default]
    H264,
    Vp8,
    Vp9,
    Av1,
}

/// All tunables for one call session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CallConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub health: HealthConfig,
    /// Coalescing window for outbound subscription updates.
    #[serde(default = "default_subscription_debounce_ms")]
    pub subscription_debounce_ms: u64,
    #[serde(default)]
    pub preferred_codec: CodecPreference,
}

fn default_subscription_debounce_ms() -> u64 {
    250
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            health: HealthConfig::default(),
            subscription_debounce_ms: default_subscription_debounce_ms(),
            preferred_codec: CodecPreference::default(),
        }
    }
}
