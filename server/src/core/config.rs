//! Application configuration
//!
//! Everything is read from the environment (there is no CLI; the service is
//! configured by its deployment). Numeric tuning values are clamped: unset,
//! non-numeric, or non-positive values fall back to their compiled-in
//! defaults.

use std::fmt;
use std::time::Duration;

use super::constants::{
    DEFAULT_CIRCUIT_BREAKER_FAILURE_THRESHOLD, DEFAULT_CIRCUIT_BREAKER_RECOVERY_MS,
    DEFAULT_ESTUARY_TTL_SECONDS, DEFAULT_FANOUT_BATCH_SIZE, DEFAULT_FANOUT_QUEUE_BATCH_SIZE,
    DEFAULT_FANOUT_QUEUE_MAX_ATTEMPTS, DEFAULT_FANOUT_QUEUE_REDELIVER_IDLE_MS,
    DEFAULT_FANOUT_QUEUE_THRESHOLD, DEFAULT_FANOUT_RPC_TIMEOUT_MS,
    ENV_CIRCUIT_BREAKER_FAILURE_THRESHOLD, ENV_CIRCUIT_BREAKER_RECOVERY_MS,
    ENV_ESTUARY_TTL_SECONDS, ENV_FANOUT_BATCH_SIZE, ENV_FANOUT_QUEUE_BATCH_SIZE,
    ENV_FANOUT_QUEUE_MAX_ATTEMPTS, ENV_FANOUT_QUEUE_REDELIVER_IDLE_MS,
    ENV_FANOUT_QUEUE_THRESHOLD, ENV_FANOUT_RPC_TIMEOUT_MS, ENV_QUEUE_ENABLED, ENV_STATE_BACKEND,
    ENV_STREAM_CORE_URL,
};

// =============================================================================
// State Backend Enum
// =============================================================================

/// Durable state backend for registry and estuary state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StateBackendType {
    /// Process-local state, lost on restart (development and tests)
    Memory,
    /// SQLite-backed durable state
    #[default]
    Sqlite,
}

impl fmt::Display for StateBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateBackendType::Memory => write!(f, "memory"),
            StateBackendType::Sqlite => write!(f, "sqlite"),
        }
    }
}

// =============================================================================
// Fanout Tuning
// =============================================================================

/// Fanout engine tuning knobs
///
/// Shared by the publish engine, dispatcher, queue consumer, and estuary
/// lifecycle. All values come from the environment with clamped parsing.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// TTL applied to estuaries on subscribe/touch
    pub estuary_ttl_seconds: u64,
    /// Subscriber count above which fanout goes through the queue (strict `>`)
    pub queue_threshold: usize,
    /// Maximum estuary ids per queue message
    pub queue_batch_size: usize,
    /// Inline dispatch chunk size
    pub batch_size: usize,
    /// Per-call deadline for fanout writes
    pub rpc_timeout: Duration,
    /// Consecutive failures that open the circuit breaker
    pub breaker_failure_threshold: u32,
    /// Open-to-half-open recovery delay
    pub breaker_recovery: Duration,
    /// Delivery attempts before a queue message is dropped
    pub queue_max_attempts: u32,
    /// Idle window after which unacknowledged queue messages are redelivered
    pub queue_redeliver_idle: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            estuary_ttl_seconds: DEFAULT_ESTUARY_TTL_SECONDS,
            queue_threshold: DEFAULT_FANOUT_QUEUE_THRESHOLD,
            queue_batch_size: DEFAULT_FANOUT_QUEUE_BATCH_SIZE,
            batch_size: DEFAULT_FANOUT_BATCH_SIZE,
            rpc_timeout: Duration::from_millis(DEFAULT_FANOUT_RPC_TIMEOUT_MS),
            breaker_failure_threshold: DEFAULT_CIRCUIT_BREAKER_FAILURE_THRESHOLD,
            breaker_recovery: Duration::from_millis(DEFAULT_CIRCUIT_BREAKER_RECOVERY_MS),
            queue_max_attempts: DEFAULT_FANOUT_QUEUE_MAX_ATTEMPTS,
            queue_redeliver_idle: Duration::from_millis(DEFAULT_FANOUT_QUEUE_REDELIVER_IDLE_MS),
        }
    }
}

impl FanoutConfig {
    /// Load tuning values from the environment
    pub fn from_env() -> Self {
        Self {
            estuary_ttl_seconds: env_u64(ENV_ESTUARY_TTL_SECONDS, DEFAULT_ESTUARY_TTL_SECONDS),
            queue_threshold: env_usize(ENV_FANOUT_QUEUE_THRESHOLD, DEFAULT_FANOUT_QUEUE_THRESHOLD),
            queue_batch_size: env_usize(
                ENV_FANOUT_QUEUE_BATCH_SIZE,
                DEFAULT_FANOUT_QUEUE_BATCH_SIZE,
            ),
            batch_size: env_usize(ENV_FANOUT_BATCH_SIZE, DEFAULT_FANOUT_BATCH_SIZE),
            rpc_timeout: Duration::from_millis(env_u64(
                ENV_FANOUT_RPC_TIMEOUT_MS,
                DEFAULT_FANOUT_RPC_TIMEOUT_MS,
            )),
            breaker_failure_threshold: env_u32(
                ENV_CIRCUIT_BREAKER_FAILURE_THRESHOLD,
                DEFAULT_CIRCUIT_BREAKER_FAILURE_THRESHOLD,
            ),
            breaker_recovery: Duration::from_millis(env_u64(
                ENV_CIRCUIT_BREAKER_RECOVERY_MS,
                DEFAULT_CIRCUIT_BREAKER_RECOVERY_MS,
            )),
            queue_max_attempts: env_u32(
                ENV_FANOUT_QUEUE_MAX_ATTEMPTS,
                DEFAULT_FANOUT_QUEUE_MAX_ATTEMPTS,
            ),
            queue_redeliver_idle: Duration::from_millis(env_u64(
                ENV_FANOUT_QUEUE_REDELIVER_IDLE_MS,
                DEFAULT_FANOUT_QUEUE_REDELIVER_IDLE_MS,
            )),
        }
    }
}

// =============================================================================
// App Config
// =============================================================================

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Durable state backend selection
    pub state_backend: StateBackendType,
    /// Whether the async fanout queue is wired up
    pub queue_enabled: bool,
    /// Stream-core base URL; `None` selects the embedded in-memory store
    pub stream_core_url: Option<String>,
    /// Fanout tuning
    pub fanout: FanoutConfig,
}

impl AppConfig {
    /// Load configuration from the environment
    pub fn load() -> Self {
        let state_backend = match std::env::var(ENV_STATE_BACKEND) {
            Ok(v) if v.eq_ignore_ascii_case("memory") => StateBackendType::Memory,
            Ok(v) if v.eq_ignore_ascii_case("sqlite") => StateBackendType::Sqlite,
            Ok(v) => {
                tracing::warn!(value = %v, "Unknown state backend, using sqlite");
                StateBackendType::Sqlite
            }
            Err(_) => StateBackendType::default(),
        };

        let queue_enabled = match std::env::var(ENV_QUEUE_ENABLED) {
            Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            Err(_) => true,
        };

        let stream_core_url = std::env::var(ENV_STREAM_CORE_URL)
            .ok()
            .map(|v| v.trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());

        Self {
            state_backend,
            queue_enabled,
            stream_core_url,
            fanout: FanoutConfig::from_env(),
        }
    }
}

// =============================================================================
// Clamped env parsing
// =============================================================================

fn env_u64(name: &str, default: u64) -> u64 {
    clamped(std::env::var(name).ok(), default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    clamped(std::env::var(name).ok(), default)
}

fn env_usize(name: &str, default: usize) -> usize {
    clamped(std::env::var(name).ok(), default)
}

/// Parse a positive integer, falling back to the default on anything else
fn clamped<T>(raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + From<u8>,
{
    match raw.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => match s.parse::<T>() {
            Ok(v) if v > T::from(0u8) => v,
            _ => default,
        },
        _ => default,
    }
}
