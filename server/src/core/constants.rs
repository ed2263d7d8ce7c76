// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "Confluence";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "confluence";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".confluence";

// =============================================================================
// Environment Variables - Application
// =============================================================================

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "CONFLUENCE_LOG";

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "CONFLUENCE_DATA_DIR";

/// Environment variable selecting the durable state backend (`memory` | `sqlite`)
pub const ENV_STATE_BACKEND: &str = "CONFLUENCE_STATE_BACKEND";

/// Environment variable enabling/disabling the async fanout queue
pub const ENV_QUEUE_ENABLED: &str = "CONFLUENCE_QUEUE_ENABLED";

/// Environment variable for the stream-core base URL
///
/// When unset the embedded in-memory stream store is used (local development).
pub const ENV_STREAM_CORE_URL: &str = "CONFLUENCE_STREAM_CORE_URL";

// =============================================================================
// Environment Variables - Fanout Tuning
// =============================================================================

/// TTL applied to estuaries on subscribe/touch, in seconds
pub const ENV_ESTUARY_TTL_SECONDS: &str = "ESTUARY_TTL_SECONDS";

/// Subscriber count above which fanout is routed through the queue
pub const ENV_FANOUT_QUEUE_THRESHOLD: &str = "FANOUT_QUEUE_THRESHOLD";

/// Maximum estuary ids per queue message
pub const ENV_FANOUT_QUEUE_BATCH_SIZE: &str = "FANOUT_QUEUE_BATCH_SIZE";

/// Inline fanout parallelism chunk size
pub const ENV_FANOUT_BATCH_SIZE: &str = "FANOUT_BATCH_SIZE";

/// Per-call deadline for fanout writes, in milliseconds
pub const ENV_FANOUT_RPC_TIMEOUT_MS: &str = "FANOUT_RPC_TIMEOUT_MS";

/// Consecutive-failure count that opens the circuit breaker
pub const ENV_CIRCUIT_BREAKER_FAILURE_THRESHOLD: &str = "CIRCUIT_BREAKER_FAILURE_THRESHOLD";

/// Open-to-half-open recovery delay, in milliseconds
pub const ENV_CIRCUIT_BREAKER_RECOVERY_MS: &str = "CIRCUIT_BREAKER_RECOVERY_MS";

/// Maximum delivery attempts per queue message before it is dropped
pub const ENV_FANOUT_QUEUE_MAX_ATTEMPTS: &str = "FANOUT_QUEUE_MAX_ATTEMPTS";

/// Idle time after which an unacknowledged queue message is redelivered, in ms
pub const ENV_FANOUT_QUEUE_REDELIVER_IDLE_MS: &str = "FANOUT_QUEUE_REDELIVER_IDLE_MS";

// =============================================================================
// Fanout Defaults
// =============================================================================

/// Default estuary TTL (24 hours)
pub const DEFAULT_ESTUARY_TTL_SECONDS: u64 = 86_400;

/// Default queue threshold (strict `>`; at or below this count fanout is inline)
pub const DEFAULT_FANOUT_QUEUE_THRESHOLD: usize = 200;

/// Default estuary ids per queue message
pub const DEFAULT_FANOUT_QUEUE_BATCH_SIZE: usize = 50;

/// Default inline parallelism chunk
pub const DEFAULT_FANOUT_BATCH_SIZE: usize = 50;

/// Default per-call fanout write deadline
pub const DEFAULT_FANOUT_RPC_TIMEOUT_MS: u64 = 10_000;

/// Default consecutive-failure trigger for the circuit breaker
pub const DEFAULT_CIRCUIT_BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Default open-to-half-open delay
pub const DEFAULT_CIRCUIT_BREAKER_RECOVERY_MS: u64 = 60_000;

/// Default maximum delivery attempts per queue message
pub const DEFAULT_FANOUT_QUEUE_MAX_ATTEMPTS: u32 = 5;

/// Default redelivery idle window for unacknowledged queue messages
pub const DEFAULT_FANOUT_QUEUE_REDELIVER_IDLE_MS: u64 = 30_000;

/// Sources are detached from an expiring estuary in chunks of this size
pub const EXPIRY_SWEEP_CHUNK: usize = 20;

// =============================================================================
// Producer Headers
// =============================================================================

/// Producer id header on estuary writes
pub const HEADER_PRODUCER_ID: &str = "x-producer-id";

/// Producer epoch header on estuary writes
pub const HEADER_PRODUCER_EPOCH: &str = "x-producer-epoch";

/// Producer sequence header on estuary writes
pub const HEADER_PRODUCER_SEQ: &str = "x-producer-seq";

/// Response header carrying the next offset after an append
pub const HEADER_NEXT_OFFSET: &str = "x-stream-next-offset";

/// Producer id prefix for fanout writes (`fanout:<sourceStreamId>`)
pub const FANOUT_PRODUCER_ID_PREFIX: &str = "fanout:";

/// Fanout producer epoch (fixed; sequences are monotone within it)
pub const FANOUT_PRODUCER_EPOCH: &str = "1";

// =============================================================================
// SQLite
// =============================================================================

/// SQLite database file name
pub const SQLITE_DB_FILENAME: &str = "confluence.db";

/// SQLite connection pool size
pub const SQLITE_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in seconds
pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// Caching
// =============================================================================

/// TTL for cached source content-type lookups
pub const CONTENT_TYPE_CACHE_TTL_SECS: u64 = 60;

/// Maximum entries in the content-type cache
pub const CONTENT_TYPE_CACHE_MAX_ENTRIES: u64 = 10_000;

// =============================================================================
// Shutdown
// =============================================================================

/// Maximum time to wait for background tasks during shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
