//! Process-environment configuration for every component.
//!
//! Per `spec.md` §6.5: numeric env vars are clamped to documented ranges
//! and booleans accept `"true"/"false"` case-insensitively. Each
//! component gets its own config struct with a `from_env()` constructor;
//! nothing here reads a config file except [`crate::policy::PolicyConfig`]'s
//! optional YAML override, which follows the same sentinel-style
//! `from_file` loader chain configs elsewhere in this codebase use.

use std::env;
use std::time::Duration;

fn parse_env_u64_clamped(key: &str, default: u64, min: u64, max: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(|v| v.clamp(min, max))
        .unwrap_or(default)
}

fn parse_env_u32_clamped(key: &str, default: u32, min: u32, max: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .map(|v| v.clamp(min, max))
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| match v.to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            _ => default,
        })
        .unwrap_or(default)
}

fn parse_env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env_opt_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

/// Dispatcher (component A/B) quota and timing config.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_total_pending: usize,
    pub max_per_origin: usize,
    pub ttl_ms: u64,
    pub strict_global_order: bool,
    pub expiry_tick_interval: Duration,
    /// Path to a JSON file used for durable pending-request persistence
    /// in local development. `None` keeps state in memory only.
    pub state_file: Option<String>,
}

impl DispatcherConfig {
    pub fn from_env() -> Self {
        Self {
            max_total_pending: parse_env_u64_clamped("FORGEOS_MAX_TOTAL_PENDING", 20, 1, 500)
                as usize,
            max_per_origin: parse_env_u64_clamped("FORGEOS_MAX_PER_ORIGIN", 2, 1, 100) as usize,
            ttl_ms: parse_env_u64_clamped("FORGEOS_TTL_MS", 60_000, 1_000, 3_600_000),
            strict_global_order: parse_env_bool("FORGEOS_STRICT_GLOBAL_ORDER", false),
            expiry_tick_interval: Duration::from_millis(parse_env_u64_clamped(
                "FORGEOS_EXPIRY_TICK_MS",
                60_000,
                60_000,
                600_000,
            )),
            state_file: parse_env_opt_string("FORGEOS_STATE_FILE"),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Transaction-builder service (component D) config.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub bind_addr: String,
    pub request_timeout: Duration,
    pub rpc_timeout: Duration,
    pub max_body_bytes: usize,
    pub mode: BuildMode,
    pub command_path: Option<String>,
    pub proxy_url: Option<String>,
    pub bearer_tokens: Vec<String>,
    pub auth_headers: Vec<String>,
    pub mainnet_rpc_base: Option<String>,
    pub testnet10_rpc_base: Option<String>,
    pub require_strict_telemetry_freshness: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    LocalNative,
    Command,
    Proxy,
    Manual,
    NotConfigured,
}

impl BuilderConfig {
    pub fn from_env() -> Self {
        let mode = match parse_env_string("FORGEOS_BUILD_MODE", "local").as_str() {
            "local" => BuildMode::LocalNative,
            "command" => BuildMode::Command,
            "proxy" => BuildMode::Proxy,
            "manual" => BuildMode::Manual,
            _ => BuildMode::NotConfigured,
        };
        let bearer_tokens = parse_env_opt_string("FORGEOS_BUILDER_TOKENS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        let auth_headers = parse_env_opt_string("FORGEOS_BUILDER_AUTH_HEADERS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        Self {
            bind_addr: parse_env_string("FORGEOS_BUILDER_BIND_ADDR", "0.0.0.0:8787"),
            request_timeout: Duration::from_millis(parse_env_u64_clamped(
                "FORGEOS_BUILDER_REQUEST_TIMEOUT_MS",
                8_000,
                500,
                60_000,
            )),
            rpc_timeout: Duration::from_millis(parse_env_u64_clamped(
                "FORGEOS_BUILDER_RPC_TIMEOUT_MS",
                5_000,
                250,
                30_000,
            )),
            max_body_bytes: parse_env_u64_clamped(
                "FORGEOS_BUILDER_MAX_BODY_BYTES",
                1_048_576,
                1_024,
                1_048_576,
            ) as usize,
            mode,
            command_path: parse_env_opt_string("FORGEOS_BUILD_COMMAND"),
            proxy_url: parse_env_opt_string("FORGEOS_BUILD_PROXY_URL"),
            bearer_tokens,
            auth_headers,
            mainnet_rpc_base: parse_env_opt_string("FORGEOS_MAINNET_RPC_BASE"),
            testnet10_rpc_base: parse_env_opt_string("FORGEOS_TESTNET10_RPC_BASE"),
            require_strict_telemetry_freshness: parse_env_bool(
                "FORGEOS_REQUIRE_STRICT_TELEMETRY_FRESHNESS",
                false,
            ),
        }
    }
}

/// Telemetry summary cache (component E) config.
#[derive(Debug, Clone)]
pub struct TelemetryCacheConfig {
    pub ttl: Duration,
    pub stale_soft: Duration,
    pub stale_hard: Duration,
    pub callback_summary_url: Option<String>,
    pub scheduler_summary_url: Option<String>,
    pub fetch_timeout: Duration,
    /// Dampening factor applied to the latency multiplier delta under
    /// `stale_soft` (`spec.md` §4.E Open Question — tunable, default 0.45).
    pub stale_soft_dampening: f64,
}

impl TelemetryCacheConfig {
    pub fn from_env() -> Self {
        let ttl_ms = parse_env_u64_clamped("FORGEOS_TELEMETRY_TTL_MS", 5_000, 500, 120_000);
        let soft_ms = parse_env_u64_clamped(
            "FORGEOS_TELEMETRY_STALE_SOFT_MS",
            ttl_ms * 3,
            ttl_ms + 1,
            600_000,
        );
        let hard_ms = parse_env_u64_clamped(
            "FORGEOS_TELEMETRY_STALE_HARD_MS",
            soft_ms * 3,
            soft_ms + 1,
            3_600_000,
        );
        Self {
            ttl: Duration::from_millis(ttl_ms),
            stale_soft: Duration::from_millis(soft_ms),
            stale_hard: Duration::from_millis(hard_ms),
            callback_summary_url: parse_env_opt_string("FORGEOS_CALLBACK_SUMMARY_URL"),
            scheduler_summary_url: parse_env_opt_string("FORGEOS_SCHEDULER_SUMMARY_URL"),
            fetch_timeout: Duration::from_millis(parse_env_u64_clamped(
                "FORGEOS_TELEMETRY_FETCH_TIMEOUT_MS",
                3_000,
                250,
                30_000,
            )),
            stale_soft_dampening: 0.45,
        }
    }
}

/// Callback/receipt consumer service (component F) config.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub bind_addr: String,
    pub redis_url: Option<String>,
    pub postgres_url: Option<String>,
    pub idempotency_ttl: Duration,
    pub receipt_ttl: Duration,
    pub recent_events_capacity: usize,
    pub recent_receipts_capacity: usize,
    pub sse_max_clients: usize,
    pub sse_heartbeat_interval: Duration,
    pub sse_replay_cap: usize,
    /// Optional bearer-style tokens accepted on the SSE stream's `token`
    /// query parameter (`spec.md` §6.3). Empty means the stream is open.
    pub stream_tokens: Vec<String>,
}

impl ConsumerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: parse_env_string("FORGEOS_CONSUMER_BIND_ADDR", "0.0.0.0:8788"),
            redis_url: parse_env_opt_string("FORGEOS_CONSUMER_REDIS_URL"),
            postgres_url: parse_env_opt_string("FORGEOS_CONSUMER_POSTGRES_URL"),
            idempotency_ttl: Duration::from_millis(parse_env_u64_clamped(
                "FORGEOS_IDEMPOTENCY_TTL_MS",
                86_400_000,
                60_000,
                604_800_000,
            )),
            receipt_ttl: Duration::from_millis(parse_env_u64_clamped(
                "FORGEOS_RECEIPT_TTL_MS",
                604_800_000,
                3_600_000,
                2_592_000_000,
            )),
            recent_events_capacity: parse_env_u32_clamped(
                "FORGEOS_RECENT_EVENTS_CAPACITY",
                500,
                16,
                10_000,
            ) as usize,
            recent_receipts_capacity: parse_env_u32_clamped(
                "FORGEOS_RECENT_RECEIPTS_CAPACITY",
                2_000,
                16,
                50_000,
            ) as usize,
            sse_max_clients: parse_env_u32_clamped("FORGEOS_SSE_MAX_CLIENTS", 200, 1, 10_000)
                as usize,
            sse_heartbeat_interval: Duration::from_millis(parse_env_u64_clamped(
                "FORGEOS_SSE_HEARTBEAT_MS",
                15_000,
                1_000,
                120_000,
            )),
            sse_replay_cap: parse_env_u32_clamped("FORGEOS_SSE_REPLAY_CAP", 200, 1, 5_000)
                as usize,
            stream_tokens: parse_env_opt_string("FORGEOS_SSE_STREAM_TOKENS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
        }
    }
}

/// Logging config shared by every binary, consumed by
/// `logging::init_logging`.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: String,
    pub log_file: String,
    pub log_level: String,
    pub rotation: String,
    pub use_json: bool,
    pub enable_tracing: bool,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            log_dir: parse_env_string("FORGEOS_LOG_DIR", "logs"),
            log_file: parse_env_string("FORGEOS_LOG_FILE", "forgeos-core.log"),
            log_level: parse_env_string("FORGEOS_LOG_LEVEL", "info"),
            rotation: parse_env_string("FORGEOS_LOG_ROTATION", "daily"),
            use_json: parse_env_bool("FORGEOS_LOG_JSON", false),
            enable_tracing: parse_env_bool("FORGEOS_LOG_ENABLE_TRACING", true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_clamp_respects_bounds() {
        // SAFETY: env mutation is confined to this single-threaded test.
        unsafe {
            env::set_var("FORGEOS_TEST_CLAMP", "999999");
        }
        assert_eq!(parse_env_u64_clamped("FORGEOS_TEST_CLAMP", 5, 1, 100), 100);
        unsafe {
            env::remove_var("FORGEOS_TEST_CLAMP");
        }
    }

    #[test]
    fn bool_parsing_is_case_insensitive() {
        unsafe {
            env::set_var("FORGEOS_TEST_BOOL", "TRUE");
        }
        assert!(parse_env_bool("FORGEOS_TEST_BOOL", false));
        unsafe {
            env::remove_var("FORGEOS_TEST_BOOL");
        }
    }
}
