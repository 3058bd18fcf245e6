//! Atomic idempotency + fence decision (`spec.md` §4.F).
//!
//! The three-outcome decision table per `(agentKey, idempotencyKey,
//! fenceToken)` is a single server-side script against Redis when
//! configured (`RedisFenceStore`), or an equivalent in-memory critical
//! section otherwise (`InMemoryFenceStore`) — `spec.md`: "an equivalent
//! in-memory implementation holds for the life of the process."

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceDecision {
    Duplicate,
    Stale { current_fence: u64, received_fence: u64 },
    Accepted { fence_advanced: bool },
}

#[derive(Debug, thiserror::Error)]
pub enum FenceError {
    #[error("redis error: {0}")]
    Redis(String),
}

#[async_trait]
pub trait FenceStore: Send + Sync {
    /// Returns `(decision, fail_open)`. `fail_open` is true only in the
    /// Redis-backed implementation when the atomic script could not run
    /// and the store fell back to accept-without-guarantee (`spec.md`
    /// §4.F "Fail-open semantics").
    async fn decide(
        &self,
        agent_key: &str,
        idempotency_key: &str,
        fence_token: u64,
        idempotency_ttl: Duration,
    ) -> Result<(FenceDecision, bool), FenceError>;
}

struct AgentState {
    current_fence: u64,
}

/// `tokio::sync::Mutex`-guarded critical section over both the
/// idempotency-key set (with TTL) and the per-agent fence counter, so
/// the whole decision is a single atomic step — mirrors the Redis Lua
/// script's atomicity without an external dependency.
pub struct InMemoryFenceStore {
    inner: Mutex<InMemoryState>,
}

struct InMemoryState {
    idempotency: HashMap<String, Instant>,
    agents: HashMap<String, AgentState>,
}

impl InMemoryFenceStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(InMemoryState {
                idempotency: HashMap::new(),
                agents: HashMap::new(),
            }),
        }
    }
}

impl Default for InMemoryFenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FenceStore for InMemoryFenceStore {
    async fn decide(
        &self,
        agent_key: &str,
        idempotency_key: &str,
        fence_token: u64,
        idempotency_ttl: Duration,
    ) -> Result<(FenceDecision, bool), FenceError> {
        let mut state = self.inner.lock().await;
        let now = Instant::now();
        state.idempotency.retain(|_, seen_at| now.duration_since(*seen_at) < idempotency_ttl);

        if state.idempotency.contains_key(idempotency_key) {
            return Ok((FenceDecision::Duplicate, false));
        }

        let current_fence = state.agents.get(agent_key).map(|a| a.current_fence).unwrap_or(0);
        if fence_token < current_fence {
            return Ok((
                FenceDecision::Stale {
                    current_fence,
                    received_fence: fence_token,
                },
                false,
            ));
        }

        state.idempotency.insert(idempotency_key.to_string(), now);
        let advanced = fence_token > current_fence;
        if advanced {
            state
                .agents
                .entry(agent_key.to_string())
                .or_insert(AgentState { current_fence: 0 })
                .current_fence = fence_token;
        } else {
            state.agents.entry(agent_key.to_string()).or_insert(AgentState { current_fence });
        }
        Ok((FenceDecision::Accepted { fence_advanced: advanced }, false))
    }
}

/// Lua script executed atomically server-side. `KEYS[1]` is the
/// idempotency key, `KEYS[2]` is the per-agent fence key; `ARGV[1]` is
/// the incoming fence token, `ARGV[2]` the idempotency TTL in
/// milliseconds. Returns `{outcome, current_fence}` where `outcome` is
/// `0` = accepted, `1` = duplicate, `2` = stale.
const FENCE_SCRIPT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
  return {1, tonumber(redis.call("GET", KEYS[2]) or "0")}
end
local current = tonumber(redis.call("GET", KEYS[2]) or "0")
local incoming = tonumber(ARGV[1])
if incoming < current then
  return {2, current}
end
redis.call("SET", KEYS[1], "1", "PX", ARGV[2])
if incoming > current then
  redis.call("SET", KEYS[2], tostring(incoming))
end
return {0, incoming}
"#;

pub struct RedisFenceStore {
    client: redis::Client,
}

impl RedisFenceStore {
    pub fn new(redis_url: &str) -> Result<Self, FenceError> {
        let client = redis::Client::open(redis_url).map_err(|e| FenceError::Redis(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FenceStore for RedisFenceStore {
    async fn decide(
        &self,
        agent_key: &str,
        idempotency_key: &str,
        fence_token: u64,
        idempotency_ttl: Duration,
    ) -> Result<(FenceDecision, bool), FenceError> {
        let mut conn = match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "redis connection unavailable, failing open on fence decision");
                return Ok((FenceDecision::Accepted { fence_advanced: true }, true));
            }
        };

        let fence_key = format!("forgeos:fence:{agent_key}");
        let result: Result<Vec<i64>, redis::RedisError> = redis::Script::new(FENCE_SCRIPT)
            .key(idempotency_key)
            .key(&fence_key)
            .arg(fence_token)
            .arg(idempotency_ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok(values) if values.len() == 2 => {
                let (outcome, current) = (values[0], values[1] as u64);
                let decision = match outcome {
                    1 => FenceDecision::Duplicate,
                    2 => FenceDecision::Stale {
                        current_fence: current,
                        received_fence: fence_token,
                    },
                    _ => FenceDecision::Accepted {
                        fence_advanced: current == fence_token,
                    },
                };
                Ok((decision, false))
            }
            Ok(_) => Err(FenceError::Redis("unexpected script reply shape".to_string())),
            Err(e) => {
                tracing::error!(error = %e, "fence script failed, failing open");
                Ok((FenceDecision::Accepted { fence_advanced: true }, true))
            }
        }
    }
}

pub fn build_fence_store(redis_url: Option<&str>) -> Result<Arc<dyn FenceStore>, FenceError> {
    match redis_url {
        Some(url) => Ok(Arc::new(RedisFenceStore::new(url)?)),
        None => Ok(Arc::new(InMemoryFenceStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_fence_and_idempotency_accepted_once() {
        let store = InMemoryFenceStore::new();
        let ttl = Duration::from_secs(60);
        let (d1, _) = store.decide("u1:a1", "e1", 5, ttl).await.unwrap();
        assert_eq!(d1, FenceDecision::Accepted { fence_advanced: true });

        let (d2, _) = store.decide("u1:a1", "e2", 3, ttl).await.unwrap();
        assert_eq!(
            d2,
            FenceDecision::Stale {
                current_fence: 5,
                received_fence: 3
            }
        );
    }

    #[tokio::test]
    async fn repeated_idempotency_key_is_always_duplicate() {
        let store = InMemoryFenceStore::new();
        let ttl = Duration::from_secs(60);
        let (d1, _) = store.decide("u1:a1", "e1", 1, ttl).await.unwrap();
        assert!(matches!(d1, FenceDecision::Accepted { .. }));
        let (d2, _) = store.decide("u1:a1", "e1", 1, ttl).await.unwrap();
        assert_eq!(d2, FenceDecision::Duplicate);
    }

    #[tokio::test]
    async fn fence_is_monotonic_per_agent() {
        let store = InMemoryFenceStore::new();
        let ttl = Duration::from_secs(60);
        store.decide("u1:a1", "e1", 5, ttl).await.unwrap();
        store.decide("u1:a1", "e2", 7, ttl).await.unwrap();
        let (d, _) = store.decide("u1:a1", "e3", 6, ttl).await.unwrap();
        assert_eq!(
            d,
            FenceDecision::Stale {
                current_fence: 7,
                received_fence: 6
            }
        );
    }

    #[tokio::test]
    async fn idempotency_expires_after_ttl() {
        let store = InMemoryFenceStore::new();
        let ttl = Duration::from_millis(10);
        store.decide("u1:a1", "e1", 1, ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (d, _) = store.decide("u1:a1", "e1", 1, ttl).await.unwrap();
        assert!(matches!(d, FenceDecision::Accepted { .. }));
    }
}
