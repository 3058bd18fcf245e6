//! Plain idempotency-key dedup, distinct from [`super::fence::FenceStore`]
//! which additionally orders by fence token. Execution receipts have no
//! ordering requirement — `spec.md` §4.F: "Idempotency-keyed by
//! `receipt:<txid>` unless caller supplies a key... On duplicate, return
//! 200 with `duplicate:true` and do not update."

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    /// Returns `true` if `key` was not previously seen within `ttl`
    /// (and is now recorded), `false` if it is a duplicate.
    async fn check_and_set(&self, key: &str, ttl: Duration) -> bool;
}

#[derive(Default)]
pub struct InMemoryIdempotencyGuard {
    seen: Mutex<HashMap<String, Instant>>,
}

impl InMemoryIdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyGuard for InMemoryIdempotencyGuard {
    async fn check_and_set(&self, key: &str, ttl: Duration) -> bool {
        let mut seen = self.seen.lock().await;
        let now = Instant::now();
        seen.retain(|_, seen_at| now.duration_since(*seen_at) < ttl);
        if seen.contains_key(key) {
            return false;
        }
        seen.insert(key.to_string(), now);
        true
    }
}

pub struct RedisIdempotencyGuard {
    client: redis::Client,
}

impl RedisIdempotencyGuard {
    pub fn new(redis_url: &str) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }
}

#[async_trait]
impl IdempotencyGuard for RedisIdempotencyGuard {
    async fn check_and_set(&self, key: &str, ttl: Duration) -> bool {
        let mut conn = match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "redis connection unavailable, failing open on idempotency check");
                return true;
            }
        };
        let result: Result<bool, redis::RedisError> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map(|reply: Option<String>| reply.is_some());
        match result {
            Ok(was_new) => was_new,
            Err(e) => {
                tracing::error!(error = %e, "idempotency SET NX failed, failing open");
                true
            }
        }
    }
}

pub fn build_idempotency_guard(redis_url: Option<&str>) -> Arc<dyn IdempotencyGuard> {
    match redis_url {
        Some(url) => match RedisIdempotencyGuard::new(url) {
            Ok(guard) => Arc::new(guard),
            Err(e) => {
                tracing::error!(error = %e, "failed to build redis idempotency guard, falling back to in-memory");
                Arc::new(InMemoryIdempotencyGuard::new())
            }
        },
        None => Arc::new(InMemoryIdempotencyGuard::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_use_of_a_key_is_accepted() {
        let guard = InMemoryIdempotencyGuard::new();
        assert!(guard.check_and_set("k1", Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn repeated_key_is_duplicate() {
        let guard = InMemoryIdempotencyGuard::new();
        assert!(guard.check_and_set("k1", Duration::from_secs(60)).await);
        assert!(!guard.check_and_set("k1", Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn key_usable_again_after_ttl() {
        let guard = InMemoryIdempotencyGuard::new();
        let ttl = Duration::from_millis(10);
        assert!(guard.check_and_set("k1", ttl).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(guard.check_and_set("k1", ttl).await);
    }
}
