//! Politeness spacing between hits on the same directory.
//!
//! Each directory's rate-limit class sets the minimum gap between two
//! requests to it. In a single process a keyed `governor` limiter per class
//! enforces the gap; across worker processes Redis books the next free slot.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultKeyedRateLimiter, Quota};
use redis::Script;

use crate::models::directory::RateLimitClass;

const KEY_PREFIX: &str = "directory_dispatch:ratelimit:";
/// Idle directories expire from Redis after a day.
const KEY_TTL_SECS: i64 = 86_400;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until `directory_id` may be hit again under `class`.
    async fn wait_turn(
        &self,
        directory_id: &str,
        class: RateLimitClass,
    ) -> Result<(), RateLimitError>;
}

/// Per-process limiter. Enough when a single worker process runs.
pub struct MemoryRateLimiter {
    relaxed: DefaultKeyedRateLimiter<String>,
    standard: DefaultKeyedRateLimiter<String>,
    strict: DefaultKeyedRateLimiter<String>,
    throttled: DefaultKeyedRateLimiter<String>,
}

/// One request per `min_interval`, no burst.
fn class_quota(class: RateLimitClass) -> Quota {
    Quota::with_period(class.min_interval())
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self {
            relaxed: governor::RateLimiter::keyed(class_quota(RateLimitClass::Relaxed)),
            standard: governor::RateLimiter::keyed(class_quota(RateLimitClass::Standard)),
            strict: governor::RateLimiter::keyed(class_quota(RateLimitClass::Strict)),
            throttled: governor::RateLimiter::keyed(class_quota(RateLimitClass::Throttled)),
        }
    }

    fn limiter(&self, class: RateLimitClass) -> &DefaultKeyedRateLimiter<String> {
        match class {
            RateLimitClass::Relaxed => &self.relaxed,
            RateLimitClass::Standard => &self.standard,
            RateLimitClass::Strict => &self.strict,
            RateLimitClass::Throttled => &self.throttled,
        }
    }
}

impl Default for MemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn wait_turn(
        &self,
        directory_id: &str,
        class: RateLimitClass,
    ) -> Result<(), RateLimitError> {
        let key = directory_id.to_string();
        let limiter = self.limiter(class);
        if limiter.check_key(&key).is_err() {
            tracing::debug!(
                directory_id = %directory_id,
                class = %class,
                "Waiting for directory rate limit"
            );
            limiter.until_key_ready(&key).await;
        }
        Ok(())
    }
}

/// Limiter shared by every worker process through Redis.
pub struct RedisRateLimiter {
    client: redis::Client,
    script: Script,
}

impl RedisRateLimiter {
    pub fn new(redis_url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(redis_url)?;
        // Stores the next free slot (epoch ms) per directory and returns the
        // wait until the caller's slot.
        let script = Script::new(
            r#"
            local now_ms = tonumber(ARGV[1])
            local interval_ms = tonumber(ARGV[2])
            local next_slot = tonumber(redis.call('GET', KEYS[1])) or 0
            local slot = math.max(now_ms, next_slot)
            redis.call('SET', KEYS[1], slot + interval_ms, 'EX', ARGV[3])
            return slot - now_ms
        "#,
        );
        Ok(Self { client, script })
    }

    fn key(directory_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, directory_id)
    }

    /// Book the next slot for `directory_id`, returning the wait until it.
    pub async fn reserve(
        &self,
        directory_id: &str,
        min_interval: Duration,
    ) -> Result<Duration, RateLimitError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let wait_ms: i64 = self
            .script
            .key(Self::key(directory_id))
            .arg(now_ms)
            .arg(min_interval.as_millis() as i64)
            .arg(KEY_TTL_SECS)
            .invoke_async(&mut conn)
            .await?;
        Ok(Duration::from_millis(wait_ms.max(0) as u64))
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), RateLimitError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn wait_turn(
        &self,
        directory_id: &str,
        class: RateLimitClass,
    ) -> Result<(), RateLimitError> {
        let wait = self.reserve(directory_id, class.min_interval()).await?;
        if !wait.is_zero() {
            tracing::debug!(
                directory_id = %directory_id,
                wait_ms = wait.as_millis() as u64,
                "Waiting for directory rate limit"
            );
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_second_hit_must_wait() {
        let limiter = MemoryRateLimiter::new();
        let key = "dir-a".to_string();
        let standard = limiter.limiter(RateLimitClass::Standard);

        assert!(standard.check_key(&key).is_ok());
        assert!(standard.check_key(&key).is_err());
    }

    #[test]
    fn test_directories_are_independent() {
        let limiter = MemoryRateLimiter::new();
        let strict = limiter.limiter(RateLimitClass::Strict);

        assert!(strict.check_key(&"dir-a".to_string()).is_ok());
        assert!(strict.check_key(&"dir-b".to_string()).is_ok());
    }

    #[test]
    fn test_classes_are_independent() {
        let limiter = MemoryRateLimiter::new();
        let key = "dir-a".to_string();

        assert!(limiter.limiter(RateLimitClass::Strict).check_key(&key).is_ok());
        assert!(limiter.limiter(RateLimitClass::Relaxed).check_key(&key).is_ok());
    }

    #[tokio::test]
    async fn test_wait_turn_spaces_hits() {
        let limiter = MemoryRateLimiter::new();
        let start = Instant::now();

        limiter.wait_turn("dir-a", RateLimitClass::Relaxed).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));

        limiter.wait_turn("dir-a", RateLimitClass::Relaxed).await.unwrap();
        assert!(
            start.elapsed() >= Duration::from_millis(900),
            "second hit came after {:?}",
            start.elapsed()
        );
    }
}
