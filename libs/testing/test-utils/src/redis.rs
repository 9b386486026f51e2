//! Redis test infrastructure
//!
//! Provides a `TestRedis` helper that runs a throwaway Redis container for
//! integration tests.

use redis::Client;
use redis::aio::ConnectionManager;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

/// Test Redis wrapper that ensures proper cleanup
///
/// The container is automatically stopped and removed when this struct is
/// dropped. Each `TestRedis` is an isolated instance, so tests that mutate
/// streams and sets don't interfere with each other.
///
/// # Example
///
/// ```no_run
/// use test_utils::TestRedis;
/// use redis::AsyncCommands;
///
/// # async fn example() {
/// let redis = TestRedis::new().await;
/// let mut conn = redis.manager().await;
///
/// conn.set::<_, _, ()>("key", "value").await.unwrap();
/// let value: String = conn.get("key").await.unwrap();
/// assert_eq!(value, "value");
/// # }
/// ```
pub struct TestRedis {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    url: String,
}

impl TestRedis {
    /// Start a new Redis container (Redis 8 Alpine).
    pub async fn new() -> Self {
        let redis_image = Redis::default().with_tag("8-alpine");

        let container = redis_image
            .start()
            .await
            .expect("Failed to start Redis container");

        let host_port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        let url = format!("redis://127.0.0.1:{}", host_port);

        tracing::info!(port = host_port, "Test Redis ready (Redis 8-alpine)");

        Self { container, url }
    }

    /// Connection URL for manual client creation.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get a fresh `ConnectionManager`, the connection type the worker
    /// components take. Call repeatedly to simulate multiple workers.
    pub async fn manager(&self) -> ConnectionManager {
        let client = Client::open(self.url.clone()).expect("Failed to create Redis client");
        ConnectionManager::new(client)
            .await
            .expect("Failed to connect to Redis")
    }
}

// Container is automatically cleaned up when TestRedis is dropped
impl Drop for TestRedis {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test Redis container");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::AsyncCommands;

    #[tokio::test]
    async fn test_redis_set_get() {
        let redis = TestRedis::new().await;
        let mut conn = redis.manager().await;

        conn.set::<_, _, ()>("test_key", "test_value").await.unwrap();

        let value: String = conn.get("test_key").await.unwrap();
        assert_eq!(value, "test_value");
    }

    #[tokio::test]
    async fn test_managers_share_the_instance() {
        let redis = TestRedis::new().await;
        let mut writer = redis.manager().await;
        let mut reader = redis.manager().await;

        writer
            .sadd::<_, _, ()>("shared_set", "member")
            .await
            .unwrap();

        let present: bool = reader.sismember("shared_set", "member").await.unwrap();
        assert!(present);
    }

    #[tokio::test]
    async fn test_stream_roundtrip() {
        let redis = TestRedis::new().await;
        let mut conn = redis.manager().await;

        let id: String = redis::cmd("XADD")
            .arg("test_stream")
            .arg("*")
            .arg("note_id")
            .arg("n1")
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(id.contains('-'));

        let len: usize = conn.xlen("test_stream").await.unwrap();
        assert_eq!(len, 1);
    }
}
