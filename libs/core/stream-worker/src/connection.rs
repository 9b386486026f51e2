//! Broker connection establishment.

use crate::health::LivenessFile;
use crate::metrics;
use redis::Client;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{info, warn};

/// Delay between connection attempts while the broker is unreachable.
const RECONNECT_PAUSE: Duration = Duration::from_secs(2);

/// Connect to Redis, retrying forever until a PING succeeds.
///
/// The worker is useless without its broker, so startup blocks here with
/// no attempt cap. Each failed attempt logs a warning, flips the
/// `redis_connected` gauge to 0, and touches the liveness file so the
/// supervisor keeps the pod alive while the broker comes up.
pub async fn connect_with_unbounded_retry(url: &str, liveness: &LivenessFile) -> ConnectionManager {
    loop {
        match try_connect(url).await {
            Ok(manager) => {
                info!("Connected to Redis");
                metrics::set_redis_connected(true);
                return manager;
            }
            Err(e) => {
                warn!(error = %e, "Waiting for Redis...");
                metrics::set_redis_connected(false);
                liveness.touch();
                tokio::time::sleep(RECONNECT_PAUSE).await;
            }
        }
    }
}

/// Connect once and verify the connection with PING.
pub async fn try_connect(url: &str) -> Result<ConnectionManager, redis::RedisError> {
    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_connect_rejects_malformed_url() {
        let result = try_connect("not-a-redis-url").await;
        assert!(result.is_err());
    }
}
