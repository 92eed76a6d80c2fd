use crate::server_config::RedisConfig;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config as DeadConfig, Pool};

#[derive(Clone)]
pub struct RedisHelper {
    pool: Pool,
}

impl RedisHelper {
    pub fn new(config: &RedisConfig) -> Result<Self, redis::RedisError> {
        let dead_cfg = DeadConfig::from_url(config.url.clone());
        let pool = dead_cfg
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| {
                redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "Pool creation failed",
                    e.to_string(),
                ))
            })?;
        Ok(RedisHelper { pool })
    }

    async fn get_connection(&self) -> Result<deadpool_redis::Connection, redis::RedisError> {
        self.pool.get().await.map_err(|e| {
            redis::RedisError::from((
                redis::ErrorKind::IoError,
                "Failed to get Redis connection",
                e.to_string(),
            ))
        })
    }

    async fn set_key_value_expire(
        &self,
        key: &str,
        txt: &str,
        expire_seconds: u64,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.get_connection().await?;
        conn.set_ex::<_, _, ()>(key, txt, expire_seconds).await
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.get_connection().await?;
        conn.get(key).await
    }

    const PUBLIC_KEYS_KEY: &'static str = "firebase:session-public-keys";

    pub async fn set_public_keys(
        &self,
        document: &str,
        expire_seconds: u64,
    ) -> Result<(), redis::RedisError> {
        self.set_key_value_expire(Self::PUBLIC_KEYS_KEY, document, expire_seconds)
            .await
    }

    pub async fn get_public_keys(&self) -> Result<Option<String>, redis::RedisError> {
        self.get_value(Self::PUBLIC_KEYS_KEY).await
    }

    pub fn key_for_rate_limit(policy: &str, client: &str) -> String {
        format!("ratelimit:{}:{}", policy, client)
    }

    /// Increment the fixed-window counter of `policy` for `client` and return the new count.
    /// The window starts with the first hit.
    pub async fn hit_rate_limit(
        &self,
        policy: &str,
        client: &str,
        window_seconds: u64,
    ) -> Result<u64, redis::RedisError> {
        let key = Self::key_for_rate_limit(policy, client);
        let mut conn = self.get_connection().await?;
        let count: u64 = conn.incr(&key, 1u64).await?;
        if count == 1 {
            conn.expire::<_, ()>(&key, window_seconds as i64).await?;
        }
        Ok(count)
    }
}
