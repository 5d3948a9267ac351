use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::cache::BasicCache;
use crate::error::{EngineError, Result};

/// Redis-backed Basic cache. Atomicity for create-if-absent comes from the
/// external lock provider paired with it in
/// [`AccessCache::basic`](crate::cache::AccessCache::basic).
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn from_url(url: &str) -> Result<Self> {
        Ok(Self::new(redis::Client::open(url).map_err(EngineError::Redis)?))
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(EngineError::Redis)
    }
}

#[async_trait]
impl BasicCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(EngineError::Redis)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(EngineError::Redis)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.del(key).await.map_err(EngineError::Redis)?;
        Ok(())
    }
}
