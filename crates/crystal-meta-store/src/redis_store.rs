//! Redis-backed metadata store

use crate::client::{FieldMap, MetadataClient};
use crate::error::MetaStoreResult;
use async_trait::async_trait;
use crystal_common::MetadataStoreConfig;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info};

/// Metadata store client over a multiplexed Redis connection.
///
/// The connection is opened once at start-up and cloned per call.
#[derive(Clone)]
pub struct RedisMetadataStore {
    conn: MultiplexedConnection,
}

impl RedisMetadataStore {
    /// Connect using the configured host, port and database
    pub async fn connect(config: &MetadataStoreConfig) -> MetaStoreResult<Self> {
        let url = config.url();
        let client = redis::Client::open(url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to metadata store at {}", url);
        Ok(Self { conn })
    }
}

#[async_trait]
impl MetadataClient for RedisMetadataStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn list(&self, key: &str) -> MetaStoreResult<Option<Vec<String>>> {
        let mut conn = self.conn.clone();
        let (exists, values): (bool, Vec<String>) = redis::pipe()
            .atomic()
            .exists(key)
            .lrange(key, 0, -1)
            .query_async(&mut conn)
            .await?;
        debug!("LRANGE {} -> exists={}, {} values", key, exists, values.len());
        Ok(exists.then_some(values))
    }

    async fn hash(&self, key: &str) -> MetaStoreResult<FieldMap> {
        let mut conn = self.conn.clone();
        let fields: FieldMap = conn.hgetall(key).await?;
        Ok(fields)
    }
}
