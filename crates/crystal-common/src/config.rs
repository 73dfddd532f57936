//! Configuration types for Crystal
//!
//! This module defines the configuration loaded once at start-up and shared
//! read-only by every request.

use crate::types::Tier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration for the filter layer
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tier this process runs as
    pub execution_tier: Tier,
    /// Metadata store connection
    pub metadata_store: MetadataStoreConfig,
    /// Container holding filter definitions
    pub filter_container: String,
    /// Container holding filter dependencies
    pub dependency_container: String,
    /// Default filter execution timeout, enforced by the filter gateway
    pub execution_timeout_secs: u64,
    /// Account prefix of the auth system, handed to the filter gateway
    pub reseller_prefix: String,
    /// Run every pending read-path filter at the proxy
    pub execute_on_proxy_only: bool,
    /// Only run filters for accounts that opted in (`storlet-enabled`)
    pub account_opt_in: bool,
    /// Tier that registers PUTs with admission control, if any
    pub bandwidth_control: Option<Tier>,
    /// Largest object body buffered for filter execution
    pub max_body_bytes: usize,
    /// Auxiliary filter gateway settings, merged verbatim
    pub gateway: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            execution_tier: Tier::StorageNode,
            metadata_store: MetadataStoreConfig::default(),
            filter_container: "storlet".to_string(),
            dependency_container: "dependency".to_string(),
            execution_timeout_secs: 40,
            reseller_prefix: "AUTH".to_string(),
            execute_on_proxy_only: false,
            account_opt_in: false,
            bandwidth_control: None,
            max_body_bytes: 100 * 1024 * 1024, // 100 MB
            gateway: HashMap::new(),
        }
    }
}

impl Config {
    /// Whether `container` holds filter definitions or their dependencies
    #[must_use]
    pub fn is_filter_container(&self, container: &str) -> bool {
        container == self.filter_container || container == self.dependency_container
    }

    /// Filter execution timeout
    #[must_use]
    pub const fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    /// Merge auxiliary gateway settings; later values win
    pub fn merge_gateway<I, K, V>(&mut self, items: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.gateway
            .extend(items.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    /// Whether this tier registers PUT requests with admission control
    #[must_use]
    pub fn registers_bandwidth(&self) -> bool {
        self.bandwidth_control == Some(self.execution_tier)
    }
}

/// Metadata store connection parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataStoreConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
}

impl Default for MetadataStoreConfig {
    fn default() -> Self {
        Self {
            host: "controller".to_string(),
            port: 6379,
            db: 0,
        }
    }
}

impl MetadataStoreConfig {
    /// Connection URL for the store
    #[must_use]
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}
