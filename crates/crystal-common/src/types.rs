//! Core type definitions for Crystal
//!
//! This module defines the data model shared by both tiers: pipeline keys,
//! execution records and the metadata persisted alongside transformed objects.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Service tier that can run a filter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Front tier, first to see every request
    Proxy,
    /// Back tier holding the object bytes
    #[serde(alias = "object")]
    StorageNode,
}

impl Tier {
    /// Wire/config name of the tier
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::StorageNode => "storage-node",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a tier name is not recognised
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown execution tier: {0}")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proxy" => Ok(Self::Proxy),
            "storage-node" | "storage_node" | "object" => Ok(Self::StorageNode),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

/// Hierarchical `account/container/object` key used to look up filter chains
#[derive(Clone, Debug, PartialEq, Eq, Hash, Display)]
#[display("{account}/{container}/{object}")]
pub struct PipelineKey {
    pub account: String,
    pub container: String,
    pub object: String,
}

impl PipelineKey {
    /// Create a new pipeline key
    pub fn new(
        account: impl Into<String>,
        container: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            object: object.into(),
        }
    }

    /// Lookup targets from most to least specific: object, container, account.
    #[must_use]
    pub fn levels(&self) -> [String; 3] {
        [
            format!("{}/{}/{}", self.account, self.container, self.object),
            format!("{}/{}", self.account, self.container),
            self.account.clone(),
        ]
    }
}

/// One filter scheduled to run, in write execution order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Position in the write-time execution order (0-based)
    pub index: usize,
    /// Filter name as listed in the pipeline
    #[serde(rename = "filter")]
    pub filter_name: String,
    /// Filter id referencing its generic metadata
    #[serde(rename = "id")]
    pub filter_id: String,
    /// Opaque parameter blob handed to the filter
    #[serde(default)]
    pub params: String,
    /// Tier running the filter on the write path
    #[serde(rename = "execution_server")]
    pub execution_tier: Tier,
    /// Tier running the inverse of the filter on the read path
    #[serde(rename = "execution_server_reverse")]
    pub reverse_tier: Tier,
}

/// Direction a filter is applied in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Apply the transformation
    Forward,
    /// Undo a transformation applied on write
    Reverse,
}

/// An execution record together with the direction it runs in
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledFilter {
    #[serde(flatten)]
    pub record: ExecutionRecord,
    pub mode: ExecutionMode,
}

impl ScheduledFilter {
    /// Schedule a record in forward mode
    #[must_use]
    pub const fn forward(record: ExecutionRecord) -> Self {
        Self {
            record,
            mode: ExecutionMode::Forward,
        }
    }

    /// Schedule a record in reverse mode
    #[must_use]
    pub const fn reverse(record: ExecutionRecord) -> Self {
        Self {
            record,
            mode: ExecutionMode::Reverse,
        }
    }

    /// Tier that runs this filter in its scheduled mode
    #[must_use]
    pub const fn tier(&self) -> Tier {
        match self.mode {
            ExecutionMode::Forward => self.record.execution_tier,
            ExecutionMode::Reverse => self.record.reverse_tier,
        }
    }

    /// Filter name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.record.filter_name
    }
}

/// Number of leading filters that run on `tier` before a filter for another tier.
///
/// Filters must run in list order, so a tier can only take a prefix.
#[must_use]
pub fn leading_run(filters: &[ScheduledFilter], tier: Tier) -> usize {
    filters.iter().take_while(|f| f.tier() == tier).count()
}

/// Metadata persisted with a transformed object so reads can undo the transformation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectExecutionMetadata {
    /// Checksum of the content as the client sent it
    pub original_etag: String,
    /// Size of the content as the client sent it
    pub original_size: u64,
    /// Write-time records, in execution order
    pub records: Vec<ExecutionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, name: &str, tier: Tier, reverse: Tier) -> ExecutionRecord {
        ExecutionRecord {
            index,
            filter_name: name.to_string(),
            filter_id: index.to_string(),
            params: String::new(),
            execution_tier: tier,
            reverse_tier: reverse,
        }
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("proxy".parse::<Tier>().unwrap(), Tier::Proxy);
        assert_eq!("object".parse::<Tier>().unwrap(), Tier::StorageNode);
        assert_eq!(" Storage-Node ".parse::<Tier>().unwrap(), Tier::StorageNode);
        assert!("compute".parse::<Tier>().is_err());
    }

    #[test]
    fn test_tier_serde_alias() {
        let tier: Tier = serde_json::from_str("\"object\"").unwrap();
        assert_eq!(tier, Tier::StorageNode);
        assert_eq!(
            serde_json::to_string(&Tier::StorageNode).unwrap(),
            "\"storage-node\""
        );
    }

    #[test]
    fn test_pipeline_key_levels() {
        let key = PipelineKey::new("AUTH_a", "photos", "2024/beach.jpg");
        assert_eq!(
            key.levels(),
            [
                "AUTH_a/photos/2024/beach.jpg".to_string(),
                "AUTH_a/photos".to_string(),
                "AUTH_a".to_string(),
            ]
        );
        assert_eq!(key.to_string(), "AUTH_a/photos/2024/beach.jpg");
    }

    #[test]
    fn test_scheduled_filter_tier() {
        let rec = record(0, "compress", Tier::Proxy, Tier::StorageNode);
        assert_eq!(ScheduledFilter::forward(rec.clone()).tier(), Tier::Proxy);
        assert_eq!(ScheduledFilter::reverse(rec).tier(), Tier::StorageNode);
    }

    #[test]
    fn test_leading_run_stops_at_other_tier() {
        let filters = vec![
            ScheduledFilter::forward(record(0, "a", Tier::StorageNode, Tier::StorageNode)),
            ScheduledFilter::forward(record(1, "b", Tier::Proxy, Tier::Proxy)),
            ScheduledFilter::forward(record(2, "c", Tier::StorageNode, Tier::StorageNode)),
        ];
        assert_eq!(leading_run(&filters, Tier::StorageNode), 1);
        assert_eq!(leading_run(&filters, Tier::Proxy), 0);
        assert_eq!(leading_run(&[], Tier::Proxy), 0);
    }

    #[test]
    fn test_record_wire_names() {
        let json = serde_json::to_value(record(3, "encrypt", Tier::Proxy, Tier::Proxy)).unwrap();
        assert_eq!(json["filter"], "encrypt");
        assert_eq!(json["execution_server"], "proxy");
        assert_eq!(json["execution_server_reverse"], "proxy");
        assert_eq!(json["index"], 3);
    }
}
