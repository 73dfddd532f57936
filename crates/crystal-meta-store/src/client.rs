//! Metadata client contract

use crate::error::MetaStoreResult;
use async_trait::async_trait;
use std::collections::HashMap;

/// Field/value pairs of a hash entry
pub type FieldMap = HashMap<String, String>;

/// Read access to the shared metadata store.
///
/// Implementations must distinguish a missing key from a failed lookup:
/// failures are errors, never empty results.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Client name for logging
    fn name(&self) -> &str;

    /// Full contents of a list, or `None` if the key does not exist
    async fn list(&self, key: &str) -> MetaStoreResult<Option<Vec<String>>>;

    /// All fields of a hash; empty if the key does not exist
    async fn hash(&self, key: &str) -> MetaStoreResult<FieldMap>;
}
