//! Extended object metadata persistence

use async_trait::async_trait;
use crystal_common::{ObjectExecutionMetadata, RequestContext, Result};

/// Persists [`ObjectExecutionMetadata`] with a stored object
#[async_trait]
pub trait ExtendedMetadataWriter: Send + Sync {
    fn name(&self) -> &str;

    /// Attach `metadata` to the object addressed by `ctx`.
    ///
    /// Called after the object has been stored.
    async fn write(&self, ctx: &RequestContext, metadata: &ObjectExecutionMetadata) -> Result<()>;
}
