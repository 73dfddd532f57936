//! Filter chain resolution
//!
//! Chains may be registered for an object, a container or an account. The
//! most specific registration wins; chains from different levels are never
//! merged.

use crystal_common::{PipelineKey, Result};
use crystal_meta_store::{MetadataClient, keys};
use tracing::debug;

/// The chain that applies to a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPipeline {
    /// Target the chain was registered for (`a`, `a/c` or `a/c/o`)
    pub target: String,
    /// Filter names in execution order
    pub filters: Vec<String>,
}

/// Looks up filter chains in the metadata store
pub struct PipelineResolver<'a> {
    store: &'a dyn MetadataClient,
}

impl<'a> PipelineResolver<'a> {
    pub fn new(store: &'a dyn MetadataClient) -> Self {
        Self { store }
    }

    /// Resolve the chain for `key`, or `None` if no level has one.
    ///
    /// Store failures are returned as errors, never as "no chain".
    pub async fn resolve(&self, key: &PipelineKey) -> Result<Option<ResolvedPipeline>> {
        for target in key.levels() {
            let Some(mut filters) = self.store.list(&keys::pipeline(&target)).await? else {
                continue;
            };
            // Stored head-first
            filters.reverse();
            debug!("Resolved filter chain for {} at {}: {:?}", key, target, filters);
            return Ok(Some(ResolvedPipeline { target, filters }));
        }

        debug!("No filter chain for {}", key);
        Ok(None)
    }
}
