//! Filter execution seam
//!
//! The orchestrators never run filters themselves. They hand an ordered list
//! of scheduled filters and the payload to a [`FilterGateway`], which returns
//! the transformed payload.

use async_trait::async_trait;
use bytes::Bytes;
use crystal_common::{RequestContext, Result, ScheduledFilter, Tier};
use crystal_pipeline::FilterMetadata;

/// One call into the filter engine
#[derive(Clone, Copy, Debug)]
pub struct FilterInvocation<'a> {
    pub context: &'a RequestContext,
    /// Tier the filters run on
    pub tier: Tier,
    /// Filters to apply, in order
    pub filters: &'a [ScheduledFilter],
    /// Merged metadata per filter name
    pub metadata: &'a FilterMetadata,
}

impl FilterInvocation<'_> {
    /// Names of the scheduled filters, in order
    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(ScheduledFilter::name).collect()
    }
}

/// Filter execution engine
#[async_trait]
pub trait FilterGateway: Send + Sync {
    /// Gateway name
    fn name(&self) -> &str;

    /// Apply `invocation.filters` in order to `payload`.
    ///
    /// The gateway is responsible for enforcing the execution timeout.
    async fn execute(&self, invocation: FilterInvocation<'_>, payload: Bytes) -> Result<Bytes>;
}
