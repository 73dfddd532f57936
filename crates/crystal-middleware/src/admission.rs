//! Admission control hook for object writes

use crate::metrics::filter_metrics;
use async_trait::async_trait;
use crystal_common::{RequestContext, Result};
use tracing::debug;

/// Registers writes with a bandwidth controller before they are stored
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    fn name(&self) -> &str;

    /// Register a PUT for `ctx.account()`
    async fn register(&self, ctx: &RequestContext) -> Result<()>;
}

/// Counts registrations per account in the process metrics
#[derive(Clone, Copy, Debug, Default)]
pub struct MeteredAdmission;

#[async_trait]
impl AdmissionControl for MeteredAdmission {
    fn name(&self) -> &str {
        "metered"
    }

    async fn register(&self, ctx: &RequestContext) -> Result<()> {
        debug!("Registering PUT {} for admission control", ctx.pipeline_key());
        filter_metrics().record_admission(ctx.account());
        Ok(())
    }
}
