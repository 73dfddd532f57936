//! Filter layer middleware
//!
//! [`filter_layer`] is the axum entry point. It builds the request context for
//! the configured tier, bypasses requests that must not be filtered, and hands
//! the rest to the proxy or storage-node orchestrator. Every error is turned
//! into one generic 500 here.

use crate::admission::{AdmissionControl, MeteredAdmission};
use crate::gateway::{FilterGateway, FilterInvocation};
use crate::metrics::{RequestOutcome, filter_metrics};
use crate::writer::ExtendedMetadataWriter;
use crate::{node, proxy};
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use crystal_common::{Config, NotApplicable, RequestContext, Result, ScheduledFilter, Tier};
use crystal_meta_store::{MetadataClient, keys};
use crystal_pipeline::filter::is_truthy;
use crystal_pipeline::{
    ExecutionListBuilder, ExecutionPlan, FilterMetadata, PipelineResolver, codec,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Shared state of the filter layer
pub struct FilterLayer {
    config: Config,
    store: Arc<dyn MetadataClient>,
    gateway: Arc<dyn FilterGateway>,
    writer: Arc<dyn ExtendedMetadataWriter>,
    admission: Arc<dyn AdmissionControl>,
}

impl FilterLayer {
    /// Create a layer with the metered admission hook
    pub fn new(
        config: Config,
        store: Arc<dyn MetadataClient>,
        gateway: Arc<dyn FilterGateway>,
        writer: Arc<dyn ExtendedMetadataWriter>,
    ) -> Self {
        let admission: Arc<dyn AdmissionControl> = Arc::new(MeteredAdmission);
        info!(
            "Filter layer on {} tier: store={}, gateway={}, writer={}, admission={}",
            config.execution_tier,
            store.name(),
            gateway.name(),
            writer.name(),
            admission.name()
        );
        Self {
            config,
            store,
            gateway,
            writer,
            admission,
        }
    }

    /// Replace the admission control hook
    #[must_use]
    pub fn with_admission(mut self, admission: Arc<dyn AdmissionControl>) -> Self {
        info!("Admission control: {}", admission.name());
        self.admission = admission;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Tier this layer runs on
    pub fn tier(&self) -> Tier {
        self.config.execution_tier
    }

    pub(crate) fn writer(&self) -> &dyn ExtendedMetadataWriter {
        self.writer.as_ref()
    }

    pub(crate) fn admission(&self) -> &dyn AdmissionControl {
        self.admission.as_ref()
    }

    pub(crate) fn builder(&self) -> ExecutionListBuilder<'_> {
        ExecutionListBuilder::new(self.store.as_ref())
    }

    /// Handle one request, calling `downstream` at most once
    pub async fn handle<F, Fut>(
        &self,
        mut request: Request<Body>,
        downstream: F,
    ) -> Result<(Response, RequestOutcome)>
    where
        F: FnOnce(Request<Body>) -> Fut + Send,
        Fut: Future<Output = Response> + Send,
    {
        let tier = self.tier();
        if tier == Tier::Proxy {
            // Cross-tier headers are only ever set by this layer
            codec::strip_transport_headers(request.headers_mut());
        }

        let ctx = match self.context(&request) {
            Ok(ctx) => ctx,
            Err(NotApplicable) => {
                debug!("{} {} is not an object request", request.method(), request.uri().path());
                return Ok((downstream(request).await, RequestOutcome::Passthrough));
            }
        };

        if self.bypasses(&ctx).await? {
            return Ok((downstream(request).await, RequestOutcome::Bypassed));
        }

        match tier {
            Tier::Proxy => proxy::handle(self, &ctx, request, downstream).await,
            Tier::StorageNode => node::handle(self, &ctx, request, downstream).await,
        }
    }

    fn context(
        &self,
        request: &Request<Body>,
    ) -> std::result::Result<RequestContext, NotApplicable> {
        let (method, uri, headers) = (request.method(), request.uri(), request.headers());
        match self.tier() {
            Tier::Proxy => {
                RequestContext::from_proxy_path(method, uri.path(), uri.query(), headers)
            }
            Tier::StorageNode => {
                RequestContext::from_node_path(method, uri.path(), uri.query(), headers)
            }
        }
    }

    async fn bypasses(&self, ctx: &RequestContext) -> Result<bool> {
        if self.config.is_filter_container(ctx.container()) {
            debug!("{} targets a filter container, bypassing", ctx.pipeline_key());
            return Ok(true);
        }

        if self.tier() == Tier::Proxy && self.config.account_opt_in {
            let account = self.store.hash(&keys::account(ctx.account())).await?;
            let enabled = account
                .get(keys::ACCOUNT_ENABLED_FIELD)
                .is_some_and(|v| is_truthy(v));
            if !enabled {
                debug!("Filters not enabled for account {}, bypassing", ctx.account());
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Resolve the chain and build the write-path list; `None` when nothing applies
    pub(crate) async fn plan(&self, ctx: &RequestContext) -> Result<Option<ExecutionPlan>> {
        let resolver = PipelineResolver::new(self.store.as_ref());
        let Some(pipeline) = resolver.resolve(&ctx.pipeline_key()).await? else {
            return Ok(None);
        };

        let plan = self.builder().build(&pipeline, ctx).await?;
        if plan.is_empty() {
            debug!("No eligible filters for {} {}", ctx.method(), ctx.pipeline_key());
            return Ok(None);
        }
        Ok(Some(plan))
    }

    /// Run `filters` over `payload` through the filter gateway
    pub(crate) async fn execute(
        &self,
        ctx: &RequestContext,
        filters: &[ScheduledFilter],
        metadata: &FilterMetadata,
        payload: Bytes,
    ) -> Result<Bytes> {
        let tier = self.tier();
        let invocation = FilterInvocation {
            context: ctx,
            tier,
            filters,
            metadata,
        };
        info!(
            "Executing filters {:?} on {} for {} {}",
            invocation.filter_names(),
            tier,
            ctx.method(),
            ctx.pipeline_key()
        );

        let bytes_in = payload.len() as u64;
        let start = Instant::now();
        let result = self.gateway.execute(invocation, payload).await;
        filter_metrics().record_execution(
            tier,
            filters,
            result.is_ok(),
            bytes_in,
            start.elapsed().as_micros() as u64,
        );
        result
    }
}

/// Filter layer middleware function
pub async fn filter_layer(
    State(layer): State<Arc<FilterLayer>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let tier = layer.tier();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match layer.handle(request, |req| next.run(req)).await {
        Ok((response, outcome)) => {
            filter_metrics().record_request(tier, outcome);
            response
        }
        Err(e) => {
            error!("Filter layer failed for {} {}: {}", method, path, e);
            filter_metrics().record_request(tier, RequestOutcome::Failed);
            let status = StatusCode::from_u16(e.http_status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, "Filter execution failed").into_response()
        }
    }
}
