//! Proxy tier orchestration
//!
//! On PUT the proxy builds the execution list, records the original checksum
//! and size, runs the leading proxy-tier filters and delegates the rest to the
//! storage node. On GET it forwards the list and runs every filter the
//! storage node hands back as pending.

use crate::body;
use crate::layer::FilterLayer;
use crate::metrics::RequestOutcome;
use axum::body::Body;
use axum::http::{HeaderValue, Request, header};
use axum::response::Response;
use crystal_common::{
    ExecutionRecord, ObjectExecutionMetadata, RequestContext, Result, ScheduledFilter, Tier, Verb,
    leading_run,
};
use crystal_pipeline::{FilterMetadata, codec};
use std::future::Future;
use tracing::debug;

pub(crate) async fn handle<F, Fut>(
    layer: &FilterLayer,
    ctx: &RequestContext,
    request: Request<Body>,
    downstream: F,
) -> Result<(Response, RequestOutcome)>
where
    F: FnOnce(Request<Body>) -> Fut + Send,
    Fut: Future<Output = Response> + Send,
{
    match ctx.verb() {
        Verb::Put => put(layer, ctx, request, downstream).await,
        Verb::Get => get(layer, ctx, request, downstream).await,
        Verb::Head | Verb::Other => {
            debug!("Method {} not handled on the proxy", ctx.method());
            Ok((downstream(request).await, RequestOutcome::Passthrough))
        }
    }
}

async fn put<F, Fut>(
    layer: &FilterLayer,
    ctx: &RequestContext,
    request: Request<Body>,
    downstream: F,
) -> Result<(Response, RequestOutcome)>
where
    F: FnOnce(Request<Body>) -> Fut + Send,
    Fut: Future<Output = Response> + Send,
{
    let Some(plan) = layer.plan(ctx).await? else {
        return Ok((downstream(request).await, RequestOutcome::Passthrough));
    };

    let (mut parts, body) = request.into_parts();
    let payload = body::collect(body, layer.config().max_body_bytes).await?;

    let original_etag = ctx
        .header_str(header::ETAG.as_str())
        .map(|etag| etag.trim().trim_matches('"').to_string())
        .filter(|etag| !etag.is_empty())
        .unwrap_or_else(|| format!("{:x}", md5::compute(&payload)));
    let executed = ObjectExecutionMetadata {
        original_etag,
        original_size: payload.len() as u64,
        records: plan.records,
    };

    // The stored bytes will not match the client checksum
    parts.headers.remove(header::ETAG);
    codec::insert_executed(&mut parts.headers, &executed)?;

    let scheduled: Vec<ScheduledFilter> = executed
        .records
        .iter()
        .cloned()
        .map(ScheduledFilter::forward)
        .collect();
    let (local, delegated) = scheduled.split_at(leading_run(&scheduled, Tier::Proxy));

    let payload = if local.is_empty() {
        payload
    } else {
        layer.execute(ctx, local, &plan.metadata, payload).await?
    };

    if !delegated.is_empty() {
        debug!(
            "Delegating {} filters for {} to the storage node",
            delegated.len(),
            ctx.pipeline_key()
        );
        parts
            .headers
            .insert(codec::EXEC_LIST_HEADER, codec::encode_records(&records_of(delegated))?);
    }

    body::set_length(&mut parts.headers, payload.len());
    let response = downstream(Request::from_parts(parts, Body::from(payload))).await;
    Ok((response, RequestOutcome::Filtered))
}

async fn get<F, Fut>(
    layer: &FilterLayer,
    ctx: &RequestContext,
    request: Request<Body>,
    downstream: F,
) -> Result<(Response, RequestOutcome)>
where
    F: FnOnce(Request<Body>) -> Fut + Send,
    Fut: Future<Output = Response> + Send,
{
    let proxy_only = layer.config().execute_on_proxy_only;
    let mut metadata = FilterMetadata::new();
    let mut outcome = RequestOutcome::Passthrough;

    let (mut parts, body) = request.into_parts();
    if let Some(plan) = layer.plan(ctx).await? {
        parts
            .headers
            .insert(codec::EXEC_LIST_HEADER, codec::encode_records(&plan.records)?);
        metadata = plan.metadata;
        outcome = RequestOutcome::Filtered;
    }
    if proxy_only {
        parts
            .headers
            .insert(codec::PROXY_ONLY_HEADER, HeaderValue::from_static("true"));
    }

    let response = downstream(Request::from_parts(parts, body)).await;
    if !response.headers().contains_key(&codec::PENDING_HEADER) {
        return Ok((response, outcome));
    }

    let (mut parts, body) = response.into_parts();
    let pending = codec::take_pending(&mut parts.headers)?.unwrap_or_default();

    debug!(
        "Running {} filters left pending by the storage node for {}",
        pending.len(),
        ctx.pipeline_key()
    );
    let records = records_of(&pending);
    layer.builder().load_generic(&records, &mut metadata).await?;

    let payload = body::collect(body, layer.config().max_body_bytes).await?;
    let payload = layer.execute(ctx, &pending, &metadata, payload).await?;
    body::set_length(&mut parts.headers, payload.len());

    Ok((Response::from_parts(parts, Body::from(payload)), RequestOutcome::Filtered))
}

fn records_of(filters: &[ScheduledFilter]) -> Vec<ExecutionRecord> {
    filters.iter().map(|f| f.record.clone()).collect()
}
