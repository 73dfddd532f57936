//! Storage node tier orchestration
//!
//! PUT runs the delegated filters before the object is stored and persists
//! the write-time list afterwards. GET undoes the persisted list, applies the
//! delegated one, and returns anything it cannot run to the proxy as pending.

use crate::body;
use crate::layer::FilterLayer;
use crate::metrics::{RequestOutcome, filter_metrics};
use axum::body::Body;
use axum::http::{HeaderMap, Request, header};
use axum::response::Response;
use crystal_common::{
    ExecutionRecord, RequestContext, Result, ScheduledFilter, Tier, Verb, leading_run,
};
use crystal_pipeline::{FilterMetadata, codec};
use std::future::Future;
use tracing::{debug, error, info};

/// Query parameter value asking for a large-object manifest itself
const MANIFEST_QUERY: (&str, &str) = ("multipart-manifest", "get");

/// Response header marking a large-object manifest
const STATIC_LARGE_OBJECT: &str = "x-static-large-object";

fn is_large_object(headers: &HeaderMap) -> bool {
    headers.contains_key(STATIC_LARGE_OBJECT)
}

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
        Verb::Head => head(ctx, request, downstream).await,
        Verb::Other => {
            debug!("Method {} not handled on the storage node", ctx.method());
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
    let (mut parts, body) = request.into_parts();
    let delegated =
        codec::take_records(&mut parts.headers, &codec::EXEC_LIST_HEADER)?.unwrap_or_default();
    let executed = codec::take_executed(&mut parts.headers)?;

    let body = if delegated.is_empty() {
        body
    } else {
        let mut metadata = FilterMetadata::new();
        layer.builder().load_generic(&delegated, &mut metadata).await?;
        let scheduled: Vec<ScheduledFilter> =
            delegated.into_iter().map(ScheduledFilter::forward).collect();

        let payload = body::collect(body, layer.config().max_body_bytes).await?;
        let payload = layer.execute(ctx, &scheduled, &metadata, payload).await?;
        body::set_length(&mut parts.headers, payload.len());
        Body::from(payload)
    };

    if layer.config().registers_bandwidth() {
        layer.admission().register(ctx).await?;
    }

    let mut response = downstream(Request::from_parts(parts, body)).await;

    let Some(executed) = executed else {
        return Ok((response, RequestOutcome::Passthrough));
    };
    if !response.status().is_success() {
        return Ok((response, RequestOutcome::Filtered));
    }

    match layer.writer().write(ctx, &executed).await {
        Ok(()) => debug!(
            "Persisted {} execution records for {}",
            executed.records.len(),
            ctx.pipeline_key()
        ),
        Err(e) => {
            error!("Failed to persist execution metadata for {}: {}", ctx.pipeline_key(), e);
            filter_metrics().record_metadata_write_failure();
        }
    }

    // Clients verify the checksum of what they sent
    response
        .headers_mut()
        .insert(header::ETAG, body::etag_value(&executed.original_etag)?);
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
    let (mut parts, body) = request.into_parts();
    let delegated =
        codec::take_records(&mut parts.headers, &codec::EXEC_LIST_HEADER)?.unwrap_or_default();
    let proxy_only = parts.headers.remove(&codec::PROXY_ONLY_HEADER).is_some();

    let response = downstream(Request::from_parts(parts, body)).await;
    if !response.status().is_success() {
        return Ok((response, RequestOutcome::Passthrough));
    }

    let (mut parts, body) = response.into_parts();
    let persisted: Vec<ExecutionRecord> = match codec::take_object_metadata(&mut parts.headers)? {
        Some(stored) => {
            parts
                .headers
                .insert(header::ETAG, body::etag_value(&stored.original_etag)?);
            stored.records
        }
        None => Vec::new(),
    };

    if persisted.is_empty() && delegated.is_empty() {
        return Ok((Response::from_parts(parts, body), RequestOutcome::Passthrough));
    }

    let (scheduled, metadata) = layer.builder().build_read_list(&persisted, &delegated).await?;

    let defer = proxy_only
        || ctx.is_range_request()
        || ctx.query_param(MANIFEST_QUERY.0) == Some(MANIFEST_QUERY.1)
        || is_large_object(&parts.headers);
    let local_len = if defer {
        0
    } else {
        leading_run(&scheduled, Tier::StorageNode)
    };
    let (local, pending) = scheduled.split_at(local_len);

    let body = if local.is_empty() {
        body
    } else {
        let payload = body::collect(body, layer.config().max_body_bytes).await?;
        let payload = layer.execute(ctx, local, &metadata, payload).await?;
        body::set_length(&mut parts.headers, payload.len());
        Body::from(payload)
    };

    if !pending.is_empty() {
        info!(
            "Returning {} pending filters for {} to the proxy",
            pending.len(),
            ctx.pipeline_key()
        );
        parts
            .headers
            .insert(codec::PENDING_HEADER, codec::encode_scheduled(pending)?);
    }

    Ok((Response::from_parts(parts, body), RequestOutcome::Filtered))
}

async fn head<F, Fut>(
    ctx: &RequestContext,
    request: Request<Body>,
    downstream: F,
) -> Result<(Response, RequestOutcome)>
where
    F: FnOnce(Request<Body>) -> Fut + Send,
    Fut: Future<Output = Response> + Send,
{
    let response = downstream(request).await;
    if !response.status().is_success() {
        return Ok((response, RequestOutcome::Passthrough));
    }

    let (mut parts, body) = response.into_parts();
    let Some(stored) = codec::take_object_metadata(&mut parts.headers)? else {
        return Ok((Response::from_parts(parts, body), RequestOutcome::Passthrough));
    };

    debug!("Restoring original etag and size for {}", ctx.pipeline_key());
    parts
        .headers
        .insert(header::ETAG, body::etag_value(&stored.original_etag)?);
    parts
        .headers
        .insert(header::CONTENT_LENGTH, stored.original_size.into());
    Ok((Response::from_parts(parts, body), RequestOutcome::Filtered))
}
