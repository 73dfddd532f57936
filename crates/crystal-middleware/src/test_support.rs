//! Test doubles: a tagging filter gateway, an in-memory object store and a
//! metadata writer backed by it.

use crate::gateway::{FilterGateway, FilterInvocation};
use crate::layer::{FilterLayer, filter_layer};
use crate::writer::ExtendedMetadataWriter;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use crystal_common::{
    Config, Error, ExecutionMode, ObjectExecutionMetadata, RequestContext, Result, Tier,
};
use crystal_meta_store::{MemoryMetadataStore, keys};
use crystal_pipeline::codec;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One recorded gateway call
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct GatewayCall {
    pub tier: Tier,
    pub filters: Vec<(String, ExecutionMode)>,
}

/// Prefixes the payload with `[name]` in forward mode and strips it in reverse
#[derive(Default)]
pub(crate) struct TaggingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    failing: AtomicBool,
}

impl TaggingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl FilterGateway for TaggingGateway {
    fn name(&self) -> &str {
        "tagging"
    }

    async fn execute(&self, invocation: FilterInvocation<'_>, payload: Bytes) -> Result<Bytes> {
        self.calls.lock().push(GatewayCall {
            tier: invocation.tier,
            filters: invocation
                .filters
                .iter()
                .map(|f| (f.name().to_string(), f.mode))
                .collect(),
        });
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::gateway("sandbox unavailable"));
        }

        let mut data = payload.to_vec();
        for filter in invocation.filters {
            if !invocation.metadata.contains_key(filter.name()) {
                return Err(Error::internal(format!("no metadata for {}", filter.name())));
            }
            let tag = format!("[{}]", filter.name());
            data = match filter.mode {
                ExecutionMode::Forward => [tag.as_bytes(), &data[..]].concat(),
                ExecutionMode::Reverse => data
                    .strip_prefix(tag.as_bytes())
                    .ok_or_else(|| {
                        Error::gateway(format!("payload not tagged by {}", filter.name()))
                    })?
                    .to_vec(),
            };
        }
        Ok(Bytes::from(data))
    }
}

/// An object held by [`MemoryObjectStore`]
#[derive(Clone, Debug)]
pub(crate) struct StoredObject {
    pub body: Bytes,
    pub etag: String,
    pub metadata: HeaderMap,
}

/// Minimal object server keyed by `account/container/object`
#[derive(Default)]
pub(crate) struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    requests: Mutex<Vec<(Method, HeaderMap)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().get(key).cloned()
    }

    /// Headers of every request that reached the store
    pub fn requests(&self) -> Vec<(Method, HeaderMap)> {
        self.requests.lock().clone()
    }

    pub fn insert(&self, key: &str, body: &'static [u8], metadata: HeaderMap) {
        let body = Bytes::from_static(body);
        let etag = format!("{:x}", md5::compute(&body));
        self.objects.lock().insert(
            key.to_string(),
            StoredObject {
                body,
                etag,
                metadata,
            },
        );
    }

    fn merge_metadata(&self, key: &str, headers: &HeaderMap) -> bool {
        let mut objects = self.objects.lock();
        let Some(object) = objects.get_mut(key) else {
            return false;
        };
        for (name, value) in headers {
            object.metadata.insert(name.clone(), value.clone());
        }
        true
    }

    pub async fn serve(self: Arc<Self>, request: Request<Body>) -> Response {
        let key = object_key(request.uri().path());
        self.requests
            .lock()
            .push((request.method().clone(), request.headers().clone()));

        match *request.method() {
            Method::PUT => {
                let (parts, body) = request.into_parts();
                let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
                let etag = format!("{:x}", md5::compute(&body));
                let metadata: HeaderMap = parts
                    .headers
                    .iter()
                    .filter(|(name, _)| is_persisted(name.as_str()))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                self.objects.lock().insert(
                    key,
                    StoredObject {
                        body,
                        etag: etag.clone(),
                        metadata,
                    },
                );
                (StatusCode::CREATED, [(header::ETAG, format!("\"{etag}\""))]).into_response()
            }
            Method::POST => {
                let metadata: HeaderMap = request
                    .headers()
                    .iter()
                    .filter(|(name, _)| name.as_str().starts_with("x-object-sysmeta-"))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                if self.merge_metadata(&key, &metadata) {
                    StatusCode::ACCEPTED.into_response()
                } else {
                    StatusCode::NOT_FOUND.into_response()
                }
            }
            Method::GET | Method::HEAD => {
                let Some(object) = self.object(&key) else {
                    return StatusCode::NOT_FOUND.into_response();
                };
                let mut status = StatusCode::OK;
                let mut body = object.body.clone();
                if let Some((start, end)) = request
                    .headers()
                    .get(header::RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_range)
                {
                    let end = end.min(body.len().saturating_sub(1));
                    body = body.slice(start..=end);
                    status = StatusCode::PARTIAL_CONTENT;
                }

                let mut response = Response::new(if *request.method() == Method::HEAD {
                    Body::empty()
                } else {
                    Body::from(body.clone())
                });
                *response.status_mut() = status;
                let headers = response.headers_mut();
                headers.extend(object.metadata.clone());
                let etag = HeaderValue::from_str(&format!("\"{}\"", object.etag)).unwrap();
                headers.insert(header::ETAG, etag);
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
                response
            }
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        }
    }
}

fn is_persisted(name: &str) -> bool {
    name.starts_with("x-object-sysmeta-")
        || name.starts_with("x-object-meta-")
        || name == "x-static-large-object"
        || name == header::CONTENT_TYPE.as_str()
}

/// `/<device>/<partition>/<a>/<c>/<o>` -> `a/c/o`
fn object_key(path: &str) -> String {
    path.trim_start_matches('/')
        .splitn(3, '/')
        .nth(2)
        .unwrap_or_default()
        .to_string()
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Writes execution metadata straight into a [`MemoryObjectStore`]
pub(crate) struct StoreWriter {
    store: Arc<MemoryObjectStore>,
    failing: AtomicBool,
    writes: Mutex<Vec<ObjectExecutionMetadata>>,
}

impl StoreWriter {
    pub fn new(store: Arc<MemoryObjectStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            failing: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<ObjectExecutionMetadata> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl ExtendedMetadataWriter for StoreWriter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, ctx: &RequestContext, metadata: &ObjectExecutionMetadata) -> Result<()> {
        self.writes.lock().push(metadata.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::internal("metadata write refused"));
        }

        let mut headers = HeaderMap::new();
        codec::insert_object_metadata(&mut headers, metadata)?;
        let key = format!("{}/{}/{}", ctx.account(), ctx.container(), ctx.object());
        if self.store.merge_metadata(&key, &headers) {
            Ok(())
        } else {
            Err(Error::internal(format!("no object at {key}")))
        }
    }
}

/// Define a filter enabled for GET and PUT, attached to `target`
pub(crate) fn define_filter(
    store: &MemoryMetadataStore,
    target: &str,
    name: &str,
    tier: &str,
    reverse_tier: &str,
) {
    let id = format!("{name}-id");
    store.hset_all(
        &keys::generic(&id),
        [
            ("execution_server", tier),
            ("execution_server_reverse", reverse_tier),
            ("params", ""),
            ("is_put", "True"),
            ("is_get", "True"),
        ],
    );
    store.hset(&keys::filter(target, name), "id", id);
}

/// Everything a layer test needs, wired to one in-memory object store
pub(crate) struct Harness {
    pub meta: Arc<MemoryMetadataStore>,
    pub gateway: Arc<TaggingGateway>,
    pub objects: Arc<MemoryObjectStore>,
    pub writer: Arc<StoreWriter>,
}

impl Harness {
    pub fn new() -> Self {
        let objects = MemoryObjectStore::new();
        Self {
            meta: Arc::new(MemoryMetadataStore::new()),
            gateway: TaggingGateway::new(),
            writer: StoreWriter::new(objects.clone()),
            objects,
        }
    }

    pub fn layer(&self, config: Config) -> Arc<FilterLayer> {
        Arc::new(FilterLayer::new(
            config,
            self.meta.clone(),
            self.gateway.clone(),
            self.writer.clone(),
        ))
    }

    pub fn node_layer(&self) -> Arc<FilterLayer> {
        self.layer(Config {
            execution_tier: Tier::StorageNode,
            ..Config::default()
        })
    }

    pub fn proxy_layer(&self, config: Config) -> Arc<FilterLayer> {
        self.layer(Config {
            execution_tier: Tier::Proxy,
            ..config
        })
    }

    /// Object server router wrapped in the storage node filter layer
    pub fn node_router(&self, layer: Arc<FilterLayer>) -> Router {
        let objects = self.objects.clone();
        Router::new()
            .fallback(move |request: Request<Body>| {
                let objects = objects.clone();
                async move { objects.serve(request).await }
            })
            .layer(middleware::from_fn_with_state(layer, filter_layer))
    }
}

/// Rewrite a proxy path `/v1/a/c/o` to the node path `/sda1/0/a/c/o`
pub(crate) fn to_node_request(request: Request<Body>) -> Request<Body> {
    let (mut parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    let rest = path_and_query
        .trim_start_matches('/')
        .split_once('/')
        .map(|(_, rest)| rest.to_string())
        .unwrap_or_default();
    parts.uri = format!("/sda1/0/{rest}").parse().unwrap();
    Request::from_parts(parts, body)
}

pub(crate) fn request(method: Method, uri: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body))
        .unwrap()
}

pub(crate) async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
}
