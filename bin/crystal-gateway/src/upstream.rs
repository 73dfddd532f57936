//! Upstream object-store endpoint
//!
//! Requests that leave the filter layer are replayed against the upstream
//! endpoint with reqwest. Extended execution metadata is written back with an
//! object POST.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use crystal_common::{Error, ObjectExecutionMetadata, RequestContext, Result};
use crystal_middleware::ExtendedMetadataWriter;
use crystal_pipeline::codec;
use http::HeaderMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Auxiliary gateway setting naming the base URL for metadata POSTs
pub const METADATA_ENDPOINT: &str = "metadata_endpoint";

/// Hop-by-hop headers never relayed in either direction
const HOP_HEADERS: [header::HeaderName; 4] = [
    header::CONNECTION,
    header::HOST,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in &HOP_HEADERS {
        headers.remove(name);
    }
}

/// Reverse proxy to the upstream endpoint
pub struct Upstream {
    http_client: reqwest::Client,
    base_url: String,
    max_body_bytes: usize,
}

impl Upstream {
    pub fn new(http_client: reqwest::Client, base_url: &str, max_body_bytes: usize) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_body_bytes,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replay `request` upstream and convert the answer back
    pub async fn send(&self, request: Request<Body>) -> anyhow::Result<Response> {
        let (parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map_or("/", http::uri::PathAndQuery::as_str);
        let url = format!("{}{}", self.base_url, path);
        let body = axum::body::to_bytes(body, self.max_body_bytes).await?;

        let mut headers = parts.headers;
        strip_hop_headers(&mut headers);
        debug!("Forwarding {} {} ({} bytes)", parts.method, url, body.len());

        let upstream = self
            .http_client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_headers(&mut headers);
        let bytes = upstream.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Fallback handler relaying everything to the upstream endpoint
pub async fn forward(State(upstream): State<Arc<Upstream>>, request: Request<Body>) -> Response {
    match upstream.send(request).await {
        Ok(response) => response,
        Err(e) => {
            error!("Upstream request to {} failed: {}", upstream.base_url(), e);
            (StatusCode::BAD_GATEWAY, "Upstream unavailable").into_response()
        }
    }
}

/// Writes execution metadata with a POST to the object
pub struct UpstreamMetadataWriter {
    http_client: reqwest::Client,
    base_url: String,
}

impl UpstreamMetadataWriter {
    /// `base_url` is the root of the endpoint storing the object
    pub fn new(http_client: reqwest::Client, base_url: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Object URL in the addressing of the tier the request arrived on:
    /// `/<device>/<partition>/a/c/o` on a storage node, `/<version>/a/c/o` on a proxy
    fn object_url(&self, ctx: &RequestContext) -> String {
        let prefix = match ctx.location() {
            Some((device, partition)) => format!("{device}/{partition}"),
            None => ctx.api_version().to_string(),
        };
        format!(
            "{}/{}/{}/{}/{}",
            self.base_url,
            prefix,
            ctx.account(),
            ctx.container(),
            ctx.object()
        )
    }
}

#[async_trait]
impl ExtendedMetadataWriter for UpstreamMetadataWriter {
    fn name(&self) -> &str {
        "upstream"
    }

    async fn write(&self, ctx: &RequestContext, metadata: &ObjectExecutionMetadata) -> Result<()> {
        let mut headers = HeaderMap::new();
        codec::insert_object_metadata(&mut headers, metadata)?;
        let url = self.object_url(ctx);

        let response = self
            .http_client
            .post(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| Error::internal(format!("metadata POST to {url} failed: {e}")))?;

        if response.status().is_success() {
            debug!("Stored execution metadata on {}", url);
            Ok(())
        } else {
            Err(Error::internal(format!(
                "metadata POST to {url} returned {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use bytes::Bytes;
    use crystal_common::{ExecutionRecord, Tier};
    use http::{Method, Uri};
    use parking_lot::Mutex;
    use tokio::net::TcpListener;

    type Seen = Arc<Mutex<Vec<(Method, Uri, HeaderMap, Bytes)>>>;

    /// Upstream echoing the request body with a fixed etag
    async fn spawn_upstream() -> (String, Seen) {
        let seen: Seen = Arc::default();
        let recorder = seen.clone();
        let app = Router::new().fallback(
            move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
                let recorder = recorder.clone();
                async move {
                    recorder
                        .lock()
                        .push((method, uri.clone(), headers, body.clone()));
                    if uri.path().ends_with("/missing") {
                        return (StatusCode::NOT_FOUND, HeaderMap::new(), Bytes::new());
                    }
                    let mut out = HeaderMap::new();
                    out.insert(header::ETAG, "\"abc\"".parse().unwrap());
                    (StatusCode::CREATED, out, body)
                }
            },
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), seen)
    }

    fn metadata() -> ObjectExecutionMetadata {
        ObjectExecutionMetadata {
            original_etag: "5d41402abc4b2a76b9719d911017c592".to_string(),
            original_size: 5,
            records: vec![ExecutionRecord {
                index: 0,
                filter_name: "compress".to_string(),
                filter_id: "compress-id".to_string(),
                params: String::new(),
                execution_tier: Tier::StorageNode,
                reverse_tier: Tier::StorageNode,
            }],
        }
    }

    #[tokio::test]
    async fn test_forward_relays_request_and_response() {
        let (base, seen) = spawn_upstream().await;
        let upstream = Upstream::new(reqwest::Client::new(), &base, 1024);

        let request = Request::builder()
            .method(Method::PUT)
            .uri("/v1/AUTH_test/docs/a.txt?multipart-manifest=put")
            .header("x-object-meta-color", "blue")
            .body(Body::from("hello"))
            .unwrap();
        let response = upstream.send(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::ETAG], "\"abc\"");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"hello"));

        let seen = seen.lock();
        let (method, uri, headers, body) = &seen[0];
        assert_eq!(*method, Method::PUT);
        assert_eq!(uri.path(), "/v1/AUTH_test/docs/a.txt");
        assert_eq!(uri.query(), Some("multipart-manifest=put"));
        assert_eq!(headers["x-object-meta-color"], "blue");
        assert_eq!(body, &Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_forward_passes_error_status_through() {
        let (base, _) = spawn_upstream().await;
        let upstream = Arc::new(Upstream::new(reqwest::Client::new(), &base, 1024));
        let request = Request::get("/v1/a/c/missing").body(Body::empty()).unwrap();

        let response = forward(State(upstream), request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_forward_unreachable_upstream_is_bad_gateway() {
        let upstream = Arc::new(Upstream::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1",
            1024,
        ));
        let request = Request::get("/v1/a/c/o").body(Body::empty()).unwrap();

        let response = forward(State(upstream), request).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_metadata_writer_posts_headers() {
        let (base, seen) = spawn_upstream().await;
        let writer = UpstreamMetadataWriter::new(reqwest::Client::new(), &format!("{base}/"));
        let ctx = RequestContext::from_node_path(
            &Method::PUT,
            "/sda1/1234/AUTH_test/docs/a.txt",
            None,
            &HeaderMap::new(),
        )
        .unwrap();

        writer.write(&ctx, &metadata()).await.unwrap();

        let seen = seen.lock();
        let (method, uri, headers, _) = &seen[0];
        assert_eq!(*method, Method::POST);
        assert_eq!(uri.path(), "/sda1/1234/AUTH_test/docs/a.txt");
        let mut headers = headers.clone();
        let restored = codec::take_object_metadata(&mut headers).unwrap().unwrap();
        assert_eq!(restored, metadata());
    }

    #[tokio::test]
    async fn test_metadata_writer_reports_missing_object() {
        let (base, _) = spawn_upstream().await;
        let writer = UpstreamMetadataWriter::new(reqwest::Client::new(), &base);
        let ctx = RequestContext::from_proxy_path(
            &Method::PUT,
            "/v1/AUTH_test/docs/missing",
            None,
            &HeaderMap::new(),
        )
        .unwrap();

        assert!(writer.write(&ctx, &metadata()).await.is_err());
    }

    #[test]
    fn test_object_url_follows_request_tier() {
        let writer = UpstreamMetadataWriter::new(reqwest::Client::new(), "http://localhost:6000");
        let node = RequestContext::from_node_path(
            &Method::PUT,
            "/sda1/1234/AUTH_a/c/o",
            None,
            &HeaderMap::new(),
        )
        .unwrap();
        assert_eq!(writer.object_url(&node), "http://localhost:6000/sda1/1234/AUTH_a/c/o");

        let proxy =
            RequestContext::from_proxy_path(&Method::PUT, "/v1/AUTH_a/c/o", None, &HeaderMap::new())
                .unwrap();
        assert_eq!(writer.object_url(&proxy), "http://localhost:6000/v1/AUTH_a/c/o");
    }
}
