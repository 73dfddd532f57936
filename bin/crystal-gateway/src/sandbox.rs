//! HTTP client for the filter sandbox
//!
//! The sandbox receives the payload as the request body and a JSON
//! description of the filters to run in the `x-crystal-invocation` header. It
//! answers with the transformed payload.

use async_trait::async_trait;
use bytes::Bytes;
use crystal_common::{Config, Error, ExecutionMode, Result, Tier};
use crystal_meta_store::FieldMap;
use crystal_middleware::{FilterGateway, FilterInvocation};
use http::{HeaderName, HeaderValue};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Header carrying the serialized invocation
pub const INVOCATION_HEADER: HeaderName = HeaderName::from_static("x-crystal-invocation");

/// Auxiliary gateway setting naming the sandbox base URL
pub const SANDBOX_ENDPOINT: &str = "sandbox_endpoint";

#[derive(Debug, Serialize)]
struct SandboxRequest<'a> {
    tier: Tier,
    account: &'a str,
    container: &'a str,
    object: &'a str,
    method: &'a str,
    reseller_prefix: &'a str,
    filters: Vec<SandboxFilter<'a>>,
}

#[derive(Debug, Serialize)]
struct SandboxFilter<'a> {
    index: usize,
    name: &'a str,
    id: &'a str,
    mode: ExecutionMode,
    params: &'a str,
    metadata: Option<&'a FieldMap>,
}

impl<'a> SandboxRequest<'a> {
    fn new(invocation: &FilterInvocation<'a>, reseller_prefix: &'a str) -> Self {
        let ctx = invocation.context;
        Self {
            tier: invocation.tier,
            account: ctx.account(),
            container: ctx.container(),
            object: ctx.object(),
            method: ctx.method().as_str(),
            reseller_prefix,
            filters: invocation
                .filters
                .iter()
                .map(|f| SandboxFilter {
                    index: f.record.index,
                    name: f.name(),
                    id: &f.record.filter_id,
                    mode: f.mode,
                    params: &f.record.params,
                    metadata: invocation.metadata.get(f.name()),
                })
                .collect(),
        }
    }
}

/// Filter gateway calling a remote sandbox over HTTP
pub struct HttpFilterGateway {
    http_client: reqwest::Client,
    url: String,
    reseller_prefix: String,
    timeout: Duration,
}

impl HttpFilterGateway {
    /// Create a gateway from the auxiliary `sandbox_endpoint` setting.
    ///
    /// The execution timeout becomes the request timeout.
    pub fn from_config(config: &Config) -> Result<Self> {
        let endpoint = config.gateway.get(SANDBOX_ENDPOINT).ok_or_else(|| {
            Error::Configuration(format!("gateway setting {SANDBOX_ENDPOINT} is not set"))
        })?;
        let timeout = config.execution_timeout();
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        Ok(Self {
            http_client,
            url: format!("{}/execute", endpoint.trim_end_matches('/')),
            reseller_prefix: config.reseller_prefix.clone(),
            timeout,
        })
    }

    /// Execution URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FilterGateway for HttpFilterGateway {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn execute(&self, invocation: FilterInvocation<'_>, payload: Bytes) -> Result<Bytes> {
        let request = SandboxRequest::new(&invocation, &self.reseller_prefix);
        let encoded =
            serde_json::to_vec(&request).map_err(|e| Error::Serialization(e.to_string()))?;
        let header = HeaderValue::from_bytes(&encoded)
            .map_err(|e| Error::malformed_header(INVOCATION_HEADER.as_str(), e))?;

        debug!(
            "Sandbox call to {} with {} filters, {} bytes",
            self.url,
            request.filters.len(),
            payload.len()
        );
        let response = self
            .http_client
            .post(&self.url)
            .header(INVOCATION_HEADER, header)
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::gateway(format!(
                        "filter execution timed out after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    Error::gateway(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::gateway(format!(
                "sandbox returned status {status}: {body}"
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::gateway(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::HeaderMap, routing::post};
    use crystal_common::{ExecutionRecord, RequestContext, ScheduledFilter};
    use crystal_pipeline::FilterMetadata;
    use http::Method;
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    fn context() -> RequestContext {
        RequestContext::from_proxy_path(
            &Method::PUT,
            "/v1/AUTH_test/docs/report.txt",
            None,
            &HeaderMap::new(),
        )
        .unwrap()
    }

    fn scheduled(index: usize, name: &str) -> ScheduledFilter {
        ScheduledFilter::forward(ExecutionRecord {
            index,
            filter_name: name.to_string(),
            filter_id: format!("{name}-id"),
            params: "level=9".to_string(),
            execution_tier: Tier::Proxy,
            reverse_tier: Tier::Proxy,
        })
    }

    fn config(endpoint: &str) -> Config {
        let mut config = Config::default();
        config.merge_gateway([(SANDBOX_ENDPOINT, endpoint)]);
        config
    }

    /// Sandbox that upper-cases the payload
    async fn spawn_sandbox() -> String {
        async fn execute(headers: HeaderMap, body: Bytes) -> Bytes {
            let invocation: serde_json::Value =
                serde_json::from_slice(headers[INVOCATION_HEADER].as_bytes()).unwrap();
            assert!(invocation["filters"].is_array());
            Bytes::from(body.to_ascii_uppercase())
        }

        let app = Router::new()
            .route("/execute", post(execute))
            .route(
                "/fail/execute",
                post(|| async { (http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[test]
    fn test_missing_endpoint_is_configuration_error() {
        let err = HttpFilterGateway::from_config(&Config::default())
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_url_joins_endpoint() {
        let gateway = HttpFilterGateway::from_config(&config("http://sandbox:8090/")).unwrap();
        assert_eq!(gateway.url(), "http://sandbox:8090/execute");
    }

    #[test]
    fn test_request_carries_filters_and_metadata() {
        let ctx = context();
        let filters = [scheduled(0, "compress"), scheduled(1, "encrypt")];
        let mut metadata = FilterMetadata::new();
        metadata.insert(
            "compress".to_string(),
            HashMap::from([("main".to_string(), "Compress".to_string())]),
        );
        let invocation = FilterInvocation {
            context: &ctx,
            tier: Tier::Proxy,
            filters: &filters,
            metadata: &metadata,
        };

        let value = serde_json::to_value(SandboxRequest::new(&invocation, "AUTH")).unwrap();
        assert_eq!(value["tier"], "proxy");
        assert_eq!(value["method"], "PUT");
        assert_eq!(value["object"], "report.txt");
        assert_eq!(value["reseller_prefix"], "AUTH");
        assert_eq!(value["filters"][0]["mode"], "forward");
        assert_eq!(value["filters"][0]["metadata"]["main"], "Compress");
        assert_eq!(value["filters"][1]["id"], "encrypt-id");
        assert!(value["filters"][1]["metadata"].is_null());
    }

    #[tokio::test]
    async fn test_execute_against_sandbox() {
        let endpoint = spawn_sandbox().await;
        let gateway = HttpFilterGateway::from_config(&config(&endpoint)).unwrap();
        let ctx = context();
        let filters = [scheduled(0, "upper")];
        let metadata = FilterMetadata::new();
        let invocation = FilterInvocation {
            context: &ctx,
            tier: Tier::Proxy,
            filters: &filters,
            metadata: &metadata,
        };

        let out = gateway
            .execute(invocation, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(out, Bytes::from_static(b"HELLO"));
    }

    #[tokio::test]
    async fn test_sandbox_error_status_fails() {
        let endpoint = spawn_sandbox().await;
        let gateway =
            HttpFilterGateway::from_config(&config(&format!("{endpoint}/fail"))).unwrap();
        let ctx = context();
        let metadata = FilterMetadata::new();
        let invocation = FilterInvocation {
            context: &ctx,
            tier: Tier::Proxy,
            filters: &[],
            metadata: &metadata,
        };

        let err = gateway
            .execute(invocation, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(err.is_infrastructure());
        assert!(err.to_string().contains("500"));
    }
}
