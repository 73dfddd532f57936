//! Per-request context
//!
//! A [`RequestContext`] is built once per request from its method, path and
//! headers. Paths that do not name an object yield [`NotApplicable`], which
//! callers treat as "hand the request to the next service untouched".

use crate::types::PipelineKey;
use http::{HeaderMap, Method, header};

/// The request does not address an object this layer handles
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("request path does not address an object")]
pub struct NotApplicable;

/// HTTP verbs the orchestrators dispatch on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Get,
    Put,
    Head,
    /// Any verb without a dedicated handler
    Other,
}

impl From<&Method> for Verb {
    fn from(method: &Method) -> Self {
        match *method {
            Method::GET => Self::Get,
            Method::PUT => Self::Put,
            Method::HEAD => Self::Head,
            _ => Self::Other,
        }
    }
}

/// Immutable view of one request
#[derive(Clone, Debug)]
pub struct RequestContext {
    /// `(device, partition)` of a storage node path
    location: Option<(String, String)>,
    api_version: String,
    account: String,
    container: String,
    object: String,
    method: Method,
    headers: HeaderMap,
    query: Option<String>,
}

impl RequestContext {
    /// Build a context from a proxy path: `/<version>/<account>/<container>/<object>`
    pub fn from_proxy_path(
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<Self, NotApplicable> {
        let [version, account, container, object] = split_path::<4>(path)?;
        Ok(Self {
            location: None,
            api_version: version.to_string(),
            account: account.to_string(),
            container: container.to_string(),
            object: object.to_string(),
            method: method.clone(),
            headers: headers.clone(),
            query: query.map(str::to_string),
        })
    }

    /// Build a context from a storage node path:
    /// `/<device>/<partition>/<account>/<container>/<object>`
    pub fn from_node_path(
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<Self, NotApplicable> {
        let [device, partition, account, container, object] = split_path::<5>(path)?;
        Ok(Self {
            location: Some((device.to_string(), partition.to_string())),
            api_version: "0".to_string(),
            account: account.to_string(),
            container: container.to_string(),
            object: object.to_string(),
            method: method.clone(),
            headers: headers.clone(),
            query: query.map(str::to_string),
        })
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Device and partition, for contexts built from a storage node path
    pub fn location(&self) -> Option<(&str, &str)> {
        self.location
            .as_ref()
            .map(|(device, partition)| (device.as_str(), partition.as_str()))
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Verb used for handler dispatch
    pub fn verb(&self) -> Verb {
        Verb::from(&self.method)
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Key used to resolve the filter chain for this request
    pub fn pipeline_key(&self) -> PipelineKey {
        PipelineKey::new(&self.account, &self.container, &self.object)
    }

    /// Declared request body length, if present and numeric
    pub fn content_length(&self) -> Option<u64> {
        self.header_str(header::CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse().ok())
    }

    /// Content type essence: the Content-Type header, else guessed from the object name
    pub fn content_type(&self) -> Option<String> {
        let declared = self
            .header_str(header::CONTENT_TYPE.as_str())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty());

        declared.or_else(|| {
            mime_guess::from_path(&self.object)
                .first()
                .map(|m| m.essence_str().to_string())
        })
    }

    /// Whether the client asked for a byte range
    pub fn is_range_request(&self) -> bool {
        self.headers.contains_key(header::RANGE)
    }

    /// Value of a query string parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then_some(value)
        })
    }

    /// Header value as a string, if present and valid UTF-8
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Split `/<seg1>/.../<segN>` into exactly `N` non-empty segments; the last
/// segment keeps any remaining slashes.
fn split_path<const N: usize>(path: &str) -> Result<[&str; N], NotApplicable> {
    let rest = path.strip_prefix('/').ok_or(NotApplicable)?;
    let mut segments = [""; N];
    let mut parts = rest.splitn(N, '/');

    for (i, slot) in segments.iter_mut().enumerate() {
        let segment = parts.next().ok_or(NotApplicable)?;
        if segment.is_empty() {
            return Err(NotApplicable);
        }
        if i + 1 < N && (segment == "." || segment == "..") {
            return Err(NotApplicable);
        }
        *slot = segment;
    }

    Ok(segments)
}
