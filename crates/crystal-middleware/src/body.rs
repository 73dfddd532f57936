//! Payload buffering

use axum::body::Body;
use bytes::Bytes;
use crystal_common::{Error, Result};
use http::{HeaderMap, HeaderValue, header};

/// Buffer a body of at most `limit` bytes
pub async fn collect(body: Body, limit: usize) -> Result<Bytes> {
    axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| Error::Body(e.to_string()))
}

/// Set the length headers for a buffered payload of `len` bytes
pub fn set_length(headers: &mut HeaderMap, len: usize) {
    headers.remove(header::TRANSFER_ENCODING);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
}

/// Quote an etag for the `ETag` header
pub fn etag_value(etag: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!("\"{}\"", etag.trim_matches('"')))
        .map_err(|e| Error::malformed_header(header::ETAG.as_str(), e))
}
