//! Cross-tier header and extended object metadata codec
//!
//! Execution lists travel between tiers as JSON arrays of records. The
//! metadata persisted with a transformed object uses the same encoding under
//! the `x-object-sysmeta-crystal-` prefix.

use crystal_common::{Error, ExecutionRecord, ObjectExecutionMetadata, Result, ScheduledFilter};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Records delegated to the storage node
pub const EXEC_LIST_HEADER: HeaderName = HeaderName::from_static("x-crystal-exec-list");
/// Full write-time list sent with a PUT
pub const EXECUTED_LIST_HEADER: HeaderName = HeaderName::from_static("x-crystal-executed-list");
/// Size of the content as the client sent it
pub const ORIGINAL_SIZE_HEADER: HeaderName = HeaderName::from_static("x-crystal-original-size");
/// Checksum of the content as the client sent it
pub const ORIGINAL_ETAG_HEADER: HeaderName = HeaderName::from_static("x-crystal-original-etag");
/// Response marker carrying filters the proxy still has to run
pub const PENDING_HEADER: HeaderName = HeaderName::from_static("x-crystal-pending");
/// GET marker asking the storage node to defer all execution
pub const PROXY_ONLY_HEADER: HeaderName = HeaderName::from_static("x-crystal-proxy-only");

/// Prefix of transport headers; clients may not send these
pub const TRANSPORT_PREFIX: &str = "x-crystal-";

/// Extended metadata key prefix
pub const OBJECT_META_PREFIX: &str = "x-object-sysmeta-crystal-";
pub const META_ORIGINAL_ETAG: HeaderName =
    HeaderName::from_static("x-object-sysmeta-crystal-original-etag");
pub const META_ORIGINAL_SIZE: HeaderName =
    HeaderName::from_static("x-object-sysmeta-crystal-original-size");
pub const META_EXEC_LIST: HeaderName =
    HeaderName::from_static("x-object-sysmeta-crystal-storlet-exec-list");

/// Encode records as a header value
pub fn encode_records(records: &[ExecutionRecord]) -> Result<HeaderValue> {
    encode(records)
}

/// Decode records, ordered by index
pub fn decode_records(header: &HeaderName, value: &HeaderValue) -> Result<Vec<ExecutionRecord>> {
    let mut records: Vec<ExecutionRecord> = decode(header, value)?;
    records.sort_by_key(|r| r.index);
    Ok(records)
}

/// Encode scheduled filters as a header value, keeping their order
pub fn encode_scheduled(filters: &[ScheduledFilter]) -> Result<HeaderValue> {
    encode(filters)
}

/// Decode scheduled filters in the order they were sent
pub fn decode_scheduled(header: &HeaderName, value: &HeaderValue) -> Result<Vec<ScheduledFilter>> {
    decode(header, value)
}

/// Remove `header` and decode the records it carried
pub fn take_records(
    headers: &mut HeaderMap,
    header: &HeaderName,
) -> Result<Option<Vec<ExecutionRecord>>> {
    headers
        .remove(header)
        .map(|value| decode_records(header, &value))
        .transpose()
}

/// Remove the pending marker and decode it
pub fn take_pending(headers: &mut HeaderMap) -> Result<Option<Vec<ScheduledFilter>>> {
    headers
        .remove(&PENDING_HEADER)
        .map(|value| decode_scheduled(&PENDING_HEADER, &value))
        .transpose()
}

/// Attach the full write-time list and the original size/etag to a PUT
pub fn insert_executed(headers: &mut HeaderMap, meta: &ObjectExecutionMetadata) -> Result<()> {
    headers.insert(EXECUTED_LIST_HEADER, encode_records(&meta.records)?);
    headers.insert(ORIGINAL_SIZE_HEADER, HeaderValue::from(meta.original_size));
    headers.insert(ORIGINAL_ETAG_HEADER, text_value(&ORIGINAL_ETAG_HEADER, &meta.original_etag)?);
    Ok(())
}

/// Remove the executed-list headers of a PUT.
///
/// Returns `None` when no executed list was sent. A list without the
/// original size and etag is malformed.
pub fn take_executed(headers: &mut HeaderMap) -> Result<Option<ObjectExecutionMetadata>> {
    let records = take_records(headers, &EXECUTED_LIST_HEADER)?;
    let size = headers.remove(&ORIGINAL_SIZE_HEADER);
    let etag = headers.remove(&ORIGINAL_ETAG_HEADER);

    let Some(records) = records else {
        return Ok(None);
    };
    Ok(Some(ObjectExecutionMetadata {
        original_etag: required_text(&ORIGINAL_ETAG_HEADER, etag.as_ref())?,
        original_size: required_size(&ORIGINAL_SIZE_HEADER, size.as_ref())?,
        records,
    }))
}

/// Write object execution metadata as extended metadata headers
pub fn insert_object_metadata(
    headers: &mut HeaderMap,
    meta: &ObjectExecutionMetadata,
) -> Result<()> {
    headers.insert(META_EXEC_LIST, encode_records(&meta.records)?);
    headers.insert(META_ORIGINAL_SIZE, HeaderValue::from(meta.original_size));
    headers.insert(META_ORIGINAL_ETAG, text_value(&META_ORIGINAL_ETAG, &meta.original_etag)?);
    Ok(())
}

/// Remove all extended metadata headers and decode them.
///
/// Returns `None` for an object stored without a filter chain.
pub fn take_object_metadata(headers: &mut HeaderMap) -> Result<Option<ObjectExecutionMetadata>> {
    let records = take_records(headers, &META_EXEC_LIST)?;
    let size = headers.remove(&META_ORIGINAL_SIZE);
    let etag = headers.remove(&META_ORIGINAL_ETAG);
    strip_prefixed(headers, OBJECT_META_PREFIX);

    let Some(records) = records else {
        return Ok(None);
    };
    Ok(Some(ObjectExecutionMetadata {
        original_etag: required_text(&META_ORIGINAL_ETAG, etag.as_ref())?,
        original_size: required_size(&META_ORIGINAL_SIZE, size.as_ref())?,
        records,
    }))
}

/// Drop every cross-tier transport header
pub fn strip_transport_headers(headers: &mut HeaderMap) {
    strip_prefixed(headers, TRANSPORT_PREFIX);
}

fn strip_prefixed(headers: &mut HeaderMap, prefix: &str) {
    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(prefix))
        .cloned()
        .collect();
    for name in names {
        headers.remove(&name);
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<HeaderValue> {
    let json = serde_json::to_string(value).map_err(|e| Error::Serialization(e.to_string()))?;
    HeaderValue::from_str(&json).map_err(|e| Error::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(header: &HeaderName, value: &HeaderValue) -> Result<T> {
    serde_json::from_slice(value.as_bytes())
        .map_err(|e| Error::malformed_header(header.as_str(), e))
}

fn text_value(header: &HeaderName, text: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(text).map_err(|e| Error::malformed_header(header.as_str(), e))
}

fn required_text(header: &HeaderName, value: Option<&HeaderValue>) -> Result<String> {
    let value = value.ok_or_else(|| Error::malformed_header(header.as_str(), "missing"))?;
    std::str::from_utf8(value.as_bytes())
        .map(str::to_string)
        .map_err(|e| Error::malformed_header(header.as_str(), e))
}

fn required_size(header: &HeaderName, value: Option<&HeaderValue>) -> Result<u64> {
    required_text(header, value)?
        .trim()
        .parse()
        .map_err(|e| Error::malformed_header(header.as_str(), e))
}
