//! Filter eligibility
//!
//! A filter runs for a request only if every configured condition holds:
//! it is enabled for the method, the content type is in its allow-list, and
//! the content length satisfies its size comparison.

use crate::filter::FilterSpec;
use crystal_common::RequestContext;
use http::Method;

/// Request attributes eligibility is evaluated against
#[derive(Clone, Debug)]
pub struct EligibilityInput {
    pub method: Method,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl EligibilityInput {
    /// Take method, content type and length from the request
    pub fn from_context(ctx: &RequestContext) -> Self {
        Self {
            method: ctx.method().clone(),
            content_type: ctx.content_type(),
            content_length: ctx.content_length(),
        }
    }
}

/// Whether `spec` applies to the request.
///
/// `allowed_types` is the allow-list of the filter's object type category;
/// it is only consulted when the filter has one.
#[must_use]
pub fn is_eligible(
    spec: &FilterSpec,
    input: &EligibilityInput,
    allowed_types: Option<&[String]>,
) -> bool {
    if !spec.is_enabled_for(&input.method) {
        return false;
    }

    if spec.object_type.is_some() {
        let type_allowed = match (input.content_type.as_deref(), allowed_types) {
            (Some(content_type), Some(allowed)) => allowed
                .iter()
                .any(|t| t.trim().eq_ignore_ascii_case(content_type)),
            _ => false,
        };
        if !type_allowed {
            return false;
        }
    }

    match (spec.object_size, input.content_length) {
        (None, _) => true,
        (Some(condition), Some(length)) => condition.matches(length),
        // Unknown length cannot satisfy a size comparison
        (Some(_), None) => false,
    }
}
