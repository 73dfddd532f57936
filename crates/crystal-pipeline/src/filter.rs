//! Filter definitions
//!
//! A [`FilterSpec`] is parsed from the merged generic and specific metadata of
//! one filter. Malformed definitions are configuration errors.

use crystal_common::{Error, ExecutionRecord, Result, Tier};
use crystal_meta_store::FieldMap;
use http::Method;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Field holding the filter id
pub const FIELD_ID: &str = "id";
/// Field holding the write-path execution tier
pub const FIELD_EXECUTION_TIER: &str = "execution_server";
/// Field holding the read-path execution tier
pub const FIELD_REVERSE_TIER: &str = "execution_server_reverse";
/// Field holding the parameter blob
pub const FIELD_PARAMS: &str = "params";
/// Field naming the object type category
pub const FIELD_OBJECT_TYPE: &str = "object_type";
/// Field holding the size condition
pub const FIELD_OBJECT_SIZE: &str = "object_size";
/// Prefix of per-method enable flags (`is_get`, `is_put`, ...)
pub const METHOD_FLAG_PREFIX: &str = "is_";

/// Comparison applied by a size condition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl ComparisonOp {
    /// Operator symbol
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    /// Apply the comparison as `actual <op> threshold`
    #[must_use]
    pub const fn apply(&self, actual: u64, threshold: u64) -> bool {
        match self {
            Self::Lt => actual < threshold,
            Self::Le => actual <= threshold,
            Self::Gt => actual > threshold,
            Self::Ge => actual >= threshold,
            Self::Eq => actual == threshold,
            Self::Ne => actual != threshold,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            other => Err(format!("unknown comparison operator {other:?}")),
        }
    }
}

/// Object size condition `(operator, threshold)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeCondition {
    pub op: ComparisonOp,
    pub threshold: u64,
}

impl SizeCondition {
    /// Parse the stored form, a two-element list such as `['>', 1024]`.
    ///
    /// Single-quoted lists (as written by the controller) are accepted, and the
    /// threshold may be a number or a numeric string.
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let normalized = raw.replace('\'', "\"");
        let items: Vec<serde_json::Value> = serde_json::from_str(&normalized)
            .map_err(|e| format!("size condition {raw:?} is not a list: {e}"))?;

        let [op, threshold] = items.as_slice() else {
            return Err(format!(
                "size condition {raw:?} must have 2 elements, has {}",
                items.len()
            ));
        };

        let op = op
            .as_str()
            .ok_or_else(|| format!("size operator in {raw:?} is not a string"))?
            .parse::<ComparisonOp>()?;

        let threshold = match threshold {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| format!("size threshold in {raw:?} is not a non-negative integer"))?;

        Ok(Self { op, threshold })
    }

    /// Whether an object of `size` bytes satisfies the condition
    #[must_use]
    pub const fn matches(&self, size: u64) -> bool {
        self.op.apply(size, self.threshold)
    }
}

/// A filter definition, immutable for the lifetime of a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterSpec {
    pub name: String,
    pub id: String,
    pub execution_tier: Tier,
    pub reverse_tier: Tier,
    pub params: String,
    /// Upper-case methods the filter is enabled for
    pub enabled_methods: BTreeSet<String>,
    /// Object type category, resolved to an allow-list of mime types
    pub object_type: Option<String>,
    pub object_size: Option<SizeCondition>,
}

impl FilterSpec {
    /// Parse a filter from its merged metadata
    pub fn from_metadata(name: &str, fields: &FieldMap) -> Result<Self> {
        let id = non_empty(fields, FIELD_ID)
            .ok_or_else(|| Error::invalid_filter(name, "missing id"))?
            .to_string();

        let execution_tier = parse_tier(name, fields, FIELD_EXECUTION_TIER)?
            .ok_or_else(|| Error::invalid_filter(name, "missing execution_server"))?;
        let reverse_tier =
            parse_tier(name, fields, FIELD_REVERSE_TIER)?.unwrap_or(execution_tier);

        let enabled_methods = fields
            .iter()
            .filter_map(|(field, value)| {
                let method = field.strip_prefix(METHOD_FLAG_PREFIX)?;
                is_truthy(value).then(|| method.to_ascii_uppercase())
            })
            .collect();

        let object_size = non_empty(fields, FIELD_OBJECT_SIZE)
            .map(SizeCondition::parse)
            .transpose()
            .map_err(|reason| Error::invalid_filter(name, reason))?;

        Ok(Self {
            name: name.to_string(),
            id,
            execution_tier,
            reverse_tier,
            params: fields.get(FIELD_PARAMS).cloned().unwrap_or_default(),
            enabled_methods,
            object_type: non_empty(fields, FIELD_OBJECT_TYPE).map(str::to_string),
            object_size,
        })
    }

    /// Whether the filter declares itself enabled for `method`
    #[must_use]
    pub fn is_enabled_for(&self, method: &Method) -> bool {
        self.enabled_methods.contains(method.as_str())
    }

    /// Execution record for this filter at position `index`
    #[must_use]
    pub fn to_record(&self, index: usize) -> ExecutionRecord {
        ExecutionRecord {
            index,
            filter_name: self.name.clone(),
            filter_id: self.id.clone(),
            params: self.params.clone(),
            execution_tier: self.execution_tier,
            reverse_tier: self.reverse_tier,
        }
    }
}

/// Boolean flag as written by the controller (`True`, `1`, `yes`, `on`, ...)
#[must_use]
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on" | "t" | "y"
    )
}

fn non_empty<'a>(fields: &'a FieldMap, field: &str) -> Option<&'a str> {
    fields
        .get(field)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn parse_tier(name: &str, fields: &FieldMap, field: &str) -> Result<Option<Tier>> {
    non_empty(fields, field)
        .map(|v| v.parse::<Tier>())
        .transpose()
        .map_err(|e| Error::invalid_filter(name, e.to_string()))
}
