//! Key schema of the metadata store.
//!
//! | key                         | type | content                               |
//! |-----------------------------|------|---------------------------------------|
//! | `pipeline:<target>`         | list | filter names, pushed head-first       |
//! | `<target>:<filter>`         | hash | `id`, `object_type`, `object_size`    |
//! | `storlet:<id>`              | hash | tiers, `params`, `is_<method>` flags  |
//! | `object_type:<category>`    | list | allowed mime types                    |
//! | `account:<account>`         | hash | `storlet-enabled`                     |
//!
//! `<target>` is `account`, `account/container` or `account/container/object`.

/// Filter chain registered for a target
pub fn pipeline(target: &str) -> String {
    format!("pipeline:{target}")
}

/// Per-target (specific) metadata of a filter
pub fn filter(target: &str, filter_name: &str) -> String {
    format!("{target}:{filter_name}")
}

/// Generic metadata of a filter, shared by every target using it
pub fn generic(filter_id: &str) -> String {
    format!("storlet:{filter_id}")
}

/// Allowed mime types of an object type category
pub fn object_type(category: &str) -> String {
    format!("object_type:{category}")
}

/// Account-level feature flags
pub fn account(account: &str) -> String {
    format!("account:{account}")
}

/// Field of [`account`] enabling filters for the account
pub const ACCOUNT_ENABLED_FIELD: &str = "storlet-enabled";
