//! Crystal Common - Shared types and utilities
//!
//! This crate provides the data model, request context, error definitions
//! and configuration used by every Crystal component.

pub mod config;
pub mod context;
pub mod error;
pub mod types;

pub use config::{Config, MetadataStoreConfig};
pub use context::{NotApplicable, RequestContext, Verb};
pub use error::{Error, Result};
pub use types::*;
