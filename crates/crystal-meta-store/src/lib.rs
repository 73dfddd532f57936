//! Crystal metadata store clients
//!
//! Filter chains, filter definitions and content-type allow-lists live in a
//! shared key-value store. This crate defines the key schema, the
//! [`MetadataClient`] contract the pipeline consumes, and two clients: one
//! backed by Redis and one held in memory.

pub mod client;
pub mod error;
pub mod keys;
pub mod memory;
pub mod redis_store;

pub use client::{FieldMap, MetadataClient};
pub use error::{MetaStoreError, MetaStoreResult};
pub use memory::MemoryMetadataStore;
pub use redis_store::RedisMetadataStore;
