//! Crystal middleware - filter orchestration for both tiers
//!
//! This crate hosts the axum middleware that runs in front of the proxy and
//! the storage node. The tier is chosen by configuration; each tier has its
//! own orchestrator ([`proxy`], [`node`]).
//!
//! Filter execution, metadata persistence and admission control are reached
//! through traits so the layer can be hosted against any backend.

pub mod admission;
pub mod body;
pub mod gateway;
pub mod layer;
pub mod metrics;
mod node;
mod proxy;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;

pub use admission::{AdmissionControl, MeteredAdmission};
pub use gateway::{FilterGateway, FilterInvocation};
pub use layer::{FilterLayer, filter_layer};
pub use metrics::{FilterMetrics, RequestOutcome, filter_metrics};
pub use writer::ExtendedMetadataWriter;
