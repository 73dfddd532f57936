//! Crystal pipeline
//!
//! Decides which filters run for a request and in which order:
//!
//! - [`resolver`]: finds the filter chain for an account/container/object
//! - [`filter`]: parses a filter definition from its stored metadata
//! - [`eligibility`]: per-filter method, content-type and size conditions
//! - [`builder`]: ordered execution lists for the write and read paths
//! - [`codec`]: execution lists and object metadata on the wire

pub mod builder;
pub mod codec;
pub mod eligibility;
pub mod filter;
pub mod resolver;

pub use builder::{ExecutionListBuilder, ExecutionPlan, FilterMetadata, read_order};
pub use eligibility::{EligibilityInput, is_eligible};
pub use filter::{ComparisonOp, FilterSpec, SizeCondition};
pub use resolver::{PipelineResolver, ResolvedPipeline};
