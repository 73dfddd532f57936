//! Execution list construction
//!
//! On the write path the resolved chain is filtered by eligibility and
//! numbered in chain order. On the read path the persisted write-time records
//! run first in descending index order, undoing the write, followed by any
//! filters delegated for this read in ascending order.

use crate::eligibility::{EligibilityInput, is_eligible};
use crate::filter::{FIELD_ID, FilterSpec};
use crate::resolver::ResolvedPipeline;
use crystal_common::{Error, ExecutionRecord, RequestContext, Result, ScheduledFilter};
use crystal_meta_store::{FieldMap, MetadataClient, keys};
use std::collections::HashMap;
use tracing::debug;

/// Merged metadata per filter name, handed to the filter gateway
pub type FilterMetadata = HashMap<String, FieldMap>;

/// Write-path execution list and the metadata of every candidate filter
#[derive(Clone, Debug, Default)]
pub struct ExecutionPlan {
    pub records: Vec<ExecutionRecord>,
    pub metadata: FilterMetadata,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Builds execution lists from the metadata store
pub struct ExecutionListBuilder<'a> {
    store: &'a dyn MetadataClient,
}

impl<'a> ExecutionListBuilder<'a> {
    pub fn new(store: &'a dyn MetadataClient) -> Self {
        Self { store }
    }

    /// Build the execution list for the resolved chain and this request
    pub async fn build(
        &self,
        pipeline: &ResolvedPipeline,
        ctx: &RequestContext,
    ) -> Result<ExecutionPlan> {
        let input = EligibilityInput::from_context(ctx);
        let mut plan = ExecutionPlan::default();

        for name in &pipeline.filters {
            let specific_key = keys::filter(&pipeline.target, name);
            let specific = self.store.hash(&specific_key).await?;
            let id = specific
                .get(FIELD_ID)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| Error::MissingFilterId {
                    filter: name.clone(),
                    key: specific_key.clone(),
                })?;

            // Specific metadata overrides generic on collision
            let mut merged = self.generic(name, id).await?;
            merged.extend(specific.iter().map(|(k, v)| (k.clone(), v.clone())));

            let spec = FilterSpec::from_metadata(name, &merged)?;
            let allowed_types = match &spec.object_type {
                Some(category) => Some(
                    self.store
                        .list(&keys::object_type(category))
                        .await?
                        .unwrap_or_default(),
                ),
                None => None,
            };

            if is_eligible(&spec, &input, allowed_types.as_deref()) {
                plan.records.push(spec.to_record(plan.records.len()));
            } else {
                debug!("Filter {} not eligible for {} {}", name, ctx.method(), ctx.pipeline_key());
            }
            plan.metadata.insert(name.clone(), merged);
        }

        Ok(plan)
    }

    /// Fetch generic metadata for every record whose filter is not in `metadata` yet
    pub async fn load_generic(
        &self,
        records: &[ExecutionRecord],
        metadata: &mut FilterMetadata,
    ) -> Result<()> {
        for record in records {
            if metadata.contains_key(&record.filter_name) {
                continue;
            }
            let generic = self.generic(&record.filter_name, &record.filter_id).await?;
            metadata.insert(record.filter_name.clone(), generic);
        }
        Ok(())
    }

    /// Read-path list for the storage node: `persisted` reversed, then `delegated`
    pub async fn build_read_list(
        &self,
        persisted: &[ExecutionRecord],
        delegated: &[ExecutionRecord],
    ) -> Result<(Vec<ScheduledFilter>, FilterMetadata)> {
        let scheduled = read_order(persisted, delegated);
        let mut metadata = FilterMetadata::new();
        for filter in &scheduled {
            self.load_generic(std::slice::from_ref(&filter.record), &mut metadata)
                .await?;
        }
        Ok((scheduled, metadata))
    }

    async fn generic(&self, filter: &str, id: &str) -> Result<FieldMap> {
        let generic = self.store.hash(&keys::generic(id)).await?;
        if generic.is_empty() {
            return Err(Error::MissingFilterMetadata {
                filter: filter.to_string(),
                id: id.to_string(),
            });
        }
        Ok(generic)
    }
}

/// Read-path ordering: persisted records by descending index in reverse mode,
/// then delegated records by ascending index in forward mode.
#[must_use]
pub fn read_order(
    persisted: &[ExecutionRecord],
    delegated: &[ExecutionRecord],
) -> Vec<ScheduledFilter> {
    let mut undo: Vec<&ExecutionRecord> = persisted.iter().collect();
    undo.sort_by(|a, b| b.index.cmp(&a.index));

    let mut apply: Vec<&ExecutionRecord> = delegated.iter().collect();
    apply.sort_by_key(|r| r.index);

    undo.into_iter()
        .cloned()
        .map(ScheduledFilter::reverse)
        .chain(apply.into_iter().cloned().map(ScheduledFilter::forward))
        .collect()
}
