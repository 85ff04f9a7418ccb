/// Origin fetch pipeline
///
/// Runs with the entity's write lock held: recheck, fetch, filter, verify
/// the root and its entity ID, then store. Non-fatal failures end the attempt
/// and the caller gets whatever was cached before. Fatal ones are returned.
use super::{
    store::{EntityState, ManagementRecord},
    ResolverInner,
};
use crate::{
    error::{ResolverError, ResolverResult},
    filter::MetadataFilter,
    metadata::{EntityDescriptor, MetadataDocument},
    metrics,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How a fetch attempt ended when nothing failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateOutcome {
    /// New descriptor stored
    Updated,
    /// Origin has nothing for the entity ID
    NotFound,
    /// Filter chain dropped the document
    FilteredOut,
    /// Filtered root was not a single entity descriptor
    NotAnEntity,
    /// Descriptor named a different entity ID
    IdentifierMismatch,
}

impl UpdateOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            UpdateOutcome::Updated => "updated",
            UpdateOutcome::NotFound => "not_found",
            UpdateOutcome::FilteredOut => "filtered_out",
            UpdateOutcome::NotAnEntity => "not_an_entity",
            UpdateOutcome::IdentifierMismatch => "identifier_mismatch",
        }
    }
}

impl ResolverInner {
    /// Refresh from the origin if still due, returning the current descriptors
    pub(super) async fn resolve_from_origin(
        &self,
        record: &ManagementRecord,
        state: &mut EntityState,
    ) -> ResolverResult<Vec<Arc<EntityDescriptor>>> {
        let entity_id = record.entity_id();

        let now = self.clock.now();
        if !self
            .policy
            .should_refresh(now, state.refresh_trigger, state.has_descriptors())
        {
            debug!(
                "Metadata for entity ID '{}' was refreshed while waiting for the lock",
                entity_id
            );
            record.record_access(now);
            metrics::record_resolve("hit");
            return Ok(state.descriptors.clone());
        }

        match self.fetch_and_process(entity_id, state).await {
            Ok(outcome) => {
                debug!(
                    "Origin fetch for entity ID '{}' finished: {}",
                    entity_id,
                    outcome.as_str()
                );
                metrics::record_metadata_processed(outcome.as_str());
            }
            Err(e) if e.is_fatal() => {
                error!(
                    "Fatal error resolving metadata for entity ID '{}': {}",
                    entity_id, e
                );
                metrics::record_metadata_processed(e.kind());
                metrics::record_resolve("error");
                return Err(e);
            }
            Err(e) => {
                error!(
                    "Error fetching or processing metadata for entity ID '{}': {}",
                    entity_id, e
                );
                metrics::record_metadata_processed(e.kind());
            }
        }

        record.record_access(self.clock.now());
        metrics::record_resolve(if state.has_descriptors() {
            "fetched"
        } else {
            "empty"
        });
        Ok(state.descriptors.clone())
    }

    async fn fetch_and_process(
        &self,
        entity_id: &str,
        state: &mut EntityState,
    ) -> ResolverResult<UpdateOutcome> {
        let document = match self.transport.fetch(entity_id).await? {
            Some(document) => document,
            None => {
                debug!("Origin returned no metadata for entity ID: {}", entity_id);
                return Ok(UpdateOutcome::NotFound);
            }
        };

        self.process_new_metadata(entity_id, document, state)
    }

    /// Filter and verify a fetched document, storing it when accepted
    pub(super) fn process_new_metadata(
        &self,
        entity_id: &str,
        document: MetadataDocument,
        state: &mut EntityState,
    ) -> ResolverResult<UpdateOutcome> {
        let filtered = self.filter.filter(document).map_err(|e| match e {
            ResolverError::Filter(_) => e,
            other => ResolverError::Filter(other.to_string()),
        })?;

        let filtered = match filtered {
            Some(document) => document,
            None => {
                info!(
                    "Metadata filtering process produced a null document for entity ID: {}",
                    entity_id
                );
                return Ok(UpdateOutcome::FilteredOut);
            }
        };

        let descriptor = match filtered {
            MetadataDocument::Entity(descriptor) => descriptor,
            other => {
                warn!(
                    "Fetched metadata for entity ID '{}' has root {}, expected EntityDescriptor; discarding",
                    entity_id,
                    other.kind()
                );
                return Ok(UpdateOutcome::NotAnEntity);
            }
        };

        if descriptor.entity_id != entity_id {
            warn!(
                "Fetched metadata names entity ID '{}' but '{}' was requested; discarding",
                descriptor.entity_id, entity_id
            );
            return Ok(UpdateOutcome::IdentifierMismatch);
        }

        let now = self.clock.now();
        let expiration = self
            .policy
            .compute_expiration(&descriptor, self.extractor.as_ref(), now);
        let refresh_trigger = self.policy.compute_refresh_trigger(expiration, now);

        debug!(
            "Metadata for entity ID '{}' expires at {} and is due for refresh at {}",
            entity_id, expiration, refresh_trigger
        );

        state.replace(descriptor, now, expiration, refresh_trigger);
        Ok(UpdateOutcome::Updated)
    }
}
