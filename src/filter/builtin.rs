/// Built-in metadata filters
use super::MetadataFilter;
use crate::{
    clock::{Clock, SystemClock},
    error::{ResolverError, ResolverResult},
    metadata::{EntityDescriptor, MetadataDocument, Validity},
};
use chrono::Duration;
use std::{collections::HashSet, sync::Arc};
use tracing::debug;

/// Requires a `validUntil` on the document root, optionally bounding how far
/// in the future it may lie
pub struct RequiredValidUntilFilter {
    max_validity_interval: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl RequiredValidUntilFilter {
    /// Require `validUntil` without an upper bound on its distance
    pub fn new() -> Self {
        Self {
            max_validity_interval: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Reject documents valid for longer than `max` from now
    pub fn with_max_validity_interval(mut self, max: Duration) -> Self {
        self.max_validity_interval = Some(max);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn check(&self, validity: &Validity) -> ResolverResult<()> {
        let valid_until = validity.valid_until.ok_or_else(|| {
            ResolverError::Filter("Metadata did not include a validUntil attribute".to_string())
        })?;

        // A bound past the representable range constrains nothing
        let limit = self
            .max_validity_interval
            .and_then(|max| self.clock.now().checked_add_signed(max).map(|limit| (max, limit)));

        if let Some((max, limit)) = limit {
            if valid_until > limit {
                return Err(ResolverError::Filter(format!(
                    "Metadata's validity interval extends beyond the maximum of {} seconds",
                    max.num_seconds()
                )));
            }
        }

        Ok(())
    }
}

impl Default for RequiredValidUntilFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataFilter for RequiredValidUntilFilter {
    fn filter(&self, document: MetadataDocument) -> ResolverResult<Option<MetadataDocument>> {
        match &document {
            MetadataDocument::Entity(entity) => self.check(&entity.validity)?,
            MetadataDocument::Group(group) => self.check(&group.validity)?,
        }
        Ok(Some(document))
    }

    fn name(&self) -> &str {
        "required-valid-until"
    }
}

/// Retains only whitelisted roles; entities left without any role are removed
pub struct EntityRoleFilter {
    retained_roles: HashSet<String>,
    remove_roleless_entities: bool,
}

impl EntityRoleFilter {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            retained_roles: roles.into_iter().map(Into::into).collect(),
            remove_roleless_entities: true,
        }
    }

    /// Keep entities even when all of their roles were filtered out
    pub fn keep_roleless_entities(mut self) -> Self {
        self.remove_roleless_entities = false;
        self
    }

    /// Returns false when the entity should be dropped
    fn retain_roles(&self, entity: &mut EntityDescriptor) -> bool {
        entity
            .roles
            .retain(|role| self.retained_roles.contains(&role.role));

        if entity.roles.is_empty() && self.remove_roleless_entities {
            debug!(
                "Entity '{}' has no retained roles, removing it",
                entity.entity_id
            );
            return false;
        }
        true
    }
}

impl MetadataFilter for EntityRoleFilter {
    fn filter(&self, document: MetadataDocument) -> ResolverResult<Option<MetadataDocument>> {
        match document {
            MetadataDocument::Entity(mut entity) => {
                if self.retain_roles(&mut entity) {
                    Ok(Some(MetadataDocument::Entity(entity)))
                } else {
                    Ok(None)
                }
            }
            MetadataDocument::Group(mut group) => {
                group.entities.retain_mut(|entity| self.retain_roles(entity));
                Ok(Some(MetadataDocument::Group(group)))
            }
        }
    }

    fn name(&self) -> &str {
        "entity-role"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::metadata::{EntitiesDescriptor, RoleDescriptor};
    use chrono::Utc;

    #[test]
    fn test_missing_valid_until_is_rejected() {
        let filter = RequiredValidUntilFilter::new();
        let doc = MetadataDocument::from(EntityDescriptor::new("https://idp.example.org"));

        assert!(matches!(filter.filter(doc), Err(ResolverError::Filter(_))));
    }

    #[test]
    fn test_validity_interval_bound() {
        let clock = Arc::new(ManualClock::starting_now());
        let now = clock.now();
        let filter = RequiredValidUntilFilter::new()
            .with_max_validity_interval(Duration::days(14))
            .with_clock(clock);

        let ok = EntityDescriptor::new("a").with_valid_until(now + Duration::days(7));
        assert!(filter.filter(ok.into()).unwrap().is_some());

        let too_long = EntityDescriptor::new("b").with_valid_until(now + Duration::days(30));
        assert!(filter.filter(too_long.into()).is_err());
    }

    #[test]
    fn test_unrepresentable_validity_bound_is_unbounded() {
        let clock = Arc::new(ManualClock::starting_now());
        let now = clock.now();
        let filter = RequiredValidUntilFilter::new()
            .with_max_validity_interval(Duration::MAX)
            .with_clock(clock);

        let far = EntityDescriptor::new("a").with_valid_until(now + Duration::days(365 * 1000));
        assert!(filter.filter(far.into()).unwrap().is_some());

        let missing = EntityDescriptor::new("b");
        assert!(filter.filter(missing.into()).is_err());
    }

    #[test]
    fn test_role_filter_on_entity() {
        let filter = EntityRoleFilter::new(["idp"]);

        let entity = EntityDescriptor::new("a")
            .with_role(RoleDescriptor::new("idp"))
            .with_role(RoleDescriptor::new("sp"));
        let out = filter.filter(entity.into()).unwrap();
        match out {
            Some(MetadataDocument::Entity(e)) => {
                assert_eq!(e.roles.len(), 1);
                assert_eq!(e.roles[0].role, "idp");
            }
            other => panic!("unexpected output: {:?}", other),
        }

        let sp_only = EntityDescriptor::new("b").with_role(RoleDescriptor::new("sp"));
        assert_eq!(filter.filter(sp_only.clone().into()).unwrap(), None);

        let keep = EntityRoleFilter::new(["idp"]).keep_roleless_entities();
        assert!(keep.filter(sp_only.into()).unwrap().is_some());
    }

    #[test]
    fn test_role_filter_on_group() {
        let filter = EntityRoleFilter::new(["sp"]);
        let group = EntitiesDescriptor {
            name: None,
            validity: Validity {
                valid_until: Some(Utc::now()),
                cache_duration_secs: None,
            },
            entities: vec![
                EntityDescriptor::new("a").with_role(RoleDescriptor::new("idp")),
                EntityDescriptor::new("b").with_role(RoleDescriptor::new("sp")),
            ],
        };

        match filter.filter(MetadataDocument::Group(group)).unwrap() {
            Some(MetadataDocument::Group(g)) => {
                assert_eq!(g.entities.len(), 1);
                assert_eq!(g.entities[0].entity_id, "b");
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }
}
