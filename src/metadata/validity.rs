/// Validity extraction for cache expiration computation
use super::EntityDescriptor;
use chrono::{DateTime, Utc};

/// Computes the earliest declared expiration of a descriptor
pub trait ValidityExtractor: Send + Sync {
    /// Earliest expiration declared by `descriptor` or any element it
    /// contains, never later than `upper_bound`
    fn earliest_expiration(
        &self,
        descriptor: &EntityDescriptor,
        upper_bound: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc>;
}

/// Default extractor: minimum of `validUntil` and `now + cacheDuration`
/// over the entity and every role it carries
#[derive(Debug, Clone, Copy, Default)]
pub struct EarliestExpiration;

impl ValidityExtractor for EarliestExpiration {
    fn earliest_expiration(
        &self,
        descriptor: &EntityDescriptor,
        upper_bound: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        std::iter::once(&descriptor.validity)
            .chain(descriptor.roles.iter().map(|role| &role.validity))
            .filter_map(|validity| validity.earliest_expiration(now))
            .fold(upper_bound, |earliest, candidate| earliest.min(candidate))
    }
}
