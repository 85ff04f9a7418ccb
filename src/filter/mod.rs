/// Metadata filter chain
///
/// Filters run on every freshly fetched document before anything is cached.
/// A filter may pass the document through (possibly modified), drop it by
/// returning `None`, or fail with [`ResolverError::Filter`] when the document
/// must not be trusted.

pub mod builtin;

pub use builtin::{EntityRoleFilter, RequiredValidUntilFilter};

use crate::{
    error::{ResolverError, ResolverResult},
    metadata::MetadataDocument,
};
use tracing::debug;

/// A single trust/validation step applied to fetched metadata
pub trait MetadataFilter: Send + Sync {
    /// Filter the document, returning the document to keep (if any)
    fn filter(&self, document: MetadataDocument) -> ResolverResult<Option<MetadataDocument>>;

    /// Name used in logs
    fn name(&self) -> &str {
        "anonymous"
    }
}

impl<F> MetadataFilter for F
where
    F: Fn(MetadataDocument) -> ResolverResult<Option<MetadataDocument>> + Send + Sync,
{
    fn filter(&self, document: MetadataDocument) -> ResolverResult<Option<MetadataDocument>> {
        self(document)
    }
}

/// Ordered sequence of filters; an empty chain passes documents unchanged
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn MetadataFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter to the end of the chain
    pub fn with(mut self, filter: impl MetadataFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn push(&mut self, filter: Box<dyn MetadataFilter>) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl MetadataFilter for FilterChain {
    fn filter(&self, document: MetadataDocument) -> ResolverResult<Option<MetadataDocument>> {
        let mut current = document;

        for filter in &self.filters {
            match filter.filter(current) {
                Ok(Some(next)) => current = next,
                Ok(None) => {
                    debug!("Metadata filter '{}' removed the document", filter.name());
                    return Ok(None);
                }
                Err(ResolverError::Filter(msg)) => {
                    return Err(ResolverError::Filter(format!("{}: {}", filter.name(), msg)));
                }
                Err(e) => {
                    return Err(ResolverError::Filter(format!("{}: {}", filter.name(), e)));
                }
            }
        }

        Ok(Some(current))
    }

    fn name(&self) -> &str {
        "chain"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::EntityDescriptor;

    type Output = ResolverResult<Option<MetadataDocument>>;

    fn entity_doc(id: &str) -> MetadataDocument {
        EntityDescriptor::new(id).into()
    }

    #[test]
    fn test_empty_chain_passes_through() {
        let chain = FilterChain::new();
        assert!(chain.is_empty());

        let out = chain.filter(entity_doc("a")).unwrap();
        assert_eq!(out, Some(entity_doc("a")));
    }

    #[test]
    fn test_chain_applies_filters_in_order() {
        let chain = FilterChain::new()
            .with(|doc: MetadataDocument| -> Output {
                match doc {
                    MetadataDocument::Entity(mut e) => {
                        e.entity_id.push_str("/first");
                        Ok(Some(MetadataDocument::Entity(e)))
                    }
                    other => Ok(Some(other)),
                }
            })
            .with(|doc: MetadataDocument| -> Output {
                match doc {
                    MetadataDocument::Entity(mut e) => {
                        e.entity_id.push_str("/second");
                        Ok(Some(MetadataDocument::Entity(e)))
                    }
                    other => Ok(Some(other)),
                }
            });

        assert_eq!(chain.len(), 2);
        let out = chain.filter(entity_doc("a")).unwrap();
        assert_eq!(out, Some(entity_doc("a/first/second")));
    }

    #[test]
    fn test_none_short_circuits() {
        let chain = FilterChain::new()
            .with(|_doc: MetadataDocument| -> Output { Ok(None) })
            .with(|_doc: MetadataDocument| -> Output {
                panic!("must not be reached")
            });

        assert_eq!(chain.filter(entity_doc("a")).unwrap(), None);
    }

    #[test]
    fn test_failure_becomes_filter_error() {
        let chain = FilterChain::new().with(|_doc: MetadataDocument| -> Output {
            Err(ResolverError::Transport("unexpected".to_string()))
        });

        match chain.filter(entity_doc("a")) {
            Err(ResolverError::Filter(msg)) => assert!(msg.contains("unexpected")),
            other => panic!("expected filter error, got {:?}", other),
        }
    }
}
