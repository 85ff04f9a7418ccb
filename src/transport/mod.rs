/// Origin transports
///
/// A transport fetches the raw metadata document for one entity ID from
/// wherever it is published. `Ok(None)` means the origin has no metadata for
/// the entity; errors are transport failures and never reach callers of the
/// resolver directly.

pub mod http;

pub use http::HttpOriginTransport;

use crate::{error::ResolverResult, metadata::MetadataDocument};
use async_trait::async_trait;

/// Fetches metadata documents from an origin
#[async_trait]
pub trait OriginTransport: Send + Sync {
    /// Fetch the document published for `entity_id`
    async fn fetch(&self, entity_id: &str) -> ResolverResult<Option<MetadataDocument>>;
}
