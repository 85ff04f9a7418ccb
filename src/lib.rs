/// Aurora Trust Resolver - dynamic federation trust metadata resolution
///
/// Fetches entity metadata from an origin on demand, caches it within
/// bounded expiration and refresh windows, and evicts idle or expired
/// entries in the background.

pub mod clock;
pub mod config;
pub mod error;
pub mod filter;
pub mod jobs;
pub mod metadata;
pub mod metrics;
pub mod resolver;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, LoggingConfig, OriginConfig, ResolverConfig};
pub use error::{ResolverError, ResolverResult};
pub use filter::{EntityRoleFilter, FilterChain, MetadataFilter, RequiredValidUntilFilter};
pub use jobs::{JobScheduler, JobStatus, ScheduledJob};
pub use metadata::{
    Criteria, EarliestExpiration, EntitiesDescriptor, EntityDescriptor, MetadataDocument,
    ValidityExtractor,
};
pub use resolver::{
    DynamicMetadataResolver, LifecycleState, ManagementSnapshot, RefreshPolicy, ResolverBuilder,
    SweepReport,
};
pub use transport::{HttpOriginTransport, OriginTransport};
