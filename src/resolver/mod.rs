/// Dynamic metadata resolver
///
/// Resolves trust metadata for one entity ID at a time, fetching from the
/// origin on a cache miss or once a refresh is due. Concurrent misses for the
/// same entity ID collapse into a single origin fetch; entity IDs never wait
/// on each other. A background sweeper evicts idle and expired entries.

mod fetch;
mod policy;
mod store;
mod sweeper;

pub use policy::RefreshPolicy;
pub use store::ManagementSnapshot;
pub use sweeper::SweepReport;

use crate::{
    clock::{Clock, SystemClock},
    config::ResolverConfig,
    error::{ResolverError, ResolverResult},
    filter::{FilterChain, MetadataFilter},
    jobs::{JobScheduler, JobStatus, ScheduledJob},
    metadata::{Criteria, EarliestExpiration, EntityDescriptor, ValidityExtractor},
    transport::OriginTransport,
};
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc, Mutex, PoisonError,
};
use store::EntityBackingStore;
use tracing::{debug, info};

/// Name of the cleanup job on the scheduler
pub const SWEEPER_JOB_NAME: &str = "metadata_sweeper";

const UNINITIALIZED: u8 = 0;
const INITIALIZED: u8 = 1;
const DESTROYED: u8 = 2;

/// Resolver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Destroyed,
}

/// Running sweeper and the scheduler it was placed on
struct SweeperHandle {
    job: ScheduledJob,
    scheduler: Arc<JobScheduler>,
    owns_scheduler: bool,
}

pub(crate) struct ResolverInner {
    transport: Box<dyn OriginTransport>,
    filter: FilterChain,
    extractor: Arc<dyn ValidityExtractor>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    max_idle_duration: chrono::Duration,
    config: ResolverConfig,
    store: EntityBackingStore,
    lifecycle: AtomicU8,
    external_scheduler: Option<Arc<JobScheduler>>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl ResolverInner {
    fn lifecycle(&self) -> LifecycleState {
        match self.lifecycle.load(Ordering::SeqCst) {
            UNINITIALIZED => LifecycleState::Uninitialized,
            INITIALIZED => LifecycleState::Initialized,
            _ => LifecycleState::Destroyed,
        }
    }

    fn ensure_initialized(&self) -> ResolverResult<()> {
        match self.lifecycle() {
            LifecycleState::Initialized => Ok(()),
            LifecycleState::Uninitialized => Err(ResolverError::Resolution(
                "Metadata resolver has not been initialized".to_string(),
            )),
            LifecycleState::Destroyed => Err(ResolverError::Resolution(
                "Metadata resolver has been destroyed".to_string(),
            )),
        }
    }

    /// Cached descriptors for `entity_id`, refreshing from the origin when due
    async fn resolve_entity(&self, entity_id: &str) -> ResolverResult<Vec<Arc<EntityDescriptor>>> {
        loop {
            let now = self.clock.now();
            let record = self
                .store
                .get_or_create(entity_id, now, self.policy.default_window(now));

            {
                let state = record.state.read().await;
                if state.evicted {
                    debug!("Entity ID '{}' was evicted while waiting, retrying", entity_id);
                    continue;
                }

                let now = self.clock.now();
                if !self
                    .policy
                    .should_refresh(now, state.refresh_trigger, state.has_descriptors())
                {
                    debug!("Metadata cache hit for entity ID: {}", entity_id);
                    record.record_access(now);
                    crate::metrics::record_resolve("hit");
                    return Ok(state.descriptors.clone());
                }
            }

            debug!(
                "Metadata for entity ID '{}' is missing or due for refresh, resolving from origin",
                entity_id
            );

            let mut state = record.state.write().await;
            if state.evicted {
                debug!("Entity ID '{}' was evicted while waiting, retrying", entity_id);
                continue;
            }

            return self.resolve_from_origin(&record, &mut state).await;
        }
    }

    /// Descriptors that may be handed to callers right now
    fn visible(&self, descriptors: Vec<Arc<EntityDescriptor>>) -> Vec<Arc<EntityDescriptor>> {
        if !self.config.require_valid_metadata {
            return descriptors;
        }

        let now = self.clock.now();
        descriptors
            .into_iter()
            .filter(|descriptor| {
                let valid = descriptor.is_valid_at(now);
                if !valid {
                    debug!(
                        "Omitting metadata for entity ID '{}' whose validUntil has passed",
                        descriptor.entity_id
                    );
                }
                valid
            })
            .collect()
    }
}

/// Builder for [`DynamicMetadataResolver`]
pub struct ResolverBuilder {
    transport: Box<dyn OriginTransport>,
    config: ResolverConfig,
    filter: FilterChain,
    extractor: Arc<dyn ValidityExtractor>,
    clock: Arc<dyn Clock>,
    scheduler: Option<Arc<JobScheduler>>,
}

impl ResolverBuilder {
    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a filter; filters run in the order they were added
    pub fn filter(mut self, filter: impl MetadataFilter + 'static) -> Self {
        self.filter.push(Box::new(filter));
        self
    }

    pub fn validity_extractor(mut self, extractor: Arc<dyn ValidityExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run the sweeper on an externally owned scheduler
    ///
    /// The resolver only cancels its own job on destroy; the scheduler keeps
    /// running.
    pub fn scheduler(mut self, scheduler: Arc<JobScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Validate the configuration and build an uninitialized resolver
    pub fn build(self) -> ResolverResult<DynamicMetadataResolver> {
        self.config.validate()?;
        let policy = RefreshPolicy::from_config(&self.config)?;
        let max_idle_duration = policy::to_chrono(self.config.max_idle_duration)?;

        Ok(DynamicMetadataResolver {
            inner: Arc::new(ResolverInner {
                transport: self.transport,
                filter: self.filter,
                extractor: self.extractor,
                clock: self.clock,
                policy,
                max_idle_duration,
                config: self.config,
                store: EntityBackingStore::new(),
                lifecycle: AtomicU8::new(UNINITIALIZED),
                external_scheduler: self.scheduler,
                sweeper: Mutex::new(None),
            }),
        })
    }
}

/// Resolves entity metadata on demand with per-entity caching
///
/// ```no_run
/// # async fn example() -> aurora_trust_resolver::ResolverResult<()> {
/// use aurora_trust_resolver::{config::OriginConfig, Criteria, DynamicMetadataResolver, HttpOriginTransport};
///
/// let transport = HttpOriginTransport::new(OriginConfig::default())?;
/// let resolver = DynamicMetadataResolver::builder(transport).build()?;
/// resolver.initialize()?;
///
/// let descriptors = resolver
///     .resolve(&Criteria::entity_id("https://idp.example.org/idp"))
///     .await?;
/// println!("{} descriptors", descriptors.len());
///
/// resolver.destroy();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DynamicMetadataResolver {
    inner: Arc<ResolverInner>,
}

impl DynamicMetadataResolver {
    pub fn builder(transport: impl OriginTransport + 'static) -> ResolverBuilder {
        ResolverBuilder {
            transport: Box::new(transport),
            config: ResolverConfig::default(),
            filter: FilterChain::new(),
            extractor: Arc::new(EarliestExpiration),
            clock: Arc::new(SystemClock),
            scheduler: None,
        }
    }

    /// Start the resolver and schedule the cleanup sweeper
    ///
    /// Without an injected scheduler this must be called from within a tokio
    /// runtime. Calling it again on a running resolver is a no-op.
    pub fn initialize(&self) -> ResolverResult<()> {
        let mut sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match self.inner.lifecycle() {
            LifecycleState::Initialized => return Ok(()),
            LifecycleState::Destroyed => {
                return Err(ResolverError::Resolution(
                    "Metadata resolver has been destroyed".to_string(),
                ))
            }
            LifecycleState::Uninitialized => {}
        }

        let (scheduler, owns_scheduler) = match &self.inner.external_scheduler {
            Some(scheduler) => (Arc::clone(scheduler), false),
            None => (Arc::new(JobScheduler::current()?), true),
        };

        self.inner.lifecycle.store(INITIALIZED, Ordering::SeqCst);

        let weak = Arc::downgrade(&self.inner);
        let scheduled = scheduler.schedule(
            SWEEPER_JOB_NAME,
            self.inner.config.cleanup_initial_delay,
            self.inner.config.cleanup_interval,
            move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => {
                            inner.sweep().await;
                            Ok(JobStatus::Continue)
                        }
                        None => Ok(JobStatus::Stop),
                    }
                }
            },
        );

        let job = match scheduled {
            Ok(job) => job,
            Err(e) => {
                self.inner.lifecycle.store(UNINITIALIZED, Ordering::SeqCst);
                return Err(e);
            }
        };

        *sweeper = Some(SweeperHandle {
            job,
            scheduler,
            owns_scheduler,
        });

        info!(
            "Dynamic metadata resolver initialized (cleanup every {:?}, first run after {:?})",
            self.inner.config.cleanup_interval, self.inner.config.cleanup_initial_delay
        );
        Ok(())
    }

    /// Stop the sweeper, drop all cached data and refuse further resolution
    pub fn destroy(&self) {
        let mut sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(handle) = sweeper.take() {
            handle.job.cancel();
            if handle.owns_scheduler {
                handle.scheduler.shutdown();
            }
        }

        let previous = self.inner.lifecycle.swap(DESTROYED, Ordering::SeqCst);
        self.inner.store.clear();

        if previous != DESTROYED {
            info!("Dynamic metadata resolver destroyed");
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.inner.lifecycle()
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.inner.config
    }

    /// Resolve all descriptors for the entity ID in `criteria`
    pub async fn resolve(&self, criteria: &Criteria) -> ResolverResult<Vec<Arc<EntityDescriptor>>> {
        self.inner.ensure_initialized()?;
        let entity_id = criteria.require_entity_id()?;

        debug!("Resolving metadata dynamically for entity ID: {}", entity_id);
        let descriptors = self.inner.resolve_entity(&entity_id).await?;
        Ok(self.inner.visible(descriptors))
    }

    /// First descriptor for the entity ID in `criteria`, if any
    pub async fn resolve_single(
        &self,
        criteria: &Criteria,
    ) -> ResolverResult<Option<Arc<EntityDescriptor>>> {
        Ok(self.resolve(criteria).await?.into_iter().next())
    }

    /// Entity IDs that currently have management data, sorted
    pub fn cached_entity_ids(&self) -> Vec<String> {
        self.inner.store.entity_ids()
    }

    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Management data for `entity_id` if it is tracked
    pub async fn management_snapshot(&self, entity_id: &str) -> Option<ManagementSnapshot> {
        let record = self.inner.store.get(entity_id.trim())?;
        let state = record.state.read().await;
        if state.evicted {
            return None;
        }
        Some(record.snapshot(&state))
    }

    /// Run one cleanup pass now
    pub async fn sweep(&self) -> SweepReport {
        self.inner.sweep().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::metadata::MetadataDocument;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::AtomicUsize;

    struct StaticTransport {
        calls: Arc<AtomicUsize>,
        document: Option<MetadataDocument>,
    }

    #[async_trait]
    impl OriginTransport for StaticTransport {
        async fn fetch(&self, _entity_id: &str) -> ResolverResult<Option<MetadataDocument>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.document.clone())
        }
    }

    fn resolver_for(
        document: Option<MetadataDocument>,
        clock: Arc<ManualClock>,
    ) -> (DynamicMetadataResolver, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = DynamicMetadataResolver::builder(StaticTransport {
            calls: calls.clone(),
            document,
        })
        .clock(clock)
        .build()
        .unwrap();
        (resolver, calls)
    }

    #[tokio::test]
    async fn test_resolve_requires_initialization() {
        let clock = Arc::new(ManualClock::starting_now());
        let (resolver, calls) = resolver_for(None, clock);

        let result = resolver.resolve(&Criteria::entity_id("a")).await;
        assert!(matches!(result, Err(ResolverError::Resolution(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.lifecycle(), LifecycleState::Uninitialized);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let clock = Arc::new(ManualClock::starting_now());
        let (resolver, _) = resolver_for(None, clock);

        resolver.initialize().unwrap();
        resolver.initialize().unwrap();
        assert_eq!(resolver.lifecycle(), LifecycleState::Initialized);

        resolver.destroy();
        assert_eq!(resolver.lifecycle(), LifecycleState::Destroyed);
        assert!(resolver.initialize().is_err());
        assert!(matches!(
            resolver.resolve(&Criteria::entity_id("a")).await,
            Err(ResolverError::Resolution(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_hit_after_first_fetch() {
        let clock = Arc::new(ManualClock::starting_now());
        let doc = EntityDescriptor::new("a").with_valid_until(clock.now() + Duration::hours(2));
        let (resolver, calls) = resolver_for(Some(doc.into()), clock.clone());
        resolver.initialize().unwrap();

        let first = resolver.resolve(&Criteria::entity_id("a")).await.unwrap();
        let second = resolver.resolve(&Criteria::entity_id(" a ")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first[0], &second[0]));

        let snapshot = resolver.management_snapshot("a").await.unwrap();
        assert_eq!(snapshot.descriptor_count, 1);
        assert_eq!(snapshot.last_update, Some(clock.now()));
        assert_eq!(snapshot.expiration, clock.now() + Duration::hours(2));
        assert_eq!(snapshot.refresh_trigger, clock.now() + Duration::minutes(90));

        resolver.destroy();
    }

    #[tokio::test]
    async fn test_refresh_after_trigger() {
        let clock = Arc::new(ManualClock::starting_now());
        let doc = EntityDescriptor::new("a").with_valid_until(clock.now() + Duration::hours(2));
        let (resolver, calls) = resolver_for(Some(doc.into()), clock.clone());
        resolver.initialize().unwrap();

        resolver.resolve(&Criteria::entity_id("a")).await.unwrap();
        clock.advance(Duration::minutes(89));
        resolver.resolve(&Criteria::entity_id("a")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::minutes(1));
        resolver.resolve(&Criteria::entity_id("a")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        resolver.destroy();
    }

    #[tokio::test]
    async fn test_expired_descriptor_hidden_from_results() {
        let clock = Arc::new(ManualClock::starting_now());
        // Already expired: cached for min duration but not handed out
        let doc = EntityDescriptor::new("a").with_valid_until(clock.now() - Duration::minutes(1));
        let (resolver, _) = resolver_for(Some(doc.clone().into()), clock.clone());
        resolver.initialize().unwrap();

        assert!(resolver.resolve(&Criteria::entity_id("a")).await.unwrap().is_empty());
        assert_eq!(
            resolver.management_snapshot("a").await.unwrap().descriptor_count,
            1
        );
        resolver.destroy();

        let calls = Arc::new(AtomicUsize::new(0));
        let lenient = DynamicMetadataResolver::builder(StaticTransport {
            calls,
            document: Some(doc.into()),
        })
        .clock(clock)
        .config(ResolverConfig::default().with_require_valid_metadata(false))
        .build()
        .unwrap();
        lenient.initialize().unwrap();
        assert_eq!(
            lenient
                .resolve_single(&Criteria::entity_id("a"))
                .await
                .unwrap()
                .map(|d| d.entity_id.clone()),
            Some("a".to_string())
        );
        lenient.destroy();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_build() {
        let result = DynamicMetadataResolver::builder(StaticTransport {
            calls: Arc::new(AtomicUsize::new(0)),
            document: None,
        })
        .config(ResolverConfig::default().with_refresh_delay_factor(1.0))
        .build();

        assert!(matches!(result, Err(ResolverError::Configuration(_))));
    }
}
