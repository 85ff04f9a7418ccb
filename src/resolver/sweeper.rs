/// Background cleanup of idle and expired entries
use super::{policy::saturating_sub, ResolverInner};
use crate::metrics;
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Longest the sweeper waits for one entity's write lock before skipping it
pub(crate) const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries evicted for not being accessed within the idle window
    pub idle: usize,
    /// Entries evicted because their expiration passed
    pub expired: usize,
    /// Entries whose lock could not be taken in time
    pub skipped: usize,
}

impl SweepReport {
    pub fn evicted(&self) -> usize {
        self.idle + self.expired
    }
}

impl ResolverInner {
    pub(super) async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        if self.ensure_initialized().is_err() {
            debug!("Metadata resolver is not initialized or has been destroyed, skipping cleanup");
            return report;
        }

        let now = self.clock.now();
        let idle_cutoff = saturating_sub(now, self.max_idle_duration);
        debug!("Starting metadata cleanup pass at {}", now);

        for record in self.store.records() {
            let mut state = match timeout(LOCK_ACQUIRE_TIMEOUT, record.state.write()).await {
                Ok(state) => state,
                Err(_) => {
                    warn!(
                        "Timed out waiting for lock on entity ID '{}', skipping until next cleanup",
                        record.entity_id()
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            if state.evicted {
                continue;
            }

            if self.config.remove_idle_data && record.last_accessed() < idle_cutoff {
                debug!(
                    "Removing idle metadata for entity ID '{}', last accessed {}",
                    record.entity_id(),
                    record.last_accessed()
                );
                self.store.evict(&record, &mut state);
                metrics::record_eviction("idle");
                report.idle += 1;
            } else if now > state.expiration {
                debug!(
                    "Removing expired metadata for entity ID '{}', expired at {}",
                    record.entity_id(),
                    state.expiration
                );
                self.store.evict(&record, &mut state);
                metrics::record_eviction("expired");
                report.expired += 1;
            }
        }

        if report.evicted() > 0 || report.skipped > 0 {
            info!(
                "Metadata cleanup removed {} idle and {} expired entries ({} skipped)",
                report.idle, report.expired, report.skipped
            );
        } else {
            debug!("Metadata cleanup found nothing to remove");
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        clock::{Clock, ManualClock},
        config::ResolverConfig,
        error::ResolverResult,
        metadata::{Criteria, EntityDescriptor, MetadataDocument},
        resolver::DynamicMetadataResolver,
        transport::OriginTransport,
    };
    use super::SweepReport;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Arc;
    use tokio::sync::Notify;

    struct EchoTransport {
        valid_for: Duration,
        clock: Arc<ManualClock>,
    }

    #[async_trait]
    impl OriginTransport for EchoTransport {
        async fn fetch(&self, entity_id: &str) -> ResolverResult<Option<MetadataDocument>> {
            let descriptor =
                EntityDescriptor::new(entity_id).with_valid_until(self.clock.now() + self.valid_for);
            Ok(Some(descriptor.into()))
        }
    }

    /// Holds the fetch for "a" until released
    struct GatedTransport {
        started: Arc<Notify>,
        release: Arc<Notify>,
        clock: Arc<ManualClock>,
    }

    #[async_trait]
    impl OriginTransport for GatedTransport {
        async fn fetch(&self, entity_id: &str) -> ResolverResult<Option<MetadataDocument>> {
            if entity_id == "a" {
                self.started.notify_one();
                self.release.notified().await;
            }
            let descriptor = EntityDescriptor::new(entity_id)
                .with_valid_until(self.clock.now() + Duration::hours(24));
            Ok(Some(descriptor.into()))
        }
    }

    fn resolver(clock: Arc<ManualClock>, config: ResolverConfig) -> DynamicMetadataResolver {
        let resolver = DynamicMetadataResolver::builder(EchoTransport {
            valid_for: Duration::hours(24),
            clock: clock.clone(),
        })
        .clock(clock)
        .config(config)
        .build()
        .unwrap();
        resolver.initialize().unwrap();
        resolver
    }

    #[tokio::test]
    async fn test_idle_entry_evicted() {
        let clock = Arc::new(ManualClock::starting_now());
        let config = ResolverConfig::default()
            .with_max_cache_duration(std::time::Duration::from_secs(12 * 3600));
        let resolver = resolver(clock.clone(), config);

        resolver.resolve(&Criteria::entity_id("a")).await.unwrap();
        clock.advance(Duration::hours(9));

        let report = resolver.sweep().await;
        assert_eq!(report.idle, 1);
        assert_eq!(report.expired, 0);
        assert!(resolver.is_empty());
        assert!(resolver.management_snapshot("a").await.is_none());

        resolver.destroy();
    }

    #[tokio::test]
    async fn test_idle_eviction_can_be_disabled() {
        let clock = Arc::new(ManualClock::starting_now());
        let config = ResolverConfig::default()
            .with_max_cache_duration(std::time::Duration::from_secs(12 * 3600))
            .with_remove_idle_data(false);
        let resolver = resolver(clock.clone(), config);

        resolver.resolve(&Criteria::entity_id("a")).await.unwrap();
        clock.advance(Duration::hours(9));

        assert_eq!(resolver.sweep().await.evicted(), 0);
        assert_eq!(resolver.cached_entity_ids(), vec!["a".to_string()]);

        // Expiration still applies
        clock.advance(Duration::hours(4));
        assert_eq!(resolver.sweep().await.expired, 1);

        resolver.destroy();
    }

    #[tokio::test]
    async fn test_recently_used_entry_kept() {
        let clock = Arc::new(ManualClock::starting_now());
        let resolver = resolver(clock.clone(), ResolverConfig::default());

        resolver.resolve(&Criteria::entity_id("a")).await.unwrap();
        clock.advance(Duration::hours(1));

        assert_eq!(resolver.sweep().await, Default::default());
        assert_eq!(resolver.len(), 1);

        resolver.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_entity_locked_by_slow_fetch_is_skipped() {
        let clock = Arc::new(ManualClock::starting_now());
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let resolver = DynamicMetadataResolver::builder(GatedTransport {
            started: started.clone(),
            release: release.clone(),
            clock: clock.clone(),
        })
        .clock(clock.clone())
        .build()
        .unwrap();
        resolver.initialize().unwrap();

        let pending = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve(&Criteria::entity_id("a")).await })
        };
        started.notified().await;

        // Other entity IDs are not held up by the fetch in progress
        let b = resolver.resolve(&Criteria::entity_id("b")).await.unwrap();
        assert_eq!(b.len(), 1);

        // Waits out the lock timeout on "a", then moves on
        let report = resolver.sweep().await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.evicted(), 0);
        assert_eq!(resolver.len(), 2);

        release.notify_one();
        let a = pending.await.unwrap().unwrap();
        assert_eq!(a.len(), 1);

        clock.advance(Duration::hours(1));
        assert_eq!(resolver.sweep().await, SweepReport::default());
        assert_eq!(resolver.len(), 2);

        clock.advance(Duration::hours(9));
        let report = resolver.sweep().await;
        assert_eq!(report.idle, 2);
        assert_eq!(report.skipped, 0);
        assert!(resolver.is_empty());

        resolver.destroy();
    }

    #[test]
    fn test_oversized_idle_window_rejected_at_build() {
        let clock = Arc::new(ManualClock::starting_now());
        let result = DynamicMetadataResolver::builder(EchoTransport {
            valid_for: Duration::hours(24),
            clock: clock.clone(),
        })
        .clock(clock)
        .config(
            ResolverConfig::default()
                .with_max_idle_duration(std::time::Duration::from_secs(10_000_000_000_000)),
        )
        .build();
        assert!(matches!(
            result,
            Err(crate::error::ResolverError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_is_noop_after_destroy() {
        let clock = Arc::new(ManualClock::starting_now());
        let resolver = resolver(clock.clone(), ResolverConfig::default());

        resolver.resolve(&Criteria::entity_id("a")).await.unwrap();
        resolver.destroy();
        clock.advance(Duration::days(2));

        assert_eq!(resolver.sweep().await.evicted(), 0);
    }
}
