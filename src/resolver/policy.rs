/// Cache window computations
use crate::{
    config::ResolverConfig,
    error::{ResolverError, ResolverResult},
    metadata::{EntityDescriptor, ValidityExtractor},
};
use chrono::{DateTime, Duration, Utc};

/// Bounds fetched metadata into expiration and refresh windows
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    min_cache_duration: Duration,
    max_cache_duration: Duration,
    refresh_delay_factor: f64,
}

impl RefreshPolicy {
    pub fn new(
        min_cache_duration: Duration,
        max_cache_duration: Duration,
        refresh_delay_factor: f64,
    ) -> ResolverResult<Self> {
        if min_cache_duration <= Duration::zero() {
            return Err(ResolverError::Configuration(
                "Minimum cache duration must be positive".to_string(),
            ));
        }
        if max_cache_duration < min_cache_duration {
            return Err(ResolverError::Configuration(
                "Maximum cache duration must not be less than minimum cache duration".to_string(),
            ));
        }
        if !(refresh_delay_factor > 0.0 && refresh_delay_factor < 1.0) {
            return Err(ResolverError::Configuration(
                "Refresh delay factor must be a number between 0.0 and 1.0, exclusive".to_string(),
            ));
        }

        Ok(Self {
            min_cache_duration,
            max_cache_duration,
            refresh_delay_factor,
        })
    }

    pub fn from_config(config: &ResolverConfig) -> ResolverResult<Self> {
        Self::new(
            to_chrono(config.min_cache_duration)?,
            to_chrono(config.max_cache_duration)?,
            config.refresh_delay_factor,
        )
    }

    pub fn min_cache_duration(&self) -> Duration {
        self.min_cache_duration
    }

    pub fn max_cache_duration(&self) -> Duration {
        self.max_cache_duration
    }

    /// Window given to records that have never been populated
    pub fn default_window(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        saturating_add(now, self.max_cache_duration)
    }

    /// Earliest declared expiry of `descriptor`, clamped to
    /// `[now + min, now + max]`
    pub fn compute_expiration(
        &self,
        descriptor: &EntityDescriptor,
        extractor: &dyn ValidityExtractor,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let lower = saturating_add(now, self.min_cache_duration);
        let upper = saturating_add(now, self.max_cache_duration);

        extractor
            .earliest_expiration(descriptor, upper, now)
            .clamp(lower, upper)
    }

    /// `now + max(min, (expiration - now) * factor)`
    pub fn compute_refresh_trigger(
        &self,
        expiration: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let window_ms = (expiration - now).num_milliseconds() as f64;
        let delay = Duration::try_milliseconds((window_ms * self.refresh_delay_factor) as i64)
            .unwrap_or(self.max_cache_duration);

        saturating_add(now, delay.max(self.min_cache_duration))
    }

    /// A refresh is due once the trigger has passed, or whenever nothing is cached
    pub fn should_refresh(
        &self,
        now: DateTime<Utc>,
        refresh_trigger: DateTime<Utc>,
        has_descriptors: bool,
    ) -> bool {
        !has_descriptors || now >= refresh_trigger
    }
}

/// `instant + delta`, pinned to the representable range
pub(crate) fn saturating_add(instant: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    instant.checked_add_signed(delta).unwrap_or(if delta < Duration::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// `instant - delta`, pinned to the representable range
pub(crate) fn saturating_sub(instant: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    instant.checked_sub_signed(delta).unwrap_or(if delta < Duration::zero() {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}

pub(crate) fn to_chrono(duration: std::time::Duration) -> ResolverResult<Duration> {
    Duration::from_std(duration).map_err(|e| {
        ResolverError::Configuration(format!("Duration {:?} is out of range: {}", duration, e))
    })
}
