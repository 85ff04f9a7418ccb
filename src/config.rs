/// Configuration management for the trust metadata resolver
use crate::error::{ResolverError, ResolverResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Placeholder replaced with the URL-encoded entity ID in origin URLs
pub const ENTITY_ID_PLACEHOLDER: &str = "{entity_id}";

/// Upper bound for any configured duration (100 years)
pub const MAX_CONFIGURED_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Top-level configuration for the resolver binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub resolver: ResolverConfig,
    pub origin: OriginConfig,
    pub logging: LoggingConfig,
}

/// Cache window and cleanup policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Floor for expiration and refresh windows (default: 10 minutes)
    pub min_cache_duration: Duration,
    /// Ceiling for expiration windows (default: 8 hours)
    pub max_cache_duration: Duration,
    /// Fraction of the expiration window after which a refresh is due,
    /// strictly between 0 and 1 (default: 0.75)
    pub refresh_delay_factor: f64,
    /// Idle time after which cached data is evicted (default: 8 hours)
    pub max_idle_duration: Duration,
    /// Whether idle data is evicted at all (default: true)
    pub remove_idle_data: bool,
    /// Interval between cleanup sweeps (default: 30 minutes)
    pub cleanup_interval: Duration,
    /// Delay before the first cleanup sweep (default: 1 minute)
    pub cleanup_initial_delay: Duration,
    /// Omit descriptors whose own validUntil has passed from results (default: true)
    pub require_valid_metadata: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_cache_duration: Duration::from_secs(10 * 60),
            max_cache_duration: Duration::from_secs(8 * 60 * 60),
            refresh_delay_factor: 0.75,
            max_idle_duration: Duration::from_secs(8 * 60 * 60),
            remove_idle_data: true,
            cleanup_interval: Duration::from_secs(30 * 60),
            cleanup_initial_delay: Duration::from_secs(60),
            require_valid_metadata: true,
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_cache_duration(mut self, duration: Duration) -> Self {
        self.min_cache_duration = duration;
        self
    }

    pub fn with_max_cache_duration(mut self, duration: Duration) -> Self {
        self.max_cache_duration = duration;
        self
    }

    pub fn with_refresh_delay_factor(mut self, factor: f64) -> Self {
        self.refresh_delay_factor = factor;
        self
    }

    pub fn with_max_idle_duration(mut self, duration: Duration) -> Self {
        self.max_idle_duration = duration;
        self
    }

    pub fn with_remove_idle_data(mut self, flag: bool) -> Self {
        self.remove_idle_data = flag;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_cleanup_initial_delay(mut self, delay: Duration) -> Self {
        self.cleanup_initial_delay = delay;
        self
    }

    pub fn with_require_valid_metadata(mut self, flag: bool) -> Self {
        self.require_valid_metadata = flag;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> ResolverResult<()> {
        if self.min_cache_duration.is_zero() {
            return Err(ResolverError::Configuration(
                "Minimum cache duration must be positive".to_string(),
            ));
        }

        if self.max_cache_duration < self.min_cache_duration {
            return Err(ResolverError::Configuration(format!(
                "Maximum cache duration ({:?}) must not be less than minimum cache duration ({:?})",
                self.max_cache_duration, self.min_cache_duration
            )));
        }

        // NaN fails both comparisons
        if !(self.refresh_delay_factor > 0.0 && self.refresh_delay_factor < 1.0) {
            return Err(ResolverError::Configuration(
                "Refresh delay factor must be a number between 0.0 and 1.0, exclusive".to_string(),
            ));
        }

        if self.max_idle_duration.is_zero() {
            return Err(ResolverError::Configuration(
                "Max idle duration must be positive".to_string(),
            ));
        }

        if self.cleanup_interval.is_zero() {
            return Err(ResolverError::Configuration(
                "Cleanup interval must be positive".to_string(),
            ));
        }

        for (name, value) in [
            ("Minimum cache duration", self.min_cache_duration),
            ("Maximum cache duration", self.max_cache_duration),
            ("Max idle duration", self.max_idle_duration),
            ("Cleanup interval", self.cleanup_interval),
            ("Cleanup initial delay", self.cleanup_initial_delay),
        ] {
            if value > MAX_CONFIGURED_DURATION {
                return Err(ResolverError::Configuration(format!(
                    "{} ({:?}) exceeds the maximum of {:?}",
                    name, value, MAX_CONFIGURED_DURATION
                )));
            }
        }

        Ok(())
    }
}

/// HTTP origin settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Request URL with an `{entity_id}` placeholder
    pub url_template: String,
    /// User-Agent header for origin requests
    pub user_agent: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            url_template: format!("http://localhost:8080/entities/{}", ENTITY_ID_PLACEHOLDER),
            user_agent: format!("Aurora-Trust-Resolver/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl OriginConfig {
    /// Validate configuration
    pub fn validate(&self) -> ResolverResult<()> {
        if !self.url_template.contains(ENTITY_ID_PLACEHOLDER) {
            return Err(ResolverError::Configuration(format!(
                "Origin URL template must contain {}",
                ENTITY_ID_PLACEHOLDER
            )));
        }

        if !(self.url_template.starts_with("http://") || self.url_template.starts_with("https://"))
        {
            return Err(ResolverError::Configuration(
                "Origin URL template must be an http(s) URL".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(ResolverError::Configuration(
                "Origin request timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON log lines instead of human-readable text
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ResolverResult<Self> {
        dotenv::dotenv().ok();

        let defaults = ResolverConfig::default();
        let resolver = ResolverConfig {
            min_cache_duration: env_secs("METADATA_MIN_CACHE_DURATION", defaults.min_cache_duration)?,
            max_cache_duration: env_secs("METADATA_MAX_CACHE_DURATION", defaults.max_cache_duration)?,
            refresh_delay_factor: env_parse(
                "METADATA_REFRESH_DELAY_FACTOR",
                defaults.refresh_delay_factor,
            )?,
            max_idle_duration: env_secs("METADATA_MAX_IDLE_DURATION", defaults.max_idle_duration)?,
            remove_idle_data: env_parse("METADATA_REMOVE_IDLE_DATA", defaults.remove_idle_data)?,
            cleanup_interval: env_secs("METADATA_CLEANUP_INTERVAL", defaults.cleanup_interval)?,
            cleanup_initial_delay: env_secs(
                "METADATA_CLEANUP_INITIAL_DELAY",
                defaults.cleanup_initial_delay,
            )?,
            require_valid_metadata: env_parse(
                "METADATA_REQUIRE_VALID",
                defaults.require_valid_metadata,
            )?,
        };

        let origin_defaults = OriginConfig::default();
        let origin = OriginConfig {
            url_template: env::var("METADATA_ORIGIN_URL_TEMPLATE")
                .unwrap_or(origin_defaults.url_template),
            user_agent: env::var("METADATA_ORIGIN_USER_AGENT")
                .unwrap_or(origin_defaults.user_agent),
            request_timeout: env_secs(
                "METADATA_ORIGIN_TIMEOUT",
                origin_defaults.request_timeout,
            )?,
        };

        let logging = LoggingConfig {
            level: env::var("RUST_LOG").unwrap_or_else(|_| "aurora_trust_resolver=debug".to_string()),
            json: env_parse("METADATA_LOG_JSON", false)?,
        };

        let config = AppConfig {
            resolver,
            origin,
            logging,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> ResolverResult<()> {
        self.resolver.validate()?;
        self.origin.validate()?;
        Ok(())
    }
}

/// Read a duration in whole seconds, falling back to `default` when unset
fn env_secs(name: &str, default: Duration) -> ResolverResult<Duration> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ResolverError::Configuration(format!("Invalid duration for {}: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> ResolverResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ResolverError::Configuration(format!("Invalid value for {}: {}", name, raw))),
        Err(_) => Ok(default),
    }
}
