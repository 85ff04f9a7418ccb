/// HTTP origin transport (metadata query style endpoints)
use super::OriginTransport;
use crate::{
    config::{OriginConfig, ENTITY_ID_PLACEHOLDER},
    error::{ResolverError, ResolverResult},
    metadata::MetadataDocument,
    metrics,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Instant;
use tracing::debug;

/// Fetches JSON metadata documents over HTTP(S)
#[derive(Clone)]
pub struct HttpOriginTransport {
    http_client: reqwest::Client,
    config: OriginConfig,
}

impl HttpOriginTransport {
    /// Create a new HTTP transport
    pub fn new(config: OriginConfig) -> ResolverResult<Self> {
        config.validate()?;

        let http_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                ResolverError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// Request URL for an entity ID
    pub fn url_for(&self, entity_id: &str) -> String {
        self.config
            .url_template
            .replace(ENTITY_ID_PLACEHOLDER, &urlencoding::encode(entity_id))
    }

    async fn fetch_document(&self, url: &str) -> ResolverResult<Option<MetadataDocument>> {
        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Origin has no metadata at {}", url);
            return Ok(None);
        }

        if !status.is_success() {
            return Err(ResolverError::Transport(format!(
                "Origin returned error for {}: {}",
                url, status
            )));
        }

        let body = response.bytes().await?;
        let document: MetadataDocument = serde_json::from_slice(&body)?;

        Ok(Some(document))
    }
}

#[async_trait]
impl OriginTransport for HttpOriginTransport {
    async fn fetch(&self, entity_id: &str) -> ResolverResult<Option<MetadataDocument>> {
        let url = self.url_for(entity_id);
        debug!("Fetching metadata for '{}' from {}", entity_id, url);

        let start = Instant::now();
        let result = self.fetch_document(&url).await;

        let status = match &result {
            Ok(Some(_)) => "ok",
            Ok(None) => "not_found",
            Err(_) => "error",
        };
        metrics::ORIGIN_FETCH_TOTAL.with_label_values(&[status]).inc();
        metrics::ORIGIN_FETCH_DURATION_SECONDS.observe(start.elapsed().as_secs_f64());

        result
    }
}
