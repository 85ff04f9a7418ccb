/// Aurora Trust Resolver
///
/// Resolves federation trust metadata for the entity IDs given on the
/// command line and prints a JSON summary of what was found.

use anyhow::{bail, Context};
use aurora_trust_resolver::{
    metrics, AppConfig, Criteria, DynamicMetadataResolver, HttpOriginTransport,
    ManagementSnapshot,
};
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EntitySummary {
    entity_id: String,
    found: bool,
    roles: Vec<String>,
    signing_keys: usize,
    endpoints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<ManagementSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env().context("Failed to load configuration")?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| "aurora_trust_resolver=debug".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(config.logging.json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.logging.json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    let mut print_metrics = false;
    let mut entity_ids = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--metrics" => print_metrics = true,
            _ => entity_ids.push(arg),
        }
    }

    if entity_ids.is_empty() {
        bail!("usage: aurora-trust-resolver [--metrics] <entity-id>...");
    }

    let transport = HttpOriginTransport::new(config.origin.clone())?;
    let resolver = DynamicMetadataResolver::builder(transport)
        .config(config.resolver.clone())
        .build()?;
    resolver.initialize()?;

    info!(
        "Resolving {} entity IDs via {}",
        entity_ids.len(),
        config.origin.url_template
    );

    let summaries = join_all(entity_ids.iter().map(|id| summarize(&resolver, id))).await;
    println!("{}", serde_json::to_string_pretty(&summaries)?);

    if print_metrics {
        eprintln!("{}", metrics::render_metrics());
    }

    resolver.destroy();
    Ok(())
}

async fn summarize(resolver: &DynamicMetadataResolver, entity_id: &str) -> EntitySummary {
    let mut summary = EntitySummary {
        entity_id: entity_id.to_string(),
        found: false,
        roles: Vec::new(),
        signing_keys: 0,
        endpoints: Vec::new(),
        cache: None,
        error: None,
    };

    match resolver.resolve_single(&Criteria::entity_id(entity_id)).await {
        Ok(Some(descriptor)) => {
            summary.found = true;
            summary.roles = descriptor.roles.iter().map(|r| r.role.clone()).collect();
            summary.signing_keys = descriptor.signing_keys().count();
            summary.endpoints = descriptor
                .roles
                .iter()
                .flat_map(|r| r.endpoints.iter())
                .map(|e| e.location.clone())
                .collect();
        }
        Ok(None) => {}
        Err(e) => {
            error!("Failed to resolve '{}': {}", entity_id, e);
            summary.error = Some(e.to_string());
        }
    }

    summary.cache = resolver.management_snapshot(entity_id).await;
    summary
}
