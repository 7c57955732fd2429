use anyhow::Context;
use marketplace_cache::{CacheMetrics, KeyValueStore, MemoryStore, RedisStore, SystemClock, TypedCache};
use marketplace_service::config::StorageBackend;
use marketplace_service::models::{Interaction, InteractionDetail};
use marketplace_service::services::catalog::{demo_catalog, CatalogProvider, InMemoryCatalog};
use marketplace_service::services::{EngagementAction, SectionEngagementEvent};
use marketplace_service::{build_pipeline, metrics, Config, GenerationOptions};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEMO_USER: &str = "demo-advertiser";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("Failed to load config")?;
    info!(service = %config.service_name, backend = ?config.storage_backend, "Starting");

    let registry = Registry::new();
    CacheMetrics::register(&registry).context("Failed to register cache metrics")?;
    metrics::register(&registry).context("Failed to register pipeline metrics")?;

    let store: Arc<dyn KeyValueStore> = match config.storage_backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Redis => Arc::new(
            RedisStore::connect(&config.redis_url)
                .await
                .context("Failed to connect to Redis")?,
        ),
    };
    let cache = TypedCache::new(store);

    let catalog = match &config.catalog_path {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read catalog {}", path))?;
            InMemoryCatalog::from_json(&json)?
        }
        None => InMemoryCatalog::new(demo_catalog(48)),
    };
    let catalog: Arc<dyn CatalogProvider> = Arc::new(catalog);

    let pipeline = build_pipeline(catalog.clone(), cache, Arc::new(SystemClock), &config);
    if let Err(e) = pipeline.grouping.section_config().load().await {
        warn!(error = %e, "Using built-in section configuration");
    }

    // Seed a short browsing history for the demo user
    let screens = catalog.list_screens().await?;
    let now = chrono::Utc::now();
    for (i, screen) in screens.iter().step_by(5).take(12).enumerate() {
        let detail = match i % 4 {
            0 => InteractionDetail::View {
                duration_secs: Some(30),
            },
            1 => InteractionDetail::Click { section_id: None },
            2 => InteractionDetail::Favorite,
            _ => InteractionDetail::Purchase {
                amount: screen.price_per_day * 7.0,
                booking_days: 7,
            },
        };
        pipeline
            .behavior
            .record_interaction(Interaction::new(DEMO_USER, screen.context(), detail, now))
            .await?;
    }

    for options in [
        GenerationOptions::anonymous(),
        GenerationOptions::for_user(DEMO_USER).with_location("Berlin"),
        GenerationOptions::for_user(DEMO_USER).with_location("Berlin"),
    ] {
        let result = pipeline.grouping.generate_sections(options).await;
        for section in &result.sections {
            info!(
                section_id = %section.id,
                priority = section.priority,
                screens = section.screens.len(),
                confidence = section.metadata.confidence,
                "Section"
            );
        }
        info!(
            sections = result.sections.len(),
            cache_hit = result.cache_hit,
            fallback_used = result.fallback_used,
            errors = result.errors.len(),
            elapsed_ms = result.processing_time_ms,
            "Generation summary"
        );

        if let Some(section) = result.sections.first() {
            pipeline
                .grouping
                .track_section_engagement(
                    SectionEngagementEvent::new(&section.id, EngagementAction::Impression, now)
                        .with_tracking_id(section.metadata.tracking_id),
                )
                .await?;
        }
    }

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    info!(bytes = buffer.len(), "Metrics snapshot");

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}
