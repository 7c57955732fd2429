use chrono::{Duration, Utc};
use marketplace_cache::{Clock, ManualClock, MemoryStore, TypedCache};
use marketplace_service::models::{
    AlgorithmType, Interaction, InteractionDetail, MarketplaceSection, Screen,
};
use marketplace_service::services::catalog::{demo_catalog, InMemoryCatalog};
use marketplace_service::services::priority::{ScoringContext, SectionPriorityEngine, SectionSlot};
use marketplace_service::services::recommendation::{
    AlgorithmGenerator, SectionGenerator, SectionRequest,
};
use marketplace_service::services::section_config::default_sections;
use marketplace_service::{build_pipeline, Config, GenerationOptions, Pipeline};
use std::collections::HashSet;
use std::sync::Arc;

struct Harness {
    pipeline: Pipeline,
    clock: Arc<ManualClock>,
    screens: Vec<Screen>,
}

fn harness(catalog_size: usize) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let cache = TypedCache::new(Arc::new(MemoryStore::with_clock(clock.clone())));
    let screens = demo_catalog(catalog_size);
    let catalog = Arc::new(InMemoryCatalog::new(screens.clone()));
    let pipeline = build_pipeline(catalog, cache, clock.clone(), &Config::default());
    Harness {
        pipeline,
        clock,
        screens,
    }
}

async fn browse(h: &Harness, user: &str, count: usize) {
    for (i, screen) in h.screens.iter().take(count).enumerate() {
        let detail = if i % 3 == 0 {
            InteractionDetail::Favorite
        } else {
            InteractionDetail::View {
                duration_secs: Some(20),
            }
        };
        h.pipeline
            .behavior
            .record_interaction(Interaction::new(user, screen.context(), detail, h.clock.now()))
            .await
            .unwrap();
    }
}

fn assert_well_formed(sections: &[MarketplaceSection]) {
    let configs = default_sections();
    let mut seen = HashSet::new();
    for section in sections {
        let config = configs.iter().find(|c| c.id == section.id).unwrap();
        assert!(
            section.screens.len() >= config.min_screens,
            "{} below minimum",
            section.id
        );
        assert!((0.0..=1.0).contains(&section.metadata.confidence));
        for screen in &section.screens {
            assert!(seen.insert(screen.id().to_string()), "duplicate {}", screen.id());
            assert!((0.0..=1.0).contains(&screen.personalized_score));
            assert!((0.0..=1.0).contains(&screen.trending_score));
            assert!((0.0..=1.0).contains(&screen.recommendation_score));
        }
    }
    assert!(sections.windows(2).all(|w| w[0].priority >= w[1].priority));
}

#[tokio::test]
async fn test_sections_are_well_formed_for_every_user_kind() {
    let h = harness(80);
    browse(&h, "regular", 15).await;
    browse(&h, "newcomer", 2).await;

    for options in [
        GenerationOptions::anonymous(),
        GenerationOptions::anonymous().with_location("Munich"),
        GenerationOptions::for_user("newcomer"),
        GenerationOptions::for_user("regular").with_location("Berlin"),
    ] {
        let result = h.pipeline.grouping.generate_sections(options).await;
        assert!(!result.fallback_used);
        assert!(!result.sections.is_empty());
        assert_well_formed(&result.sections);
    }
}

#[tokio::test]
async fn test_regular_user_gets_personal_sections() {
    let h = harness(80);
    browse(&h, "regular", 15).await;

    let result = h
        .pipeline
        .grouping
        .generate_sections(GenerationOptions::for_user("regular"))
        .await;
    assert!(result.analytics.personalized);
    let ids: Vec<&str> = result.sections.iter().map(|s| s.id.as_str()).collect();
    assert!(ids.contains(&"top-picks"));
    assert!(ids.contains(&"recently-viewed"));
    let context = result.sections[0].metadata.user_context.as_ref().unwrap();
    assert_eq!(context.user_id, "regular");
    assert_eq!(context.interaction_count, 15);
}

#[tokio::test]
async fn test_second_call_within_ttl_is_identical_cache_hit() {
    let h = harness(60);
    let first = h
        .pipeline
        .grouping
        .generate_sections(GenerationOptions::for_user("u1"))
        .await;
    h.clock.advance(Duration::minutes(10));
    let second = h
        .pipeline
        .grouping
        .generate_sections(GenerationOptions::for_user("u1"))
        .await;

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.sections, second.sections);
}

#[tokio::test]
async fn test_cache_entry_expires() {
    let h = harness(60);
    h.pipeline
        .grouping
        .generate_sections(GenerationOptions::for_user("u1"))
        .await;
    h.clock.advance(Duration::minutes(31));
    let later = h
        .pipeline
        .grouping
        .generate_sections(GenerationOptions::for_user("u1"))
        .await;
    assert!(!later.cache_hit);
}

#[tokio::test]
async fn test_location_and_filters_are_cached_separately() {
    use marketplace_service::models::ScreenFilters;

    let h = harness(60);
    let base = h
        .pipeline
        .grouping
        .generate_sections(GenerationOptions::anonymous())
        .await;
    assert!(!base.cache_hit);

    let located = h
        .pipeline
        .grouping
        .generate_sections(GenerationOptions::anonymous().with_location("Hamburg"))
        .await;
    assert!(!located.cache_hit);
    assert!(located.sections.iter().any(|s| s.id == "near-you"));

    let filtered = h
        .pipeline
        .grouping
        .generate_sections(GenerationOptions::anonymous().with_filters(ScreenFilters {
            min_rating: Some(4.0),
            ..Default::default()
        }))
        .await;
    assert!(!filtered.cache_hit);

    let base_again = h
        .pipeline
        .grouping
        .generate_sections(GenerationOptions::anonymous())
        .await;
    assert!(base_again.cache_hit);
    assert_eq!(base_again.sections, base.sections);
}

#[tokio::test]
async fn test_fallback_is_never_empty_when_inventory_exists() {
    let h = harness(30);
    for config in default_sections() {
        h.pipeline
            .grouping
            .toggle_section(&config.id, false)
            .await
            .unwrap();
    }

    let result = h
        .pipeline
        .grouping
        .generate_sections(GenerationOptions::for_user("u1"))
        .await;
    assert!(result.fallback_used);
    assert!(!result.sections.is_empty());
    assert!(!result.errors.is_empty());
}

#[tokio::test]
async fn test_zero_interaction_top_picks_are_popularity_ranked() {
    let h = harness(40);
    let signals = h.pipeline.recommendation.signals(Some("nobody")).await;
    let config = default_sections()
        .into_iter()
        .find(|c| c.algorithm == AlgorithmType::MlPersonalized)
        .unwrap();

    let generator = AlgorithmGenerator::new(
        AlgorithmType::MlPersonalized,
        h.pipeline.recommendation.clone(),
    );
    let generated = generator
        .generate(&SectionRequest {
            config: &config,
            signals: &signals,
            pool: &h.screens,
            location: None,
        })
        .await
        .unwrap();

    assert!(generated.confidence <= 0.8);
    assert!(!generated.screens.is_empty());
    assert!(generated
        .screens
        .windows(2)
        .all(|w| w[0].screen.popularity() >= w[1].screen.popularity()));
    assert!(generated.screens.iter().all(|s| s.personalized_score == 0.0));
}

#[tokio::test]
async fn test_twenty_screens_into_three_sections_of_six() {
    let h = harness(20);
    let signals = h.pipeline.recommendation.signals(None).await;
    let enhanced = h
        .pipeline
        .recommendation
        .popular(&signals, &h.screens, h.screens.len())
        .await;
    assert_eq!(enhanced.len(), 20);

    let slots: Vec<SectionSlot> = default_sections()
        .into_iter()
        .filter(|c| ["trending", "top-performing", "popular"].contains(&c.id.as_str()))
        .map(|mut c| {
            c.min_screens = 1;
            c.max_screens = 6;
            SectionSlot::new(c, 0.7)
        })
        .collect();
    let ctx = ScoringContext {
        profile: signals.profile.clone(),
        location: None,
        now: h.clock.now(),
    };

    let engine = SectionPriorityEngine::default();
    let mut result = engine.assign_screens_to_sections(&enhanced, &slots, &ctx);
    assert!(!result.conflicts.is_empty());

    engine.handle_edge_cases(&mut result, &slots);
    assert!(result.total_assigned() <= 18);
    assert_eq!(result.total_assigned() + result.unassigned.len(), 20);
}

#[tokio::test]
async fn test_engagement_stats_through_the_service() {
    use marketplace_service::services::{EngagementAction, SectionEngagementEvent};

    let h = harness(30);
    let now = h.clock.now();
    for action in [
        EngagementAction::Impression,
        EngagementAction::Impression,
        EngagementAction::Click,
    ] {
        h.pipeline
            .grouping
            .track_section_engagement(SectionEngagementEvent::new("trending", action, now))
            .await
            .unwrap();
    }
    let stats = h.pipeline.grouping.engagement().stats("trending").await.unwrap();
    assert_eq!(stats.clicks, 1);
    assert_eq!(stats.ctr, 0.5);
}
