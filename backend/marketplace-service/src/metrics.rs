//! Pipeline metrics

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::OnceLock;
use std::time::Duration;

static METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

struct PipelineMetrics {
    generations: IntCounterVec,
    generation_seconds: HistogramVec,
    section_failures: IntCounterVec,
    engagement_events: IntCounterVec,
}

impl PipelineMetrics {
    fn new() -> Self {
        // Static definitions; construction only fails on invalid names.
        Self {
            generations: IntCounterVec::new(
                Opts::new(
                    "marketplace_section_generations_total",
                    "Section generation cycles by outcome",
                ),
                &["outcome"],
            )
            .expect("valid metric definition"),
            generation_seconds: HistogramVec::new(
                HistogramOpts::new(
                    "marketplace_section_generation_duration_seconds",
                    "Section generation latency",
                )
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
                &["outcome"],
            )
            .expect("valid metric definition"),
            section_failures: IntCounterVec::new(
                Opts::new(
                    "marketplace_section_failures_total",
                    "Per-section generation failures",
                ),
                &["algorithm"],
            )
            .expect("valid metric definition"),
            engagement_events: IntCounterVec::new(
                Opts::new(
                    "marketplace_section_engagement_total",
                    "Section engagement events",
                ),
                &["action"],
            )
            .expect("valid metric definition"),
        }
    }
}

fn get() -> &'static PipelineMetrics {
    METRICS.get_or_init(PipelineMetrics::new)
}

/// Register pipeline metrics with a registry
pub fn register(registry: &Registry) -> Result<(), prometheus::Error> {
    let m = get();
    registry.register(Box::new(m.generations.clone()))?;
    registry.register(Box::new(m.generation_seconds.clone()))?;
    registry.register(Box::new(m.section_failures.clone()))?;
    registry.register(Box::new(m.engagement_events.clone()))?;
    Ok(())
}

/// `outcome` is one of `cache_hit`, `generated`, `fallback`
pub fn observe_generation(outcome: &str, elapsed: Duration) {
    let m = get();
    m.generations.with_label_values(&[outcome]).inc();
    m.generation_seconds
        .with_label_values(&[outcome])
        .observe(elapsed.as_secs_f64());
}

pub fn record_section_failure(algorithm: &str) {
    get().section_failures.with_label_values(&[algorithm]).inc();
}

pub fn record_engagement(action: &str) {
    get().engagement_events.with_label_values(&[action]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_observe() {
        let registry = Registry::new();
        register(&registry).unwrap();

        observe_generation("generated", Duration::from_millis(3));
        record_section_failure("trending-analysis");
        record_engagement("click");

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"marketplace_section_generations_total".to_string()));
        assert!(names.contains(&"marketplace_section_engagement_total".to_string()));
    }
}
