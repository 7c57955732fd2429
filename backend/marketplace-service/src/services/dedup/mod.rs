// ============================================
// Deduplication Engine (去重)
// ============================================
//
// A screen appears in at most one section. When it shows up in several, it
// stays in the winner and is stripped from the rest:
//   1. higher section priority
//   2. higher algorithm weight
//   3. higher relevance (recommendation score in that section)
//   4. first occurrence
//
// Sections left below their minimum are backfilled from unused catalog
// screens, ranked by the priority engine.

use crate::error::{Result, ServiceError};
use crate::models::{EnhancedScreen, MarketplaceSection};
use crate::services::priority::{ScoringContext, SectionPriorityEngine, SectionSlot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateRemoval {
    pub screen_id: String,
    pub kept_in: String,
    pub removed_from: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub sections: Vec<MarketplaceSection>,
    pub removals: Vec<DuplicateRemoval>,
}

#[derive(Debug, Clone)]
pub struct BackfillOutcome {
    pub sections: Vec<MarketplaceSection>,
    /// section id -> screens added
    pub added: BTreeMap<String, usize>,
    /// Sections still below their minimum after candidates ran out
    pub still_underfilled: Vec<String>,
}

pub struct DeduplicationEngine {
    priority: Arc<SectionPriorityEngine>,
}

/// Ordering key for the section that keeps a contested screen
#[derive(Clone, Copy)]
struct Claim {
    section_idx: usize,
    priority: i32,
    algorithm_weight: f64,
    relevance: f64,
}

impl Claim {
    fn beats(&self, other: &Claim) -> bool {
        if self.priority != other.priority {
            return self.priority > other.priority;
        }
        if self.algorithm_weight != other.algorithm_weight {
            return self.algorithm_weight > other.algorithm_weight;
        }
        if self.relevance != other.relevance {
            return self.relevance > other.relevance;
        }
        self.section_idx < other.section_idx
    }
}

impl DeduplicationEngine {
    pub fn new(priority: Arc<SectionPriorityEngine>) -> Self {
        Self { priority }
    }

    pub fn remove_duplicates(&self, mut sections: Vec<MarketplaceSection>) -> Result<DedupOutcome> {
        let mut ids = HashSet::new();
        for section in &sections {
            if !ids.insert(section.id.as_str()) {
                return Err(ServiceError::Deduplication(format!(
                    "section id {} appears more than once",
                    section.id
                )));
            }
        }

        // screen id -> winning claim, plus every section that listed it
        let mut winners: HashMap<String, Claim> = HashMap::new();
        let mut claimants: HashMap<String, Vec<usize>> = HashMap::new();
        let mut first_seen: Vec<String> = Vec::new();

        for (section_idx, section) in sections.iter().enumerate() {
            for screen in &section.screens {
                let claim = Claim {
                    section_idx,
                    priority: section.priority,
                    algorithm_weight: section.algorithm().weight(),
                    relevance: screen.recommendation_score,
                };
                let entry = claimants.entry(screen.id().to_string()).or_default();
                if entry.is_empty() {
                    first_seen.push(screen.id().to_string());
                }
                if !entry.contains(&section_idx) {
                    entry.push(section_idx);
                }
                winners
                    .entry(screen.id().to_string())
                    .and_modify(|current| {
                        if claim.beats(current) {
                            *current = claim;
                        }
                    })
                    .or_insert(claim);
            }
        }

        let mut removals = Vec::new();
        for screen_id in &first_seen {
            let (Some(winner), Some(sections_with)) = (winners.get(screen_id), claimants.get(screen_id)) else {
                continue;
            };
            if sections_with.len() < 2 {
                continue;
            }
            removals.push(DuplicateRemoval {
                screen_id: screen_id.clone(),
                kept_in: sections[winner.section_idx].id.clone(),
                removed_from: sections_with
                    .iter()
                    .filter(|idx| **idx != winner.section_idx)
                    .map(|idx| sections[*idx].id.clone())
                    .collect(),
            });
        }

        for (section_idx, section) in sections.iter_mut().enumerate() {
            let mut kept = HashSet::new();
            section.screens.retain(|screen| {
                let wins = winners
                    .get(screen.id())
                    .map_or(true, |w| w.section_idx == section_idx);
                // Also drops repeats inside the same section
                wins && kept.insert(screen.id().to_string())
            });
        }

        if !removals.is_empty() {
            info!(duplicates = removals.len(), "Removed duplicate screens across sections");
        }
        Ok(DedupOutcome { sections, removals })
    }

    /// Top up sections below their minimum with screens not used anywhere
    pub fn backfill_sections(
        &self,
        mut sections: Vec<MarketplaceSection>,
        catalog: &[EnhancedScreen],
        slots: &[SectionSlot],
        ctx: &ScoringContext,
    ) -> BackfillOutcome {
        let mut used: HashSet<String> = sections
            .iter()
            .flat_map(|s| s.screens.iter().map(|e| e.id().to_string()))
            .collect();
        let slot_by_id: HashMap<&str, &SectionSlot> = slots.iter().map(|s| (s.id(), s)).collect();

        let mut order: Vec<usize> = (0..sections.len()).collect();
        order.sort_by(|a, b| sections[*b].priority.cmp(&sections[*a].priority));

        let mut added = BTreeMap::new();
        let mut still_underfilled = Vec::new();

        for idx in order {
            let Some(slot) = slot_by_id.get(sections[idx].id.as_str()) else {
                continue;
            };
            let min = slot.config.min_screens;
            let max = slot.config.max_screens;
            let mut count = 0;

            while sections[idx].screens.len() < min && sections[idx].screens.len() < max {
                let members: Vec<&EnhancedScreen> = sections[idx].screens.iter().collect();
                let best = catalog
                    .iter()
                    .filter(|c| !used.contains(c.id()))
                    .map(|c| (c, self.priority.score(c, slot, &members, slots, ctx).total))
                    .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.id().cmp(a.0.id())));

                let Some((candidate, score)) = best else {
                    break;
                };
                debug!(
                    section_id = %sections[idx].id,
                    screen_id = %candidate.id(),
                    score,
                    "Backfilled screen"
                );
                used.insert(candidate.id().to_string());
                let candidate = candidate.clone();
                sections[idx].screens.push(candidate);
                count += 1;
            }

            if count > 0 {
                added.insert(sections[idx].id.clone(), count);
            }
            if sections[idx].screens.len() < min {
                still_underfilled.push(sections[idx].id.clone());
            }
        }

        BackfillOutcome {
            sections,
            added,
            still_underfilled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AlgorithmType, PerformanceMetrics, Screen, ScreenCategory, SectionConfig, TrendDirection,
        UserProfile,
    };
    use chrono::Utc;

    fn enhanced(id: &str, score: f64) -> EnhancedScreen {
        let screen = Screen::new(id, "Berlin", ScreenCategory::Mall, 200.0, 4.0);
        let performance = PerformanceMetrics {
            screen_id: id.to_string(),
            booking_rate: 0.5,
            engagement_score: 0.5,
            conversion_rate: 0.05,
            impressions: 100,
            revenue: 0.0,
            trend: TrendDirection::Stable,
            peak_hours: vec![9],
        };
        EnhancedScreen::enhance(screen, performance, score, score)
    }

    fn section(config: &SectionConfig, ids: &[(&str, f64)]) -> MarketplaceSection {
        let screens = ids.iter().map(|(id, s)| enhanced(id, *s)).collect();
        MarketplaceSection::from_config(config, screens, 0.8, Utc::now(), None)
    }

    fn engine() -> DeduplicationEngine {
        DeduplicationEngine::new(Arc::new(SectionPriorityEngine::default()))
    }

    #[test]
    fn test_higher_priority_section_keeps_screen() {
        let high = SectionConfig::new("high", "High", AlgorithmType::TrendingAnalysis, 90, 1, 5);
        let low = SectionConfig::new("low", "Low", AlgorithmType::MlPersonalized, 10, 1, 5);
        let outcome = engine()
            .remove_duplicates(vec![
                section(&low, &[("a", 0.9), ("b", 0.5)]),
                section(&high, &[("a", 0.1), ("c", 0.5)]),
            ])
            .unwrap();

        assert!(!outcome.sections[0].contains("a"));
        assert!(outcome.sections[1].contains("a"));
        assert_eq!(outcome.removals.len(), 1);
        assert_eq!(outcome.removals[0].kept_in, "high");
        assert_eq!(outcome.removals[0].removed_from, vec!["low".to_string()]);
    }

    #[test]
    fn test_equal_priority_falls_back_to_algorithm_weight() {
        let ml = SectionConfig::new("ml", "ML", AlgorithmType::MlPersonalized, 50, 1, 5);
        let popular = SectionConfig::new("pop", "Pop", AlgorithmType::FallbackPopular, 50, 1, 5);
        let outcome = engine()
            .remove_duplicates(vec![section(&popular, &[("a", 0.9)]), section(&ml, &[("a", 0.1)])])
            .unwrap();
        assert!(outcome.sections[1].contains("a"));
        assert!(outcome.sections[0].screens.is_empty());
    }

    #[test]
    fn test_full_tie_keeps_first_occurrence() {
        let a = SectionConfig::new("first", "First", AlgorithmType::NewDiscovery, 50, 1, 5);
        let b = SectionConfig::new("second", "Second", AlgorithmType::NewDiscovery, 50, 1, 5);
        let outcome = engine()
            .remove_duplicates(vec![section(&a, &[("x", 0.5)]), section(&b, &[("x", 0.5)])])
            .unwrap();
        assert!(outcome.sections[0].contains("x"));
        assert!(!outcome.sections[1].contains("x"));
    }

    #[test]
    fn test_duplicate_section_ids_rejected() {
        let cfg = SectionConfig::new("same", "Same", AlgorithmType::NewDiscovery, 50, 1, 5);
        let result = engine().remove_duplicates(vec![section(&cfg, &[]), section(&cfg, &[])]);
        assert!(matches!(result, Err(ServiceError::Deduplication(_))));
    }

    #[test]
    fn test_backfill_uses_only_unused_screens() {
        let cfg = SectionConfig::new("s", "S", AlgorithmType::TrendingAnalysis, 50, 4, 6);
        let other = SectionConfig::new("o", "O", AlgorithmType::NewDiscovery, 40, 1, 6);
        let sections = vec![section(&cfg, &[("a", 0.5)]), section(&other, &[("b", 0.5)])];
        let catalog: Vec<EnhancedScreen> = ["a", "b", "c", "d", "e"]
            .iter()
            .enumerate()
            .map(|(i, id)| enhanced(id, 0.2 * i as f64))
            .collect();
        let slots = vec![SectionSlot::new(cfg, 0.8), SectionSlot::new(other, 0.8)];
        let ctx = ScoringContext {
            profile: UserProfile::empty("u1", Utc::now()),
            location: None,
            now: Utc::now(),
        };

        let outcome = engine().backfill_sections(sections, &catalog, &slots, &ctx);
        let filled = &outcome.sections[0];
        assert_eq!(filled.screens.len(), 4);
        assert!(!filled.contains("b"));
        assert_eq!(outcome.added.get("s"), Some(&3));
        assert!(outcome.still_underfilled.is_empty());
    }

    #[test]
    fn test_backfill_reports_exhausted_candidates() {
        let cfg = SectionConfig::new("s", "S", AlgorithmType::TrendingAnalysis, 50, 5, 6);
        let sections = vec![section(&cfg, &[("a", 0.5)])];
        let catalog = vec![enhanced("a", 0.5), enhanced("b", 0.5)];
        let slots = vec![SectionSlot::new(cfg, 0.8)];
        let ctx = ScoringContext {
            profile: UserProfile::empty("u1", Utc::now()),
            location: None,
            now: Utc::now(),
        };

        let outcome = engine().backfill_sections(sections, &catalog, &slots, &ctx);
        assert_eq!(outcome.sections[0].screens.len(), 2);
        assert_eq!(outcome.still_underfilled, vec!["s".to_string()]);
    }
}
