// ============================================
// Section Priority Engine (區塊優先級)
// ============================================
//
// Scores every (screen, section) pair with seven relevance factors:
//
// | factor          | weight |
// |-----------------|--------|
// | personalization | 0.25   |
// | similarity      | 0.20   |
// | performance     | 0.20   |
// | trending        | 0.15   |
// | geographic      | 0.10   |
// | temporal        | 0.05   |
// | diversity       | 0.05   |
//
// The weighted sum is scaled by the section's priority weight, its
// algorithm weight and its confidence, each mapped into [0.5, 1].

use crate::models::{price_band, EnhancedScreen, MarketplaceSection, SectionConfig, UserProfile};
use crate::services::recommendation::similarity;
use crate::utils::{desc, normalize_score};
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// screen id -> section id -> score
pub type ScoreMatrix = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelevanceWeights {
    pub personalization: f64,
    pub similarity: f64,
    pub performance: f64,
    pub trending: f64,
    pub geographic: f64,
    pub temporal: f64,
    pub diversity: f64,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            personalization: 0.25,
            similarity: 0.20,
            performance: 0.20,
            trending: 0.15,
            geographic: 0.10,
            temporal: 0.05,
            diversity: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RelevanceFactors {
    pub personalization: f64,
    pub similarity: f64,
    pub performance: f64,
    pub trending: f64,
    pub geographic: f64,
    pub temporal: f64,
    pub diversity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceScore {
    pub screen_id: String,
    pub section_id: String,
    pub factors: RelevanceFactors,
    pub total: f64,
}

/// A section as seen by the engine: its configuration plus generation confidence
#[derive(Debug, Clone)]
pub struct SectionSlot {
    pub config: SectionConfig,
    pub confidence: f64,
}

impl SectionSlot {
    pub fn new(config: SectionConfig, confidence: f64) -> Self {
        Self {
            config,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }
}

#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub profile: UserProfile,
    pub location: Option<String>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// No section had capacity; placed in the top-scoring one anyway
    CapacityOverflow,
    /// Pulled into an underfilled section
    BalanceUnderfill,
    /// Pushed out of an overfilled section into the next best one
    BalanceOverflow,
    /// Pushed out with nowhere to go
    Unassigned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentConflict {
    pub screen_id: String,
    pub competing_sections: Vec<String>,
    pub strategy: ResolutionStrategy,
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BalanceMetrics {
    pub section_counts: BTreeMap<String, usize>,
    /// 1.0 when every section holds the same number of screens
    pub balance_score: f64,
    pub underfilled: Vec<String>,
    pub overfilled: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssignmentResult {
    /// section id -> screen ids in display order
    pub assignments: BTreeMap<String, Vec<String>>,
    pub scores: ScoreMatrix,
    pub conflicts: Vec<AssignmentConflict>,
    pub balance: BalanceMetrics,
    pub unassigned: Vec<String>,
}

impl AssignmentResult {
    pub fn total_assigned(&self) -> usize {
        self.assignments.values().map(Vec::len).sum()
    }

    pub fn section_of(&self, screen_id: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|(_, ids)| ids.iter().any(|id| id == screen_id))
            .map(|(section, _)| section.as_str())
    }

    fn score(&self, screen_id: &str, section_id: &str) -> f64 {
        self.scores
            .get(screen_id)
            .and_then(|row| row.get(section_id))
            .copied()
            .unwrap_or(0.0)
    }

    fn count(&self, section_id: &str) -> usize {
        self.assignments.get(section_id).map(Vec::len).unwrap_or(0)
    }
}

pub struct SectionPriorityEngine {
    weights: RelevanceWeights,
    /// Minimum target/current score ratio for an underfill move
    underfill_ratio: f64,
}

impl Default for SectionPriorityEngine {
    fn default() -> Self {
        Self::new(RelevanceWeights::default())
    }
}

impl SectionPriorityEngine {
    pub fn new(weights: RelevanceWeights) -> Self {
        Self {
            weights,
            underfill_ratio: 0.8,
        }
    }

    /// Relevance of `screen` for `slot`, given the screens already in it
    pub fn score(
        &self,
        screen: &EnhancedScreen,
        slot: &SectionSlot,
        members: &[&EnhancedScreen],
        slots: &[SectionSlot],
        ctx: &ScoringContext,
    ) -> RelevanceScore {
        let factors = RelevanceFactors {
            personalization: screen.personalized_score,
            similarity: content_similarity(screen, members),
            performance: screen.performance.composite(),
            trending: screen.trending_score,
            geographic: geographic_relevance(screen, ctx),
            temporal: temporal_relevance(screen, ctx.now.hour() as u8),
            diversity: diversity_bonus(screen, members),
        };

        let w = &self.weights;
        let base = w.personalization * factors.personalization
            + w.similarity * factors.similarity
            + w.performance * factors.performance
            + w.trending * factors.trending
            + w.geographic * factors.geographic
            + w.temporal * factors.temporal
            + w.diversity * factors.diversity;

        let (min_p, max_p) = priority_range(slots);
        let section_weight = normalize_score(slot.config.priority as f64, min_p, max_p);
        let scale = (0.5 + 0.5 * section_weight)
            * (0.5 + 0.5 * slot.config.algorithm.weight())
            * (0.5 + 0.5 * slot.confidence);

        RelevanceScore {
            screen_id: screen.id().to_string(),
            section_id: slot.id().to_string(),
            factors,
            total: (base * scale).clamp(0.0, 1.0),
        }
    }

    /// Greedy assignment: best-scoring screens pick first, each goes to its
    /// highest-scoring section with remaining capacity
    pub fn assign_screens_to_sections(
        &self,
        screens: &[EnhancedScreen],
        slots: &[SectionSlot],
        ctx: &ScoringContext,
    ) -> AssignmentResult {
        let mut result = AssignmentResult::default();
        for slot in slots {
            result.assignments.insert(slot.id().to_string(), Vec::new());
        }
        if slots.is_empty() {
            result.unassigned = screens.iter().map(|s| s.id().to_string()).collect();
            return result;
        }

        // Order by best standalone score
        let mut order: Vec<(&EnhancedScreen, f64)> = screens
            .iter()
            .map(|screen| {
                let best = slots
                    .iter()
                    .map(|slot| self.score(screen, slot, &[], slots, ctx).total)
                    .fold(0.0, f64::max);
                (screen, best)
            })
            .collect();
        order.sort_by(|a, b| desc(a.1, b.1).then_with(|| a.0.id().cmp(b.0.id())));

        let by_id: HashMap<&str, &EnhancedScreen> = screens.iter().map(|s| (s.id(), s)).collect();

        for (screen, _) in order {
            let mut ranked: Vec<(usize, f64)> = slots
                .iter()
                .enumerate()
                .map(|(idx, slot)| {
                    let members = members_of(&result, slot.id(), &by_id);
                    (idx, self.score(screen, slot, &members, slots, ctx).total)
                })
                .collect();
            ranked.sort_by(|a, b| desc(a.1, b.1).then_with(|| a.0.cmp(&b.0)));

            let row = result.scores.entry(screen.id().to_string()).or_default();
            for (idx, total) in &ranked {
                row.insert(slots[*idx].id().to_string(), *total);
            }

            let with_capacity = ranked
                .iter()
                .find(|(idx, _)| result.count(slots[*idx].id()) < slots[*idx].config.max_screens);

            let target = match with_capacity {
                Some((idx, _)) => slots[*idx].id().to_string(),
                None => {
                    let top = slots[ranked[0].0].id().to_string();
                    result.conflicts.push(AssignmentConflict {
                        screen_id: screen.id().to_string(),
                        competing_sections: ranked
                            .iter()
                            .map(|(idx, _)| slots[*idx].id().to_string())
                            .collect(),
                        strategy: ResolutionStrategy::CapacityOverflow,
                        assigned_to: Some(top.clone()),
                    });
                    top
                }
            };
            result
                .assignments
                .entry(target)
                .or_default()
                .push(screen.id().to_string());
        }

        result.balance = balance_metrics(&result, slots);
        info!(
            screens = screens.len(),
            sections = slots.len(),
            conflicts = result.conflicts.len(),
            balance = result.balance.balance_score,
            "Assigned screens to sections"
        );
        result
    }

    /// Score matrix and balance for an existing layout
    pub fn evaluate_sections(
        &self,
        sections: &[MarketplaceSection],
        slots: &[SectionSlot],
        ctx: &ScoringContext,
    ) -> AssignmentResult {
        let mut result = AssignmentResult::default();
        let by_section: HashMap<&str, &MarketplaceSection> =
            sections.iter().map(|s| (s.id.as_str(), s)).collect();

        for section in sections {
            result.assignments.insert(
                section.id.clone(),
                section.screens.iter().map(|s| s.id().to_string()).collect(),
            );
        }

        for section in sections {
            for screen in &section.screens {
                let row = result.scores.entry(screen.id().to_string()).or_default();
                for slot in slots {
                    let members: Vec<&EnhancedScreen> = by_section
                        .get(slot.id())
                        .map(|s| s.screens.iter().filter(|m| m.id() != screen.id()).collect())
                        .unwrap_or_default();
                    let total = self.score(screen, slot, &members, slots, ctx).total;
                    row.insert(slot.id().to_string(), total);
                }
            }
        }

        result.balance = balance_metrics(&result, slots);
        result
    }

    /// Push excess out of overfilled sections, then pull screens into
    /// underfilled ones. Donors never drop below their own minimum.
    pub fn handle_edge_cases(&self, result: &mut AssignmentResult, slots: &[SectionSlot]) {
        let limits: HashMap<&str, &SectionConfig> =
            slots.iter().map(|s| (s.id(), &s.config)).collect();

        // Overfilled
        for slot in slots {
            let max = slot.config.max_screens;
            while result.count(slot.id()) > max {
                let Some(victim) = self.lowest_scoring(result, slot.id()) else {
                    break;
                };
                remove_from(result, slot.id(), &victim);

                let next = self.ranked_sections(result, &victim, slots).into_iter().find(|id| {
                    id != slot.id()
                        && limits
                            .get(id.as_str())
                            .map_or(false, |cfg| result.count(id) < cfg.max_screens)
                });

                match next {
                    Some(target) => {
                        debug!(screen_id = %victim, from = %slot.id(), to = %target, "Moved overflow screen");
                        result.conflicts.push(AssignmentConflict {
                            screen_id: victim.clone(),
                            competing_sections: vec![slot.id().to_string(), target.clone()],
                            strategy: ResolutionStrategy::BalanceOverflow,
                            assigned_to: Some(target.clone()),
                        });
                        result.assignments.entry(target).or_default().push(victim);
                    }
                    None => {
                        debug!(screen_id = %victim, from = %slot.id(), "Dropped overflow screen");
                        result.conflicts.push(AssignmentConflict {
                            screen_id: victim.clone(),
                            competing_sections: vec![slot.id().to_string()],
                            strategy: ResolutionStrategy::Unassigned,
                            assigned_to: None,
                        });
                        result.unassigned.push(victim);
                    }
                }
            }
        }

        // Underfilled
        for slot in slots {
            let min = slot.config.min_screens;
            while result.count(slot.id()) < min {
                let Some((screen_id, donor)) = self.closest_donor(result, slot, &limits) else {
                    break;
                };
                remove_from(result, &donor, &screen_id);
                result.conflicts.push(AssignmentConflict {
                    screen_id: screen_id.clone(),
                    competing_sections: vec![donor.clone(), slot.id().to_string()],
                    strategy: ResolutionStrategy::BalanceUnderfill,
                    assigned_to: Some(slot.id().to_string()),
                });
                debug!(screen_id = %screen_id, from = %donor, to = %slot.id(), "Filled underfilled section");
                result
                    .assignments
                    .entry(slot.id().to_string())
                    .or_default()
                    .push(screen_id);
            }
        }

        result.balance = balance_metrics(result, slots);
    }

    fn lowest_scoring(&self, result: &AssignmentResult, section_id: &str) -> Option<String> {
        result.assignments.get(section_id).and_then(|ids| {
            ids.iter()
                .min_by(|a, b| {
                    result
                        .score(a, section_id)
                        .total_cmp(&result.score(b, section_id))
                        .then_with(|| b.cmp(a))
                })
                .cloned()
        })
    }

    fn ranked_sections(
        &self,
        result: &AssignmentResult,
        screen_id: &str,
        slots: &[SectionSlot],
    ) -> Vec<String> {
        let mut ranked: Vec<(String, f64)> = slots
            .iter()
            .map(|s| (s.id().to_string(), result.score(screen_id, s.id())))
            .collect();
        ranked.sort_by(|a, b| desc(a.1, b.1).then_with(|| a.0.cmp(&b.0)));
        ranked.into_iter().map(|(id, _)| id).collect()
    }

    /// The move with the smallest score loss that keeps the donor at or above its minimum
    fn closest_donor(
        &self,
        result: &AssignmentResult,
        target: &SectionSlot,
        limits: &HashMap<&str, &SectionConfig>,
    ) -> Option<(String, String)> {
        let mut best: Option<(String, String, f64)> = None;

        for (donor, ids) in &result.assignments {
            if donor == target.id() {
                continue;
            }
            let donor_min = limits.get(donor.as_str()).map_or(0, |cfg| cfg.min_screens);
            if ids.len() <= donor_min {
                continue;
            }
            for id in ids {
                let current = result.score(id, donor);
                let candidate = result.score(id, target.id());
                if candidate < self.underfill_ratio * current {
                    continue;
                }
                let loss = current - candidate;
                let better = match &best {
                    None => true,
                    Some((best_id, _, best_loss)) => {
                        loss < *best_loss || (loss == *best_loss && id < best_id)
                    }
                };
                if better {
                    best = Some((id.clone(), donor.clone(), loss));
                }
            }
        }
        best.map(|(id, donor, _)| (id, donor))
    }
}

fn members_of<'a>(
    result: &AssignmentResult,
    section_id: &str,
    by_id: &HashMap<&str, &'a EnhancedScreen>,
) -> Vec<&'a EnhancedScreen> {
    result
        .assignments
        .get(section_id)
        .map(|ids| ids.iter().filter_map(|id| by_id.get(id.as_str()).copied()).collect())
        .unwrap_or_default()
}

fn remove_from(result: &mut AssignmentResult, section_id: &str, screen_id: &str) {
    if let Some(ids) = result.assignments.get_mut(section_id) {
        ids.retain(|id| id != screen_id);
    }
}

fn priority_range(slots: &[SectionSlot]) -> (f64, f64) {
    let priorities = slots.iter().map(|s| s.config.priority as f64);
    let min = priorities.clone().fold(f64::MAX, f64::min);
    let max = priorities.fold(f64::MIN, f64::max);
    if slots.is_empty() {
        (0.0, 0.0)
    } else {
        (min, max)
    }
}

fn content_similarity(screen: &EnhancedScreen, members: &[&EnhancedScreen]) -> f64 {
    if members.is_empty() {
        return 0.5;
    }
    members
        .iter()
        .map(|m| similarity(&screen.screen, &m.screen))
        .sum::<f64>()
        / members.len() as f64
}

fn geographic_relevance(screen: &EnhancedScreen, ctx: &ScoringContext) -> f64 {
    if let Some(location) = &ctx.location {
        return if screen.screen.location.city.eq_ignore_ascii_case(location) {
            1.0
        } else if screen.screen.location.region.eq_ignore_ascii_case(location) {
            0.6
        } else {
            0.0
        };
    }
    if ctx.profile.location_preferences.is_empty() {
        return 0.5;
    }
    ctx.profile.location_score(&screen.screen.location.city)
}

fn temporal_relevance(screen: &EnhancedScreen, hour: u8) -> f64 {
    let peaks = &screen.performance.peak_hours;
    if peaks.contains(&hour) {
        1.0
    } else if peaks.iter().any(|p| p.abs_diff(hour) == 1 || p.abs_diff(hour) == 23) {
        0.5
    } else {
        0.0
    }
}

/// Rewards variety already present in a section, penalises homogeneity
fn diversity_bonus(screen: &EnhancedScreen, members: &[&EnhancedScreen]) -> f64 {
    if members.is_empty() {
        return 1.0;
    }
    let n = members.len() as f64;
    let band = price_band(screen.screen.price_per_day);
    let same_category = members
        .iter()
        .filter(|m| m.screen.category == screen.screen.category)
        .count() as f64
        / n;
    let same_band = members
        .iter()
        .filter(|m| price_band(m.screen.price_per_day) == band)
        .count() as f64
        / n;
    (1.0 - (0.6 * same_category + 0.4 * same_band)).clamp(0.0, 1.0)
}

/// Variance-based balance plus under/overfill lists
pub fn balance_metrics(result: &AssignmentResult, slots: &[SectionSlot]) -> BalanceMetrics {
    let mut metrics = BalanceMetrics::default();
    for slot in slots {
        let count = result.count(slot.id());
        metrics.section_counts.insert(slot.id().to_string(), count);
        if count < slot.config.min_screens {
            metrics.underfilled.push(slot.id().to_string());
        }
        if count > slot.config.max_screens {
            metrics.overfilled.push(slot.id().to_string());
        }
    }

    let counts: Vec<f64> = metrics.section_counts.values().map(|c| *c as f64).collect();
    let n = counts.len() as f64;
    let mean = if n > 0.0 { counts.iter().sum::<f64>() / n } else { 0.0 };
    metrics.balance_score = if mean <= 0.0 {
        1.0
    } else {
        let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
        (1.0 / (1.0 + variance / (mean * mean))).clamp(0.0, 1.0)
    };
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlgorithmType, PerformanceMetrics, Screen, ScreenCategory, TrendDirection};

    fn enhanced(id: &str, category: ScreenCategory, quality: f64) -> EnhancedScreen {
        let screen = Screen::new(id, "Berlin", category, 100.0 + quality * 500.0, 2.0 + quality * 3.0);
        let performance = PerformanceMetrics {
            screen_id: id.to_string(),
            booking_rate: quality,
            engagement_score: quality,
            conversion_rate: 0.1 * quality,
            impressions: 1000,
            revenue: 0.0,
            trend: TrendDirection::Stable,
            peak_hours: vec![8, 18],
        };
        EnhancedScreen::enhance(screen, performance, quality, quality)
    }

    fn ctx() -> ScoringContext {
        ScoringContext {
            profile: UserProfile::empty("u1", Utc::now()),
            location: None,
            now: Utc::now(),
        }
    }

    fn slots(max: usize) -> Vec<SectionSlot> {
        vec![
            SectionSlot::new(
                SectionConfig::new("top", "Top", AlgorithmType::MlPersonalized, 100, 2, max),
                0.9,
            ),
            SectionSlot::new(
                SectionConfig::new("trending", "Trending", AlgorithmType::TrendingAnalysis, 90, 2, max),
                0.8,
            ),
            SectionSlot::new(
                SectionConfig::new("popular", "Popular", AlgorithmType::FallbackPopular, 50, 2, max),
                0.5,
            ),
        ]
    }

    fn pool(n: usize) -> Vec<EnhancedScreen> {
        const CATEGORIES: [ScreenCategory; 3] =
            [ScreenCategory::Mall, ScreenCategory::Transit, ScreenCategory::Airport];
        (0..n)
            .map(|i| {
                enhanced(
                    &format!("s{:02}", i),
                    CATEGORIES[i % 3].clone(),
                    (i as f64 + 1.0) / (n as f64 + 1.0),
                )
            })
            .collect()
    }

    #[test]
    fn test_scores_are_bounded() {
        let engine = SectionPriorityEngine::default();
        let slots = slots(6);
        let screens = pool(10);
        let members: Vec<&EnhancedScreen> = screens.iter().take(3).collect();
        for screen in &screens {
            for slot in &slots {
                let score = engine.score(screen, slot, &members, &slots, &ctx());
                assert!((0.0..=1.0).contains(&score.total));
            }
        }
    }

    #[test]
    fn test_priority_and_algorithm_scale_scores() {
        let engine = SectionPriorityEngine::default();
        let slots = slots(6);
        let screen = enhanced("s1", ScreenCategory::Mall, 0.7);
        let top = engine.score(&screen, &slots[0], &[], &slots, &ctx()).total;
        let popular = engine.score(&screen, &slots[2], &[], &slots, &ctx()).total;
        assert!(top > popular);
    }

    #[test]
    fn test_twenty_screens_into_three_sections_of_six() {
        let engine = SectionPriorityEngine::default();
        let slots = slots(6);
        let screens = pool(20);

        let mut result = engine.assign_screens_to_sections(&screens, &slots, &ctx());
        assert_eq!(result.total_assigned(), 20);
        let overflow = result
            .conflicts
            .iter()
            .filter(|c| c.strategy == ResolutionStrategy::CapacityOverflow)
            .count();
        assert_eq!(overflow, 2);
        assert!(!result.balance.overfilled.is_empty());

        engine.handle_edge_cases(&mut result, &slots);
        assert!(result.total_assigned() <= 18);
        assert_eq!(result.unassigned.len(), 2);
        assert!(result.balance.overfilled.is_empty());
        assert!(result.assignments.values().all(|ids| ids.len() <= 6));
    }

    #[test]
    fn test_each_screen_assigned_once() {
        let engine = SectionPriorityEngine::default();
        let slots = slots(10);
        let screens = pool(12);
        let result = engine.assign_screens_to_sections(&screens, &slots, &ctx());

        let mut seen = std::collections::HashSet::new();
        for ids in result.assignments.values() {
            for id in ids {
                assert!(seen.insert(id.clone()), "{} assigned twice", id);
            }
        }
        assert_eq!(seen.len(), 12);
        assert!(result.conflicts.is_empty());
        assert_eq!(result.scores.len(), 12);
        assert!(result.scores.values().all(|row| row.len() == 3));
    }

    #[test]
    fn test_underfill_pulls_from_donor_above_minimum() {
        let engine = SectionPriorityEngine::default();
        let slots = slots(6);
        let mut result = AssignmentResult::default();
        result
            .assignments
            .insert("top".to_string(), vec!["a".into(), "b".into(), "c".into(), "d".into()]);
        result.assignments.insert("trending".to_string(), vec![]);
        result.assignments.insert("popular".to_string(), vec!["e".into(), "f".into()]);
        for (id, top, trending) in [
            ("a", 0.9, 0.2),
            ("b", 0.8, 0.75),
            ("c", 0.7, 0.6),
            ("d", 0.6, 0.1),
        ] {
            let row = result.scores.entry(id.to_string()).or_default();
            row.insert("top".to_string(), top);
            row.insert("trending".to_string(), trending);
        }
        for id in ["e", "f"] {
            let row = result.scores.entry(id.to_string()).or_default();
            row.insert("popular".to_string(), 0.5);
            row.insert("trending".to_string(), 0.49);
        }

        engine.handle_edge_cases(&mut result, &slots);

        // Popular sits at its minimum and must not donate
        assert_eq!(result.assignments["popular"].len(), 2);
        assert_eq!(result.assignments["trending"], vec!["b".to_string(), "c".to_string()]);
        assert_eq!(result.assignments["top"].len(), 2);
        assert!(result
            .conflicts
            .iter()
            .all(|c| c.strategy == ResolutionStrategy::BalanceUnderfill));
        assert!(result.balance.underfilled.is_empty());
    }

    #[test]
    fn test_balance_score_bounds() {
        let slots = slots(6);
        let mut result = AssignmentResult::default();
        for slot in &slots {
            result
                .assignments
                .insert(slot.id().to_string(), vec!["x".to_string(); 3]);
        }
        assert_eq!(balance_metrics(&result, &slots).balance_score, 1.0);

        result.assignments.insert("top".to_string(), vec!["x".to_string(); 9]);
        let skewed = balance_metrics(&result, &slots);
        assert!(skewed.balance_score < 1.0 && skewed.balance_score > 0.0);
        assert_eq!(skewed.overfilled, vec!["top".to_string()]);
    }

    #[test]
    fn test_evaluate_sections_builds_full_matrix() {
        let engine = SectionPriorityEngine::default();
        let slots = slots(6);
        let screens = pool(4);
        let now = Utc::now();
        let sections = vec![
            MarketplaceSection::from_config(&slots[0].config, screens[..2].to_vec(), 0.9, now, None),
            MarketplaceSection::from_config(&slots[1].config, screens[2..].to_vec(), 0.8, now, None),
        ];

        let result = engine.evaluate_sections(&sections, &slots, &ctx());
        assert_eq!(result.total_assigned(), 4);
        assert_eq!(result.scores.len(), 4);
        assert_eq!(result.section_of(screens[3].id()), Some("trending"));
        assert_eq!(result.balance.underfilled, vec!["popular".to_string()]);
    }
}
