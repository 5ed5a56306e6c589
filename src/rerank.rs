//! Recency-aware re-ranking of search results
//!
//! Fuses vector similarity with two time-decay signals: freshness (how
//! recently a memory was accessed) and novelty (how recently it was created).
//! Pinned memories get a flat bonus. Weights are overridable per query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MemoryRecord, MemoryRecordResult};

/// Weights and half-lives for the score fusion
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecencyConfig {
    /// Weight of the semantic similarity score
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
    /// Weight of the combined recency score
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,
    /// Weight of freshness (last access) within the recency score
    #[serde(default = "default_freshness_weight")]
    pub freshness_weight: f32,
    /// Weight of novelty (creation) within the recency score
    #[serde(default = "default_novelty_weight")]
    pub novelty_weight: f32,
    /// Freshness half-life in days
    #[serde(default = "default_access_half_life")]
    pub access_half_life_days: f32,
    /// Novelty half-life in days
    #[serde(default = "default_creation_half_life")]
    pub creation_half_life_days: f32,
    /// Flat bonus for pinned records
    #[serde(default = "default_pinned_bonus")]
    pub pinned_bonus: f32,
}

fn default_semantic_weight() -> f32 {
    0.7
}

fn default_recency_weight() -> f32 {
    0.3
}

fn default_freshness_weight() -> f32 {
    0.6
}

fn default_novelty_weight() -> f32 {
    0.4
}

fn default_access_half_life() -> f32 {
    7.0
}

fn default_creation_half_life() -> f32 {
    30.0
}

fn default_pinned_bonus() -> f32 {
    0.1
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            recency_weight: default_recency_weight(),
            freshness_weight: default_freshness_weight(),
            novelty_weight: default_novelty_weight(),
            access_half_life_days: default_access_half_life(),
            creation_half_life_days: default_creation_half_life(),
            pinned_bonus: default_pinned_bonus(),
        }
    }
}

/// Score components for one candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecencyScore {
    pub semantic: f32,
    pub freshness: f32,
    pub novelty: f32,
    pub recency: f32,
    pub final_score: f32,
}

fn age_days(now: DateTime<Utc>, then: DateTime<Utc>) -> f32 {
    ((now - then).num_seconds().max(0) as f32) / 86_400.0
}

/// Exponential half-life decay: 1.0 at age zero, 0.5 after one half-life
fn decay(age_days: f32, half_life_days: f32) -> f32 {
    if half_life_days <= 0.0 {
        return 0.0;
    }
    0.5_f32.powf(age_days / half_life_days)
}

impl RecencyConfig {
    /// Score one candidate with distance `dist` at time `now`
    pub fn score(&self, record: &MemoryRecord, dist: f32, now: DateTime<Utc>) -> RecencyScore {
        let semantic = (1.0 - dist / 2.0).clamp(0.0, 1.0);
        let freshness = decay(age_days(now, record.last_accessed), self.access_half_life_days);
        let novelty = decay(age_days(now, record.created_at), self.creation_half_life_days);

        let weight_sum = self.freshness_weight + self.novelty_weight;
        let recency = if weight_sum > 0.0 {
            (self.freshness_weight * freshness + self.novelty_weight * novelty) / weight_sum
        } else {
            0.0
        };

        let mut final_score = self.semantic_weight * semantic + self.recency_weight * recency;
        if record.pinned {
            final_score += self.pinned_bonus;
        }

        RecencyScore {
            semantic,
            freshness,
            novelty,
            recency,
            final_score,
        }
    }
}

/// Sort results descending by fused score, stable by original position
pub fn rerank(
    results: Vec<MemoryRecordResult>,
    config: &RecencyConfig,
    now: DateTime<Utc>,
) -> Vec<MemoryRecordResult> {
    let mut scored: Vec<(MemoryRecordResult, f32)> = results
        .into_iter()
        .map(|r| {
            let score = config.score(&r.record, r.dist, now).final_score;
            (r, score)
        })
        .collect();

    // sort_by is stable, so equal scores keep their original order
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(r, _)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn result_with(
        id: &str,
        dist: f32,
        last_accessed_days_ago: i64,
        created_days_ago: i64,
    ) -> MemoryRecordResult {
        let now = Utc::now();
        let mut record = MemoryRecord::new(format!("memory {}", id));
        record.id = id.to_string();
        record.last_accessed = now - Duration::days(last_accessed_days_ago);
        record.created_at = now - Duration::days(created_days_ago);
        MemoryRecordResult {
            record,
            dist,
            origin: None,
        }
    }

    #[test]
    fn test_semantic_score_from_distance() {
        let config = RecencyConfig::default();
        let now = Utc::now();
        let r = result_with("a", 0.0, 0, 0);
        assert!((config.score(&r.record, 0.0, now).semantic - 1.0).abs() < 0.001);
        assert!((config.score(&r.record, 2.0, now).semantic - 0.0).abs() < 0.001);
        assert!((config.score(&r.record, 1.0, now).semantic - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_decay_halves_per_half_life() {
        assert!((decay(0.0, 7.0) - 1.0).abs() < 0.001);
        assert!((decay(7.0, 7.0) - 0.5).abs() < 0.001);
        assert!((decay(14.0, 7.0) - 0.25).abs() < 0.001);
    }

    #[test]
    fn test_fresh_record_beats_slightly_closer_stale_one() {
        // dist 0.25 but accessed now vs dist 0.20 accessed 60 days ago
        let fresh = result_with("fresh", 0.25, 0, 0);
        let stale = result_with("stale", 0.20, 60, 60);

        let ranked = rerank(vec![stale, fresh], &RecencyConfig::default(), Utc::now());
        assert_eq!(ranked[0].record.id, "fresh");
    }

    #[test]
    fn test_sort_is_stable_on_ties() {
        let a = result_with("a", 0.3, 5, 5);
        let b = result_with("b", 0.3, 5, 5);
        let ranked = rerank(vec![a, b], &RecencyConfig::default(), Utc::now());
        assert_eq!(ranked[0].record.id, "a");
        assert_eq!(ranked[1].record.id, "b");
    }

    #[test]
    fn test_pinned_bonus_applies() {
        let config = RecencyConfig::default();
        let now = Utc::now();
        let plain = result_with("plain", 0.4, 10, 10);
        let mut pinned = result_with("pinned", 0.4, 10, 10);
        pinned.record.pinned = true;

        let plain_score = config.score(&plain.record, plain.dist, now).final_score;
        let pinned_score = config.score(&pinned.record, pinned.dist, now).final_score;
        assert!((pinned_score - plain_score - 0.1).abs() < 0.001);
    }

    #[test]
    fn test_scores_are_non_increasing_after_rerank() {
        let config = RecencyConfig::default();
        let now = Utc::now();
        let results = vec![
            result_with("a", 0.1, 40, 50),
            result_with("b", 0.9, 0, 1),
            result_with("c", 0.5, 5, 20),
        ];
        let ranked = rerank(results, &config, now);
        let scores: Vec<f32> = ranked
            .iter()
            .map(|r| config.score(&r.record, r.dist, now).final_score)
            .collect();
        for pair in scores.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn test_weight_overrides_deserialize_partially() {
        let config: RecencyConfig =
            serde_json::from_str(r#"{"semantic_weight": 0.9}"#).unwrap();
        assert!((config.semantic_weight - 0.9).abs() < f32::EPSILON);
        assert!((config.recency_weight - 0.3).abs() < f32::EPSILON);
    }
}
