//! Final score computation. Pure, no I/O.

use std::collections::{BTreeMap, HashMap};

/// Upper bound of the base scale the weighted mean is rescaled onto.
pub const BASE_SCALE_MAX: f64 = 10.0;

/// Scoring dimensions produced by the upstream LLM scorer.
pub const SCORING_DIMENSIONS: [&str; 7] = [
    "absurdity",
    "discussion_spark",
    "drama",
    "emotional_intensity",
    "news_value",
    "podcast_worthy",
    "readability",
];

#[must_use]
pub fn is_known_dimension(dimension: &str) -> bool {
    SCORING_DIMENSIONS.contains(&dimension)
}

/// Weighted mean of the dimensions present in both maps.
///
/// Returns `0.0` when no positively weighted dimension overlaps the raw scores.
#[must_use]
pub fn weighted_mean(scores: &HashMap<String, f64>, weights: &BTreeMap<String, f64>) -> f64 {
    let mut numerator = 0.0;
    let mut denominator = 0.0;

    for (dimension, weight) in weights {
        let Some(score) = scores.get(dimension) else {
            continue;
        };
        if !score.is_finite() || !weight.is_finite() {
            continue;
        }
        numerator += weight * score;
        denominator += weight;
    }

    if denominator <= 0.0 {
        return 0.0;
    }
    numerator / denominator
}

/// Clamps a weighted mean onto the `[0, 10]` base scale.
#[must_use]
pub fn rescale(mean: f64) -> f64 {
    mean.clamp(0.0, BASE_SCALE_MAX)
}

/// `final_score = rescale(weighted_mean) * novelty_multiplier`.
#[must_use]
pub fn final_score(
    scores: &HashMap<String, f64>,
    weights: &BTreeMap<String, f64>,
    novelty_multiplier: f64,
) -> f64 {
    rescale(weighted_mean(scores, weights)) * novelty_multiplier
}
