//! Novelty multiplier: boosts rare topics and discounts over-covered ones.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Below this many scored posts the topic counts are too thin to mean anything.
pub const DEFAULT_COLD_START_THRESHOLD: i64 = 30;

/// Occurrence-count breakpoints over the trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyThresholds {
    pub rare: i64,
    pub common: i64,
    pub very_common: i64,
}

/// Process-wide novelty tuning. Exactly one live instance is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoveltyConfig {
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    #[serde(default = "default_window_days")]
    pub window_days: i32,
    pub frequency_thresholds: FrequencyThresholds,
}

fn default_window_days() -> i32 {
    30
}

impl Default for NoveltyConfig {
    fn default() -> Self {
        Self {
            min_multiplier: 0.2,
            max_multiplier: 1.5,
            window_days: default_window_days(),
            frequency_thresholds: FrequencyThresholds {
                rare: 5,
                common: 30,
                very_common: 100,
            },
        }
    }
}

impl NoveltyConfig {
    /// Checks the ordering constraints an operator save must satisfy.
    ///
    /// # Errors
    /// Returns a human-readable reason when a threshold or multiplier is out of order.
    pub fn validate(&self) -> Result<(), String> {
        let FrequencyThresholds {
            rare,
            common,
            very_common,
        } = self.frequency_thresholds;

        if rare < 0 {
            return Err(format!("rare threshold must be >= 0, got {rare}"));
        }
        if !(rare <= common && common <= very_common) {
            return Err(format!(
                "thresholds must satisfy rare <= common <= very_common, got {rare}/{common}/{very_common}"
            ));
        }
        if !self.min_multiplier.is_finite() || !self.max_multiplier.is_finite() {
            return Err("multipliers must be finite".to_string());
        }
        if self.min_multiplier < 0.0 || self.min_multiplier > 1.0 {
            return Err(format!(
                "min_multiplier must be within [0, 1], got {}",
                self.min_multiplier
            ));
        }
        if self.max_multiplier < 1.0 {
            return Err(format!(
                "max_multiplier must be >= 1, got {}",
                self.max_multiplier
            ));
        }
        if self.window_days < 1 {
            return Err(format!(
                "window_days must be >= 1, got {}",
                self.window_days
            ));
        }
        Ok(())
    }

    /// Piecewise-linear multiplier for an occurrence count `count`.
    ///
    /// Non-increasing in `count`, exactly `max_multiplier` at `rare`, `1.0` at `common`
    /// and `min_multiplier` at `very_common`. A zero-width segment is a jump.
    #[must_use]
    pub fn multiplier_for_count(&self, count: f64) -> f64 {
        let FrequencyThresholds {
            rare,
            common,
            very_common,
        } = self.frequency_thresholds;
        #[allow(clippy::cast_precision_loss)]
        let (rare, common, very_common) = (rare as f64, common as f64, very_common as f64);

        if count <= rare {
            return self.max_multiplier;
        }
        if count <= common {
            let width = common - rare;
            if width <= 0.0 {
                return 1.0;
            }
            let ratio = (count - rare) / width;
            return self.max_multiplier - ratio * (self.max_multiplier - 1.0);
        }
        if count <= very_common {
            let width = very_common - common;
            if width <= 0.0 {
                return self.min_multiplier;
            }
            let ratio = (count - common) / width;
            return 1.0 - ratio * (1.0 - self.min_multiplier);
        }
        self.min_multiplier
    }
}

/// Topic counts for the trailing window plus the corpus size they were drawn from.
#[derive(Debug, Clone, Default)]
pub struct TopicFrequencies {
    counts: HashMap<String, i64>,
    total_scored: i64,
}

impl TopicFrequencies {
    #[must_use]
    pub fn new(counts: HashMap<String, i64>, total_scored: i64) -> Self {
        Self {
            counts,
            total_scored,
        }
    }

    #[must_use]
    pub fn count(&self, category: &str) -> i64 {
        self.counts.get(category).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    #[must_use]
    pub fn total_scored(&self) -> i64 {
        self.total_scored
    }

    /// Mean window count across a post's categories.
    #[must_use]
    pub fn average_count(&self, categories: &[String]) -> f64 {
        if categories.is_empty() {
            return 0.0;
        }
        let sum: i64 = categories.iter().map(|category| self.count(category)).sum();
        #[allow(clippy::cast_precision_loss)]
        let average = sum as f64 / categories.len() as f64;
        average
    }
}

/// Multiplier for a post, neutral during cold start.
#[derive(Debug, Clone)]
pub struct NoveltyModel {
    config: NoveltyConfig,
    frequencies: TopicFrequencies,
    cold_start_threshold: i64,
}

impl NoveltyModel {
    #[must_use]
    pub fn new(
        config: NoveltyConfig,
        frequencies: TopicFrequencies,
        cold_start_threshold: i64,
    ) -> Self {
        Self {
            config,
            frequencies,
            cold_start_threshold,
        }
    }

    #[must_use]
    pub fn config(&self) -> &NoveltyConfig {
        &self.config
    }

    #[must_use]
    pub fn is_cold_start(&self) -> bool {
        self.frequencies.is_empty() || self.frequencies.total_scored() < self.cold_start_threshold
    }

    #[must_use]
    pub fn multiplier(&self, categories: &[String]) -> f64 {
        if categories.is_empty() || self.is_cold_start() {
            return 1.0;
        }
        let count = self.frequencies.average_count(categories);
        self.config.multiplier_for_count(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn scenario_config() -> NoveltyConfig {
        NoveltyConfig {
            min_multiplier: 0.2,
            max_multiplier: 1.5,
            window_days: 30,
            frequency_thresholds: FrequencyThresholds {
                rare: 5,
                common: 30,
                very_common: 100,
            },
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[rstest]
    #[case(0.0, 1.5)]
    #[case(5.0, 1.5)]
    #[case(30.0, 1.0)]
    #[case(100.0, 0.2)]
    #[case(250.0, 0.2)]
    fn breakpoints_hit_exact_values(#[case] count: f64, #[case] expected: f64) {
        assert_close(scenario_config().multiplier_for_count(count), expected);
    }

    #[test]
    fn interpolates_between_rare_and_common() {
        let multiplier = scenario_config().multiplier_for_count(17.0);
        assert_close(multiplier, 1.26);
    }

    #[test]
    fn interpolates_between_common_and_very_common() {
        // halfway from 30 to 100
        let multiplier = scenario_config().multiplier_for_count(65.0);
        assert_close(multiplier, 0.6);
    }

    #[test]
    fn multiplier_is_non_increasing() {
        let config = scenario_config();
        let mut previous = f64::INFINITY;
        for step in 0..=240 {
            let count = f64::from(step) * 0.5;
            let value = config.multiplier_for_count(count);
            assert!(value <= previous, "increase at count {count}");
            previous = value;
        }
    }

    #[test]
    fn degenerate_segments_jump_without_dividing_by_zero() {
        let mut config = scenario_config();
        config.frequency_thresholds = FrequencyThresholds {
            rare: 10,
            common: 10,
            very_common: 10,
        };
        assert_close(config.multiplier_for_count(10.0), 1.5);
        assert_close(config.multiplier_for_count(10.5), 0.2);
        assert!(config.multiplier_for_count(10.5).is_finite());
    }

    #[test]
    fn common_equal_to_very_common_drops_to_min_after_common() {
        let mut config = scenario_config();
        config.frequency_thresholds.very_common = 30;
        assert_close(config.multiplier_for_count(30.0), 1.0);
        assert_close(config.multiplier_for_count(31.0), 0.2);
    }

    #[rstest]
    #[case(FrequencyThresholds { rare: 6, common: 5, very_common: 100 }, 0.2, 1.5, 30)]
    #[case(FrequencyThresholds { rare: -1, common: 5, very_common: 100 }, 0.2, 1.5, 30)]
    #[case(FrequencyThresholds { rare: 5, common: 30, very_common: 100 }, 1.1, 1.5, 30)]
    #[case(FrequencyThresholds { rare: 5, common: 30, very_common: 100 }, 0.2, 0.9, 30)]
    #[case(FrequencyThresholds { rare: 5, common: 30, very_common: 100 }, 0.2, 1.5, 0)]
    fn validate_rejects_out_of_order_configs(
        #[case] thresholds: FrequencyThresholds,
        #[case] min_multiplier: f64,
        #[case] max_multiplier: f64,
        #[case] window_days: i32,
    ) {
        let config = NoveltyConfig {
            min_multiplier,
            max_multiplier,
            window_days,
            frequency_thresholds: thresholds,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(NoveltyConfig::default().validate().is_ok());
    }

    #[test]
    fn model_is_neutral_during_cold_start() {
        let counts = HashMap::from([("crime".to_string(), 200)]);
        let model = NoveltyModel::new(
            scenario_config(),
            TopicFrequencies::new(counts, 10),
            DEFAULT_COLD_START_THRESHOLD,
        );
        assert!(model.is_cold_start());
        assert_close(model.multiplier(&["crime".to_string()]), 1.0);
    }

    #[test]
    fn model_averages_category_counts() {
        let counts = HashMap::from([("crime".to_string(), 30), ("pets".to_string(), 4)]);
        let model = NoveltyModel::new(
            scenario_config(),
            TopicFrequencies::new(counts, 500),
            DEFAULT_COLD_START_THRESHOLD,
        );
        // (30 + 4) / 2 = 17
        let multiplier = model.multiplier(&["crime".to_string(), "pets".to_string()]);
        assert_close(multiplier, 1.26);
        assert_close(model.multiplier(&[]), 1.0);
        assert_close(model.multiplier(&["unseen".to_string()]), 1.5);
    }

    #[test]
    fn novelty_config_reads_nested_threshold_json() {
        let raw = serde_json::json!({
            "min_multiplier": 0.3,
            "max_multiplier": 2.0,
            "frequency_thresholds": { "rare": 1, "common": 2, "very_common": 3 }
        });
        let config: NoveltyConfig = serde_json::from_value(raw).expect("parses");
        assert_eq!(config.window_days, 30);
        assert_eq!(config.frequency_thresholds.very_common, 3);
    }
}
