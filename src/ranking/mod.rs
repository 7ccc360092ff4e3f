//! Ranking engine: weighted dimension mean times a topic novelty multiplier.

pub mod engine;
pub mod novelty;

pub use engine::{SCORING_DIMENSIONS, final_score, is_known_dimension, weighted_mean};
pub use novelty::{
    DEFAULT_COLD_START_THRESHOLD, FrequencyThresholds, NoveltyConfig, NoveltyModel,
    TopicFrequencies,
};
