//! Unit estimation for tasks submitted without a caller estimate.
//!
//! The engine picks an estimator from [`EstimatorKind`] in the config. The
//! estimate only feeds the admission check; actual usage is billed on
//! completion.

use serde::{Deserialize, Serialize};

/// Estimates billable units for a task's text.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> u64;

    /// Short name, logged alongside each admission.
    fn name(&self) -> &str;
}

/// ceil(chars / `chars_per_unit`). Counts Unicode scalar values, not bytes.
#[derive(Debug, Clone)]
pub struct CharCountEstimator {
    pub chars_per_unit: f64,
}

impl Default for CharCountEstimator {
    fn default() -> Self {
        Self {
            chars_per_unit: 4.0,
        }
    }
}

impl TokenEstimator for CharCountEstimator {
    fn estimate(&self, text: &str) -> u64 {
        if self.chars_per_unit.is_nan() || self.chars_per_unit <= 0.0 {
            return 0;
        }
        let chars = text.chars().count();
        (chars as f64 / self.chars_per_unit).ceil() as u64
    }

    fn name(&self) -> &str {
        "char_count"
    }
}

/// ceil(words * `units_per_word`)
#[derive(Debug, Clone)]
pub struct WordCountEstimator {
    pub units_per_word: f64,
}

impl Default for WordCountEstimator {
    fn default() -> Self {
        Self {
            units_per_word: 1.3,
        }
    }
}

impl TokenEstimator for WordCountEstimator {
    fn estimate(&self, text: &str) -> u64 {
        let words = text.split_whitespace().count();
        (words as f64 * self.units_per_word.max(0.0)).ceil() as u64
    }

    fn name(&self) -> &str {
        "word_count"
    }
}

/// Estimator selection as it appears in config (`estimator = "word_count"`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    #[default]
    CharCount,
    WordCount,
}

impl EstimatorKind {
    pub fn build(self) -> Box<dyn TokenEstimator> {
        match self {
            Self::CharCount => Box::new(CharCountEstimator::default()),
            Self::WordCount => Box::new(WordCountEstimator::default()),
        }
    }
}
