use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StudyGenError;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Length {
    Short,
    Medium,
    Long,
}

impl FromStr for Difficulty {
    type Err = StudyGenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(StudyGenError::Validation(format!("unknown difficulty '{other}'"))),
        }
    }
}

impl FromStr for Length {
    type Err = StudyGenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "medium" => Ok(Self::Medium),
            "long" => Ok(Self::Long),
            other => Err(StudyGenError::Validation(format!("unknown length '{other}'"))),
        }
    }
}

/// Parameters a user submits for one generation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct GenerationParams {
    pub topic: String,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub length: Option<Length>,
    /// Number of items (questions, cards, words...). Ignored by generators without a count.
    #[serde(default)]
    pub count: Option<u32>,
    /// Generator-specific knobs passed through untouched.
    #[serde(default)]
    pub extra: Option<Map<String, Value>>,
}

impl GenerationParams {
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_length(mut self, length: Length) -> Self {
        self.length = Some(length);
        self
    }
}
