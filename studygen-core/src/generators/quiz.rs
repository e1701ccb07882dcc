use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreResult, StudyGenError};
use crate::merge::ResultAccumulator;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct McqQuestion {
    pub question: String,
    pub options: Vec<String>,
    /// Index into `options` of the right answer.
    pub correct: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizScore {
    pub correct: u32,
    pub total: u32,
}

impl QuizScore {
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f32 * 100.0 / self.total as f32
    }
}

/// Scores answers against questions position by position. A missing answer
/// counts as wrong; answers beyond the last question are ignored.
pub fn score_answers(questions: &[McqQuestion], answers: &[Option<usize>]) -> QuizScore {
    let correct = questions
        .iter()
        .zip(answers.iter())
        .filter(|(q, a)| **a == Some(q.correct))
        .count() as u32;
    QuizScore {
        correct,
        total: questions.len() as u32,
    }
}

/// Questions accumulated so far by a quiz generation.
pub fn questions_from(acc: &ResultAccumulator) -> CoreResult<Vec<McqQuestion>> {
    parse_questions(acc.get("questions"))
}

/// Questions stored in a saved quiz record's content.
pub fn questions_from_content(content: &Value) -> CoreResult<Vec<McqQuestion>> {
    parse_questions(content.get("mcqs"))
}

fn parse_questions(v: Option<&Value>) -> CoreResult<Vec<McqQuestion>> {
    match v {
        None => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| StudyGenError::Validation(format!("malformed quiz questions: {e}"))),
    }
}
