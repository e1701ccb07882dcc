use regex::Regex;
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

use crate::error::{CoreResult, StudyGenError};
use crate::generators::GeneratorKind;
use crate::model::GenerationParams;

/// Longest topic accepted, in characters.
pub const MAX_TOPIC_CHARS: usize = 500;

fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

/// Cleans user parameters before they are sent to a generator.
#[derive(Debug, Clone)]
pub struct Normalizer {
    whitespace: Regex,
}

impl Normalizer {
    pub fn new() -> CoreResult<Self> {
        let whitespace = Regex::new(r"\s+")
            .map_err(|e| StudyGenError::Other(anyhow::anyhow!("whitespace pattern: {e}")))?;
        Ok(Self { whitespace })
    }

    fn clean_topic(&self, s: &str) -> String {
        let t = clean_text(s);
        self.whitespace.replace_all(&t, " ").into_owned()
    }

    /// Returns params with a cleaned topic and a count inside the generator's
    /// bounds. Fails when the topic is empty after cleaning or too long.
    pub fn normalize(&self, kind: GeneratorKind, mut params: GenerationParams) -> CoreResult<GenerationParams> {
        params.topic = self.clean_topic(&params.topic);
        if params.topic.is_empty() {
            return Err(StudyGenError::Validation("topic must not be empty".into()));
        }
        let chars = params.topic.chars().count();
        if chars > MAX_TOPIC_CHARS {
            return Err(StudyGenError::Validation(format!(
                "topic is {chars} characters, limit is {MAX_TOPIC_CHARS}"
            )));
        }
        params.count = kind
            .count_spec()
            .map(|bounds| params.count.unwrap_or(bounds.default).clamp(bounds.min, bounds.max));
        if let Some(extra) = &mut params.extra {
            for v in extra.values_mut() {
                if let Value::String(s) = v {
                    *s = clean_text(s);
                }
            }
            extra.retain(|_, v| !v.is_null());
            if extra.is_empty() {
                params.extra = None;
            }
        }
        Ok(params)
    }
}
