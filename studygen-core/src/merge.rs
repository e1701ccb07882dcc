//! Per-field merging of streamed fragments into a result accumulator.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{CoreResult, StudyGenError};

/// How a fragment for one field updates the accumulated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// Last non-empty fragment wins.
    Overwrite,
    /// Fragment text is appended with no separator.
    AppendText,
    /// Fragment array is appended in order, duplicates kept.
    AppendList,
}

/// Field name → merge rule, with an optional rule for fields not listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSchema {
    fields: BTreeMap<String, MergeRule>,
    fallback: Option<MergeRule>,
}

impl MergeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, rule: MergeRule) -> Self {
        self.fields.insert(name.into(), rule);
        self
    }

    pub fn overwrite(self, name: impl Into<String>) -> Self {
        self.field(name, MergeRule::Overwrite)
    }

    pub fn append_text(self, name: impl Into<String>) -> Self {
        self.field(name, MergeRule::AppendText)
    }

    pub fn append_list(self, name: impl Into<String>) -> Self {
        self.field(name, MergeRule::AppendList)
    }

    /// Rule applied to fields the schema does not name. Without one they are ignored.
    pub fn fallback(mut self, rule: MergeRule) -> Self {
        self.fallback = Some(rule);
        self
    }

    pub fn rule_for(&self, name: &str) -> Option<MergeRule> {
        self.fields.get(name).copied().or(self.fallback)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, MergeRule)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Why a field in a fragment was not merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnknownField,
    EmptyValue,
    TypeMismatch { expected: &'static str, found: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedField {
    pub field: String,
    pub reason: SkipReason,
}

/// Result of merging one fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub applied: Vec<String>,
    pub skipped: Vec<SkippedField>,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// The growing result object for one generation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultAccumulator {
    fields: Map<String, Value>,
    merges: u64,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fragments that changed at least one field.
    pub fn merge_count(&self) -> u64 {
        self.merges
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Number of items in a list field, 0 when absent.
    pub fn list_len(&self, field: &str) -> usize {
        self.fields
            .get(field)
            .and_then(|v| v.as_array())
            .map_or(0, |a| a.len())
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Deserialize the accumulated object into a typed result.
    pub fn to_typed<T: DeserializeOwned>(&self) -> CoreResult<T> {
        serde_json::from_value(self.to_value())
            .map_err(|e| StudyGenError::Validation(format!("accumulated result has unexpected shape: {e}")))
    }

    /// Fold one fragment in. Fields are visited in the fragment's order;
    /// fields absent from the fragment are left untouched.
    pub fn merge(&mut self, schema: &MergeSchema, fragment: &Map<String, Value>) -> MergeReport {
        let mut report = MergeReport::default();
        for (name, value) in fragment {
            let Some(rule) = schema.rule_for(name) else {
                debug!(field = %name, "ignoring field not in merge schema");
                report.skipped.push(SkippedField {
                    field: name.clone(),
                    reason: SkipReason::UnknownField,
                });
                continue;
            };
            match self.apply(name, rule, value) {
                Ok(true) => report.applied.push(name.clone()),
                Ok(false) => report.skipped.push(SkippedField {
                    field: name.clone(),
                    reason: SkipReason::EmptyValue,
                }),
                Err(reason) => {
                    warn!(field = %name, ?rule, ?reason, "skipping fragment with unexpected shape");
                    report.skipped.push(SkippedField {
                        field: name.clone(),
                        reason,
                    });
                }
            }
        }
        if report.changed() {
            self.merges += 1;
        }
        report
    }

    fn apply(&mut self, name: &str, rule: MergeRule, value: &Value) -> Result<bool, SkipReason> {
        match rule {
            MergeRule::Overwrite => match value {
                Value::Null => Ok(false),
                Value::String(s) if s.is_empty() => Ok(false),
                Value::Array(_) => Err(mismatch("scalar", value)),
                v => {
                    self.fields.insert(name.to_string(), v.clone());
                    Ok(true)
                }
            },
            MergeRule::AppendText => {
                let Value::String(fragment) = value else {
                    return match value {
                        Value::Null => Ok(false),
                        v => Err(mismatch("string", v)),
                    };
                };
                if fragment.is_empty() {
                    return Ok(false);
                }
                match self.fields.get_mut(name) {
                    Some(Value::String(existing)) => existing.push_str(fragment),
                    _ => {
                        self.fields.insert(name.to_string(), Value::String(fragment.clone()));
                    }
                }
                Ok(true)
            }
            MergeRule::AppendList => {
                let Value::Array(items) = value else {
                    return match value {
                        Value::Null => Ok(false),
                        v => Err(mismatch("array", v)),
                    };
                };
                if items.is_empty() {
                    return Ok(false);
                }
                match self.fields.get_mut(name) {
                    Some(Value::Array(existing)) => existing.extend(items.iter().cloned()),
                    _ => {
                        self.fields.insert(name.to_string(), Value::Array(items.clone()));
                    }
                }
                Ok(true)
            }
        }
    }
}

fn mismatch(expected: &'static str, found: &Value) -> SkipReason {
    SkipReason::TypeMismatch {
        expected,
        found: json_type(found),
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frag(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("fragment must be an object"),
        }
    }

    fn essay_schema() -> MergeSchema {
        MergeSchema::new()
            .overwrite("title")
            .append_text("content")
            .append_list("citations")
    }

    #[test]
    fn overwrite_and_append_are_distinct() {
        let schema = essay_schema();
        let mut acc = ResultAccumulator::new();
        acc.merge(&schema, &frag(json!({"title": "Intro", "content": "Hello "})));
        acc.merge(&schema, &frag(json!({"title": "Introduction", "content": "world."})));
        assert_eq!(acc.get("title"), Some(&json!("Introduction")));
        assert_eq!(acc.get("content"), Some(&json!("Hello world.")));
        assert_eq!(acc.merge_count(), 2);
    }

    #[test]
    fn list_fields_concatenate_in_order_without_dedup() {
        let schema = MergeSchema::new().append_list("items");
        let mut acc = ResultAccumulator::new();
        acc.merge(&schema, &frag(json!({"items": ["a", "b"]})));
        acc.merge(&schema, &frag(json!({"items": ["c"]})));
        assert_eq!(acc.get("items"), Some(&json!(["a", "b", "c"])));
        acc.merge(&schema, &frag(json!({"items": ["a"]})));
        assert_eq!(acc.get("items"), Some(&json!(["a", "b", "c", "a"])));
        assert_eq!(acc.list_len("items"), 4);
    }

    #[test]
    fn rechunked_fragments_merge_to_same_result() {
        let schema = essay_schema();
        let whole = vec![
            frag(json!({"title": "T", "content": "The quick brown fox", "citations": ["a", "b", "c"]})),
            frag(json!({"content": " jumps."})),
        ];
        let split = vec![
            frag(json!({"title": "T", "content": "The quick", "citations": ["a"]})),
            frag(json!({"content": " brown fox", "citations": ["b", "c"]})),
            frag(json!({"content": " jum"})),
            frag(json!({"content": "ps."})),
        ];
        let mut a = ResultAccumulator::new();
        for f in &whole {
            a.merge(&schema, f);
        }
        let mut b = ResultAccumulator::new();
        for f in &split {
            b.merge(&schema, f);
        }
        assert_eq!(a.to_value(), b.to_value());
    }

    #[test]
    fn absent_fields_are_untouched_and_empty_values_ignored() {
        let schema = essay_schema();
        let mut acc = ResultAccumulator::new();
        acc.merge(&schema, &frag(json!({"title": "Keep", "content": "x"})));
        let report = acc.merge(&schema, &frag(json!({"title": "", "content": null})));
        assert!(!report.changed());
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(acc.get("title"), Some(&json!("Keep")));
        assert_eq!(acc.get("content"), Some(&json!("x")));
        assert_eq!(acc.merge_count(), 1);
    }

    #[test]
    fn type_mismatch_is_skipped_not_fatal() {
        let schema = essay_schema();
        let mut acc = ResultAccumulator::new();
        let report = acc.merge(
            &schema,
            &frag(json!({"content": ["not", "text"], "citations": "nope", "title": "ok"})),
        );
        assert_eq!(report.applied, vec!["title".to_string()]);
        assert!(report.skipped.contains(&SkippedField {
            field: "content".into(),
            reason: SkipReason::TypeMismatch { expected: "string", found: "array" },
        }));
        assert!(report.skipped.contains(&SkippedField {
            field: "citations".into(),
            reason: SkipReason::TypeMismatch { expected: "array", found: "string" },
        }));
        assert!(acc.get("content").is_none());
    }

    #[test]
    fn unknown_fields_follow_fallback() {
        let strict = MergeSchema::new().overwrite("title");
        let mut acc = ResultAccumulator::new();
        let report = acc.merge(&strict, &frag(json!({"extra": "x"})));
        assert_eq!(report.skipped[0].reason, SkipReason::UnknownField);
        assert!(acc.is_empty());

        let lenient = MergeSchema::new().fallback(MergeRule::Overwrite);
        acc.merge(&lenient, &frag(json!({"extra": {"k": 1}})));
        assert_eq!(acc.get("extra"), Some(&json!({"k": 1})));
    }

    #[test]
    fn to_typed_reads_accumulated_object() {
        #[derive(serde::Deserialize)]
        struct Essay {
            title: String,
            content: String,
        }
        let schema = essay_schema();
        let mut acc = ResultAccumulator::new();
        acc.merge(&schema, &frag(json!({"title": "T", "content": "body"})));
        let essay: Essay = acc.to_typed().unwrap();
        assert_eq!(essay.title, "T");
        assert_eq!(essay.content, "body");
    }
}
