use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreResult, StudyGenError};
use crate::merge::ResultAccumulator;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

pub fn flashcards_from(acc: &ResultAccumulator) -> CoreResult<Vec<Flashcard>> {
    match acc.get("cards") {
        None => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| StudyGenError::Validation(format!("malformed flashcards: {e}"))),
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EssayResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Citation shapes vary by prompt; kept as raw JSON.
    #[serde(default)]
    pub citations: Vec<Value>,
}

impl EssayResult {
    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DiagramElement {
    pub id: String,
    pub label: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DiagramConnection {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DiagramResult {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "diagramType", default)]
    pub diagram_type: Option<String>,
    #[serde(default)]
    pub elements: Vec<DiagramElement>,
    #[serde(default)]
    pub connections: Vec<DiagramConnection>,
}

impl DiagramResult {
    /// Connections whose endpoints do not name a known element.
    pub fn dangling_connections(&self) -> Vec<&DiagramConnection> {
        self.connections
            .iter()
            .filter(|c| {
                !self.elements.iter().any(|e| e.id == c.from) || !self.elements.iter().any(|e| e.id == c.to)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::GeneratorKind;
    use serde_json::json;

    #[test]
    fn diagram_streams_to_typed_result() {
        let kind = GeneratorKind::Diagram;
        let schema = kind.schema();
        let mut acc = ResultAccumulator::new();
        acc.merge(
            &schema,
            json!({"title": "Cycle", "diagramType": "flowchart", "elements": [{"id": "a", "label": "Light"}]})
                .as_object()
                .unwrap(),
        );
        acc.merge(
            &schema,
            json!({"elements": [{"id": "b", "label": "Sugar", "type": "output"}],
                   "connections": [{"from": "a", "to": "b"}, {"from": "b", "to": "z"}]})
            .as_object()
            .unwrap(),
        );
        let d: DiagramResult = acc.to_typed().unwrap();
        assert_eq!(d.diagram_type.as_deref(), Some("flowchart"));
        assert_eq!(d.elements.len(), 2);
        assert_eq!(d.elements[1].kind.as_deref(), Some("output"));
        assert_eq!(d.dangling_connections().len(), 1);
        assert_eq!(kind.describe(&acc), "2 elements, 2 connections");
    }

    #[test]
    fn essay_word_count_and_flashcards() {
        let e = EssayResult {
            title: "t".into(),
            content: "one two  three".into(),
            citations: vec![],
        };
        assert_eq!(e.word_count(), 3);

        let kind = GeneratorKind::Flashcards;
        let mut acc = ResultAccumulator::new();
        acc.merge(&kind.schema(), json!({"cards": [{"front": "H2O", "back": "water"}]}).as_object().unwrap());
        let cards = flashcards_from(&acc).unwrap();
        assert_eq!(cards[0].back, "water");
        assert_eq!(kind.describe(&acc), "1 cards");
    }
}
