//! Declarative descriptors for every content type.
//!
//! Each generator is one remote function plus a merge schema; the streaming
//! engine itself is shared.

pub mod documents;
pub mod quiz;

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value, json};

use crate::error::StudyGenError;
use crate::merge::{MergeSchema, ResultAccumulator};
use crate::model::GenerationParams;
use crate::store::NewMaterial;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneratorKind {
    Mcqs,
    Flashcards,
    Essay,
    Summary,
    Diagram,
    Vocabulary,
    FormulaSheet,
    Notes,
    TrueFalse,
    FillBlanks,
    ShortAnswer,
    MindMap,
    Timeline,
    StudyGuide,
    PracticeProblems,
    Mnemonics,
    CaseStudy,
    ConceptMap,
    Outline,
}

/// Bounds for the item count a generator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountSpec {
    /// Request body key, e.g. `numQuestions`.
    pub key: &'static str,
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

const fn count(key: &'static str, max: u32, default: u32) -> Option<CountSpec> {
    Some(CountSpec {
        key,
        min: 1,
        max,
        default,
    })
}

impl GeneratorKind {
    pub const ALL: [GeneratorKind; 19] = [
        Self::Mcqs,
        Self::Flashcards,
        Self::Essay,
        Self::Summary,
        Self::Diagram,
        Self::Vocabulary,
        Self::FormulaSheet,
        Self::Notes,
        Self::TrueFalse,
        Self::FillBlanks,
        Self::ShortAnswer,
        Self::MindMap,
        Self::Timeline,
        Self::StudyGuide,
        Self::PracticeProblems,
        Self::Mnemonics,
        Self::CaseStudy,
        Self::ConceptMap,
        Self::Outline,
    ];

    /// Type tag stored on persisted records.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Mcqs => "mcqs",
            Self::Flashcards => "flashcards",
            Self::Essay => "essay",
            Self::Summary => "summary",
            Self::Diagram => "diagram",
            Self::Vocabulary => "vocabulary",
            Self::FormulaSheet => "formula_sheet",
            Self::Notes => "notes",
            Self::TrueFalse => "true_false",
            Self::FillBlanks => "fill_blanks",
            Self::ShortAnswer => "short_answer",
            Self::MindMap => "mind_map",
            Self::Timeline => "timeline",
            Self::StudyGuide => "study_guide",
            Self::PracticeProblems => "practice_problems",
            Self::Mnemonics => "mnemonics",
            Self::CaseStudy => "case_study",
            Self::ConceptMap => "concept_map",
            Self::Outline => "outline",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Mcqs => "Multiple-choice quiz",
            Self::Flashcards => "Flashcards",
            Self::Essay => "Essay",
            Self::Summary => "Summary",
            Self::Diagram => "Diagram",
            Self::Vocabulary => "Vocabulary list",
            Self::FormulaSheet => "Formula sheet",
            Self::Notes => "Notes",
            Self::TrueFalse => "True or false",
            Self::FillBlanks => "Fill in the blanks",
            Self::ShortAnswer => "Short answer",
            Self::MindMap => "Mind map",
            Self::Timeline => "Timeline",
            Self::StudyGuide => "Study guide",
            Self::PracticeProblems => "Practice problems",
            Self::Mnemonics => "Mnemonics",
            Self::CaseStudy => "Case study",
            Self::ConceptMap => "Concept map",
            Self::Outline => "Outline",
        }
    }

    /// Name of the remote function serving this generator.
    pub fn function_name(&self) -> String {
        format!("generate-{}", self.tag().replace('_', "-"))
    }

    pub fn count_spec(&self) -> Option<CountSpec> {
        match self {
            Self::Mcqs => count("numQuestions", 50, 10),
            Self::Flashcards => count("numCards", 100, 20),
            Self::Vocabulary => count("numWords", 100, 20),
            Self::FormulaSheet => count("numFormulas", 50, 15),
            Self::TrueFalse => count("numStatements", 50, 10),
            Self::FillBlanks => count("numQuestions", 50, 10),
            Self::ShortAnswer => count("numQuestions", 30, 5),
            Self::Timeline => count("numEvents", 50, 10),
            Self::PracticeProblems => count("numProblems", 30, 5),
            Self::Mnemonics => count("numMnemonics", 20, 5),
            Self::CaseStudy => count("numQuestions", 10, 3),
            _ => None,
        }
    }

    pub fn schema(&self) -> MergeSchema {
        let s = MergeSchema::new().overwrite("title");
        match self {
            Self::Mcqs | Self::FillBlanks | Self::ShortAnswer => s.append_list("questions"),
            Self::Flashcards => s.append_list("cards"),
            Self::Essay => s.append_text("content").append_list("citations"),
            Self::Summary => s.append_text("summary").append_list("keyPoints"),
            Self::Diagram => s
                .overwrite("diagramType")
                .append_list("elements")
                .append_list("connections"),
            Self::Vocabulary => s.append_list("words"),
            Self::FormulaSheet => s.append_list("formulas"),
            Self::Notes => s.append_text("content").append_list("sections"),
            Self::TrueFalse => s.append_list("statements"),
            Self::MindMap => s.overwrite("centralTopic").append_list("branches"),
            Self::Timeline => s.append_list("events"),
            Self::StudyGuide => s.append_text("overview").append_list("sections"),
            Self::PracticeProblems => s.append_list("problems"),
            Self::Mnemonics => s.append_list("mnemonics"),
            Self::CaseStudy => s.append_text("scenario").append_list("questions"),
            Self::ConceptMap => s.append_list("concepts").append_list("relationships"),
            Self::Outline => s.append_list("sections"),
        }
    }

    /// List field holding the main items, used for progress and saved content.
    pub fn primary_list(&self) -> Option<&'static str> {
        match self {
            Self::Mcqs | Self::FillBlanks | Self::ShortAnswer | Self::CaseStudy => Some("questions"),
            Self::Flashcards => Some("cards"),
            Self::Diagram => Some("elements"),
            Self::Vocabulary => Some("words"),
            Self::FormulaSheet => Some("formulas"),
            Self::TrueFalse => Some("statements"),
            Self::MindMap => Some("branches"),
            Self::Timeline => Some("events"),
            Self::Notes | Self::StudyGuide | Self::Outline => Some("sections"),
            Self::PracticeProblems => Some("problems"),
            Self::Mnemonics => Some("mnemonics"),
            Self::ConceptMap => Some("concepts"),
            Self::Essay => Some("citations"),
            Self::Summary => Some("keyPoints"),
        }
    }

    /// Key under which saved content wraps the primary list, for generators
    /// whose records store only the item list.
    fn content_key(&self) -> Option<&'static str> {
        match self {
            Self::Mcqs => Some("mcqs"),
            Self::Flashcards => Some("flashcards"),
            _ => None,
        }
    }

    /// JSON body for the remote function. `params` should already be normalized.
    pub fn request_body(&self, params: &GenerationParams) -> Value {
        let mut body = params.extra.clone().unwrap_or_default();
        body.insert("topic".into(), Value::String(params.topic.clone()));
        if let Some(d) = params.difficulty {
            body.insert("difficulty".into(), json!(d));
        }
        if let Some(l) = params.length {
            body.insert("length".into(), json!(l));
        }
        if let Some(bounds) = self.count_spec() {
            body.insert(bounds.key.into(), json!(params.count.unwrap_or(bounds.default)));
        }
        Value::Object(body)
    }

    /// Content payload persisted for a finished accumulator.
    pub fn content_payload(&self, acc: &ResultAccumulator) -> Value {
        match (self.content_key(), self.primary_list()) {
            (Some(key), Some(list)) => {
                let items = acc.get(list).cloned().unwrap_or_else(|| json!([]));
                let mut m = Map::new();
                m.insert(key.to_string(), items);
                Value::Object(m)
            }
            _ => acc.to_value(),
        }
    }

    pub fn title_for(&self, acc: &ResultAccumulator, topic: &str) -> String {
        match acc.get("title").and_then(|t| t.as_str()).map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => format!("{}: {}", self.label(), topic),
        }
    }

    /// Record to persist for a finished accumulator.
    pub fn material(&self, acc: &ResultAccumulator, params: &GenerationParams, user_id: &str) -> NewMaterial {
        let mut metadata = Map::new();
        metadata.insert("topic".into(), Value::String(params.topic.clone()));
        if let Some(d) = params.difficulty {
            metadata.insert("difficulty".into(), json!(d));
        }
        if let Some(l) = params.length {
            metadata.insert("length".into(), json!(l));
        }
        if let Some(list) = self.primary_list() {
            metadata.insert("itemCount".into(), json!(acc.list_len(list)));
        }
        NewMaterial {
            user_id: user_id.to_string(),
            kind: self.tag().to_string(),
            title: self.title_for(acc, &params.topic),
            content: self.content_payload(acc),
            metadata: Some(Value::Object(metadata)),
        }
    }

    /// One-line human description of the accumulated result.
    pub fn describe(&self, acc: &ResultAccumulator) -> String {
        match self {
            Self::Mcqs => match quiz::questions_from(acc) {
                Ok(qs) => format!("{} questions", qs.len()),
                Err(_) => format!("{} questions (unparsed)", acc.list_len("questions")),
            },
            Self::Flashcards => documents::flashcards_from(acc)
                .map(|cards| format!("{} cards", cards.len()))
                .unwrap_or_else(|_| format!("{} cards (unparsed)", acc.list_len("cards"))),
            Self::Essay => match acc.to_typed::<documents::EssayResult>() {
                Ok(e) => format!("{} words, {} citations", e.word_count(), e.citations.len()),
                Err(_) => "essay (unparsed)".to_string(),
            },
            Self::Diagram => match acc.to_typed::<documents::DiagramResult>() {
                Ok(d) => format!("{} elements, {} connections", d.elements.len(), d.connections.len()),
                Err(_) => "diagram (unparsed)".to_string(),
            },
            other => match other.primary_list() {
                Some(list) => format!("{} {}", acc.list_len(list), list),
                None => format!("{} fields", acc.fields().len()),
            },
        }
    }
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for GeneratorKind {
    type Err = StudyGenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.tag() == wanted)
            .ok_or_else(|| StudyGenError::Validation(format!("unknown generator '{s}'")))
    }
}
