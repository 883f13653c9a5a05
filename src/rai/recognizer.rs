//! Entity-recognition backends
//!
//! The scanner treats recognition as a black box: a backend receives text and
//! returns labeled byte spans. Model-backed recognizers (NER pipelines) live
//! outside this crate and plug in through [`EntityRecognizer`].

use super::EntityType;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// A raw labeled span as produced by a backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntitySpan {
    /// Backend-specific label (e.g. `PERSON`, `GPE`, `PHONE_NUMBER`)
    pub label: String,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
}

impl EntitySpan {
    pub fn new(label: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            label: label.into(),
            start,
            end,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Failures reported by a backend
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecognizerError {
    /// Model or resources were never loaded
    #[error("model not loaded")]
    NotLoaded,

    /// The backend failed while labeling
    #[error("labeling failed: {0}")]
    Failed(String),
}

/// Pluggable entity-recognition backend
///
/// Implementations must behave as pure functions of their input text.
#[cfg_attr(test, mockall::automock)]
pub trait EntityRecognizer: Send + Sync {
    /// Backend name used in errors and logs
    fn name(&self) -> &'static str;

    /// Whether the backend's model is loaded and usable
    fn is_ready(&self) -> bool {
        true
    }

    /// Label spans of `text`
    fn label(&self, text: &str) -> Result<Vec<EntitySpan>, RecognizerError>;
}

/// Runs several backends and concatenates their spans
///
/// Ready only when every member is ready. Overlaps between members are left
/// for the scanner to resolve.
#[derive(Clone, Default)]
pub struct CompositeRecognizer {
    members: Vec<Arc<dyn EntityRecognizer>>,
}

impl CompositeRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: add a backend
    pub fn with(mut self, recognizer: Arc<dyn EntityRecognizer>) -> Self {
        self.members.push(recognizer);
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl std::fmt::Debug for CompositeRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.members.iter().map(|m| m.name()).collect();
        f.debug_struct("CompositeRecognizer")
            .field("members", &names)
            .finish()
    }
}

impl EntityRecognizer for CompositeRecognizer {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn is_ready(&self) -> bool {
        self.members.iter().all(|member| member.is_ready())
    }

    fn label(&self, text: &str) -> Result<Vec<EntitySpan>, RecognizerError> {
        let mut spans = Vec::new();
        for member in &self.members {
            spans.extend(member.label(text)?);
        }
        Ok(spans)
    }
}

/// Maps raw backend labels onto sensitive categories
///
/// Canonical category names always map to themselves. The default mapping
/// also understands the common NER label set (`GPE`, `LOC`, `ORG`, ...).
/// Labels with no mapping are dropped by the scanner.
#[derive(Debug, Clone)]
pub struct LabelMapping {
    aliases: HashMap<String, EntityType>,
}

impl Default for LabelMapping {
    fn default() -> Self {
        let mut aliases = HashMap::new();
        for (label, entity) in [
            ("PERSON", EntityType::Person),
            ("PER", EntityType::Person),
            ("PERSON_NAME", EntityType::Person),
            ("GPE", EntityType::Location),
            ("LOC", EntityType::Location),
            ("ORG", EntityType::Organization),
            ("DATE", EntityType::Date),
            ("DATE_ENTITY", EntityType::Date),
            ("PHONE_NUMBER_US", EntityType::PhoneNumber),
            ("MRN", EntityType::MedicalRecordNumber),
        ] {
            aliases.insert(label.to_string(), entity);
        }
        Self { aliases }
    }
}

impl LabelMapping {
    /// Mapping that only accepts canonical category names
    pub fn canonical_only() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    /// Builder pattern: map a backend label to a category
    pub fn with_alias(mut self, label: impl Into<String>, entity: EntityType) -> Self {
        self.aliases.insert(label.into().to_uppercase(), entity);
        self
    }

    /// Category for a raw label, if any
    pub fn resolve(&self, label: &str) -> Option<EntityType> {
        let label = label.to_uppercase();
        self.aliases
            .get(&label)
            .cloned()
            .or_else(|| EntityType::from_canonical(&label))
    }
}
