//! Responsible-AI checks: sensitive-content detection and redaction
//!
//! [`SensitiveContentScanner`] turns raw backend spans into [`Finding`]s:
//! it maps labels onto categories, drops categories that are not enabled,
//! resolves overlaps (longer span wins, ties go to the earliest start) and can
//! produce a redacted copy of the text.
//!
//! Detection is best-effort. The scanner never guarantees that every piece of
//! personal information is found.
//!
//! ```rust
//! use kansatsu::rai::{PatternRecognizer, SensitiveContentScanner};
//! use std::sync::Arc;
//!
//! let scanner = SensitiveContentScanner::new(Arc::new(PatternRecognizer::new()));
//! let result = scanner.scan("Call 555-867-5309").unwrap();
//! assert!(result.pii_found);
//! assert_eq!(result.redact("Call 555-867-5309"), "Call [PHONE_NUMBER]");
//! ```

pub mod patterns;
pub mod recognizer;

pub use patterns::PatternRecognizer;
pub use recognizer::{
    CompositeRecognizer, EntityRecognizer, EntitySpan, LabelMapping, RecognizerError,
};

use crate::{KansatsuError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Category of sensitive information
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EntityType {
    Person,
    Location,
    Organization,
    Date,
    DateOfBirth,
    Email,
    PhoneNumber,
    Ssn,
    IdNumber,
    CreditCard,
    MedicalRecordNumber,
    /// Category produced by a custom backend
    Other(String),
}

impl EntityType {
    /// Every built-in category
    pub const BUILTIN: [EntityType; 11] = [
        EntityType::Person,
        EntityType::Location,
        EntityType::Organization,
        EntityType::Date,
        EntityType::DateOfBirth,
        EntityType::Email,
        EntityType::PhoneNumber,
        EntityType::Ssn,
        EntityType::IdNumber,
        EntityType::CreditCard,
        EntityType::MedicalRecordNumber,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Person => "PERSON",
            Self::Location => "LOCATION",
            Self::Organization => "ORGANIZATION",
            Self::Date => "DATE",
            Self::DateOfBirth => "DATE_OF_BIRTH",
            Self::Email => "EMAIL",
            Self::PhoneNumber => "PHONE_NUMBER",
            Self::Ssn => "SSN",
            Self::IdNumber => "ID_NUMBER",
            Self::CreditCard => "CREDIT_CARD",
            Self::MedicalRecordNumber => "MEDICAL_RECORD_NUMBER",
            Self::Other(label) => label,
        }
    }

    /// Built-in category for an exact canonical name
    pub fn from_canonical(name: &str) -> Option<Self> {
        Self::BUILTIN.into_iter().find(|entity| entity.as_str() == name)
    }

    /// Redaction placeholder, e.g. `[PHONE_NUMBER]`
    pub fn placeholder(&self) -> String {
        format!("[{}]", self.as_str())
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EntityType> for String {
    fn from(entity: EntityType) -> Self {
        entity.as_str().to_string()
    }
}

impl From<String> for EntityType {
    fn from(name: String) -> Self {
        let upper = name.to_uppercase();
        Self::from_canonical(&upper).unwrap_or(Self::Other(upper))
    }
}

/// One detected piece of sensitive information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub entity_type: EntityType,
    pub matched_text: String,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
}

impl Finding {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// How redacted spans are rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionStyle {
    /// `[CATEGORY]`
    #[default]
    Category,
    /// One `*` per character of the matched text
    Mask,
}

impl RedactionStyle {
    fn render(&self, finding: &Finding) -> String {
        match self {
            Self::Category => finding.entity_type.placeholder(),
            Self::Mask => "*".repeat(finding.matched_text.chars().count()),
        }
    }
}

/// Result of scanning one text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub pii_found: bool,
    /// Non-overlapping findings ordered by start offset
    pub findings: Vec<Finding>,
}

impl ScanResult {
    fn from_findings(findings: Vec<Finding>) -> Self {
        Self {
            pii_found: !findings.is_empty(),
            findings,
        }
    }

    /// Distinct categories found, in order of first appearance
    pub fn categories(&self) -> Vec<EntityType> {
        let mut seen = Vec::new();
        for finding in &self.findings {
            if !seen.contains(&finding.entity_type) {
                seen.push(finding.entity_type.clone());
            }
        }
        seen
    }

    /// Replace every finding in `text` with its `[CATEGORY]` placeholder
    ///
    /// `text` must be the text that was scanned.
    pub fn redact(&self, text: &str) -> String {
        self.redact_with(text, RedactionStyle::Category)
    }

    pub fn redact_with(&self, text: &str, style: RedactionStyle) -> String {
        let mut redacted = String::with_capacity(text.len());
        let mut cursor = 0;
        for finding in &self.findings {
            if finding.start < cursor || text.get(finding.start..finding.end).is_none() {
                continue;
            }
            redacted.push_str(&text[cursor..finding.start]);
            redacted.push_str(&style.render(finding));
            cursor = finding.end;
        }
        redacted.push_str(&text[cursor..]);
        redacted
    }
}

/// Scanner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Categories reported as findings; everything else is dropped
    pub categories: HashSet<EntityType>,
    pub redaction: RedactionStyle,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            categories: EntityType::BUILTIN.into_iter().collect(),
            redaction: RedactionStyle::default(),
        }
    }
}

impl ScannerConfig {
    /// Builder pattern: restrict reporting to the given categories
    pub fn with_categories(mut self, categories: impl IntoIterator<Item = EntityType>) -> Self {
        self.categories = categories.into_iter().collect();
        self
    }

    pub fn with_redaction(mut self, redaction: RedactionStyle) -> Self {
        self.redaction = redaction;
        self
    }
}

/// A redacted text together with what was removed
#[derive(Debug, Clone, PartialEq)]
pub struct Redaction {
    pub text: String,
    pub result: ScanResult,
}

/// Detects sensitive entities through a pluggable recognizer
#[derive(Clone)]
pub struct SensitiveContentScanner {
    recognizer: Option<Arc<dyn EntityRecognizer>>,
    mapping: LabelMapping,
    config: ScannerConfig,
}

impl fmt::Debug for SensitiveContentScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensitiveContentScanner")
            .field("recognizer", &self.recognizer.as_ref().map(|r| r.name()))
            .field("mapping", &self.mapping)
            .field("config", &self.config)
            .finish()
    }
}

impl SensitiveContentScanner {
    pub fn new(recognizer: Arc<dyn EntityRecognizer>) -> Self {
        Self {
            recognizer: Some(recognizer),
            mapping: LabelMapping::default(),
            config: ScannerConfig::default(),
        }
    }

    /// Scanner with no backend; every non-empty scan fails with
    /// [`KansatsuError::BackendUnavailable`]
    pub fn unavailable() -> Self {
        Self {
            recognizer: None,
            mapping: LabelMapping::default(),
            config: ScannerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ScannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_mapping(mut self, mapping: LabelMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Whether a backend is attached and loaded
    pub fn is_ready(&self) -> bool {
        self.recognizer.as_ref().is_some_and(|r| r.is_ready())
    }

    /// Detect sensitive entities in `text`
    pub fn scan(&self, text: &str) -> Result<ScanResult> {
        if text.trim().is_empty() {
            return Ok(ScanResult::default());
        }

        let recognizer = self
            .recognizer
            .as_ref()
            .ok_or_else(|| KansatsuError::backend_unavailable("none"))?;
        if !recognizer.is_ready() {
            return Err(KansatsuError::backend_unavailable(recognizer.name()));
        }

        let spans = recognizer.label(text).map_err(|error| match error {
            RecognizerError::NotLoaded => KansatsuError::backend_unavailable(recognizer.name()),
            RecognizerError::Failed(message) => KansatsuError::backend(recognizer.name(), message),
        })?;

        let candidates: Vec<Finding> = spans
            .into_iter()
            .filter_map(|span| self.to_finding(text, span))
            .collect();
        let findings = resolve_overlaps(candidates);

        tracing::debug!(
            "Scanned {} bytes with '{}': {} finding(s)",
            text.len(),
            recognizer.name(),
            findings.len()
        );

        Ok(ScanResult::from_findings(findings))
    }

    /// Scan and produce a redacted copy using the configured style
    pub fn redact(&self, text: &str) -> Result<Redaction> {
        let result = self.scan(text)?;
        Ok(Redaction {
            text: result.redact_with(text, self.config.redaction),
            result,
        })
    }

    fn to_finding(&self, text: &str, span: EntitySpan) -> Option<Finding> {
        let entity_type = self.mapping.resolve(&span.label)?;
        if !self.config.categories.contains(&entity_type) {
            return None;
        }
        match text.get(span.start..span.end) {
            Some(matched) if !matched.is_empty() => Some(Finding {
                entity_type,
                matched_text: matched.to_string(),
                start: span.start,
                end: span.end,
            }),
            _ => {
                tracing::debug!(
                    "Dropping span {}..{} labeled '{}': not a valid range of the input",
                    span.start,
                    span.end,
                    span.label
                );
                None
            }
        }
    }
}

/// Keep a non-overlapping subset, preferring longer spans then earlier starts
fn resolve_overlaps(mut candidates: Vec<Finding>) -> Vec<Finding> {
    candidates.sort_by(|a, b| b.len().cmp(&a.len()).then(a.start.cmp(&b.start)));

    let mut accepted: Vec<Finding> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let overlaps = accepted
            .iter()
            .any(|kept| candidate.start < kept.end && kept.start < candidate.end);
        if !overlaps {
            accepted.push(candidate);
        }
    }

    accepted.sort_by_key(|finding| finding.start);
    accepted
}

#[cfg(test)]
mod tests {
    use super::recognizer::MockEntityRecognizer;
    use super::*;

    fn mock_with(spans: Vec<EntitySpan>) -> MockEntityRecognizer {
        let mut mock = MockEntityRecognizer::new();
        mock.expect_name().return_const("mock");
        mock.expect_is_ready().return_const(true);
        mock.expect_label().returning(move |_| Ok(spans.clone()));
        mock
    }

    #[test]
    fn test_empty_input_skips_backend() {
        let mut mock = MockEntityRecognizer::new();
        mock.expect_label().never();
        mock.expect_is_ready().never();
        let scanner = SensitiveContentScanner::new(Arc::new(mock));

        for text in ["", "   \n\t"] {
            let result = scanner.scan(text).unwrap();
            assert!(!result.pii_found);
            assert!(result.findings.is_empty());
        }
    }

    #[test]
    fn test_phone_number_finding_and_redaction() {
        let scanner = SensitiveContentScanner::new(Arc::new(mock_with(vec![EntitySpan::new(
            "PHONE_NUMBER",
            5,
            17,
        )])));

        let result = scanner.scan("Call 555-867-5309").unwrap();
        assert!(result.pii_found);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].entity_type, EntityType::PhoneNumber);
        assert_eq!(result.findings[0].matched_text, "555-867-5309");
        assert_eq!(result.redact("Call 555-867-5309"), "Call [PHONE_NUMBER]");
    }

    #[test]
    fn test_overlap_prefers_longer_span() {
        let scanner = SensitiveContentScanner::new(Arc::new(mock_with(vec![
            EntitySpan::new("PERSON", 5, 8),
            EntitySpan::new("ORG", 0, 10),
        ])));

        let result = scanner.scan("Acme Corp. is here").unwrap();
        assert_eq!(result.findings.len(), 1);
        assert_eq!((result.findings[0].start, result.findings[0].end), (0, 10));
        assert_eq!(result.findings[0].entity_type, EntityType::Organization);
    }

    #[test]
    fn test_overlap_tie_prefers_earliest_start() {
        let scanner = SensitiveContentScanner::new(Arc::new(mock_with(vec![
            EntitySpan::new("PERSON", 2, 6),
            EntitySpan::new("LOC", 0, 4),
        ])));

        let result = scanner.scan("abcdefgh").unwrap();
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].start, 0);
    }

    #[test]
    fn test_filters_unmapped_and_disabled_categories() {
        let recognizer = Arc::new(mock_with(vec![
            EntitySpan::new("CARDINAL", 0, 3),
            EntitySpan::new("DATE", 4, 9),
            EntitySpan::new("EMAIL", 10, 15),
        ]));
        let scanner = SensitiveContentScanner::new(recognizer).with_config(
            ScannerConfig::default().with_categories([EntityType::Email]),
        );

        let result = scanner.scan("one today a@b.c").unwrap();
        assert_eq!(result.categories(), vec![EntityType::Email]);
    }

    #[test]
    fn test_invalid_spans_are_dropped() {
        let scanner = SensitiveContentScanner::new(Arc::new(mock_with(vec![
            EntitySpan::new("EMAIL", 3, 100),
            EntitySpan::new("EMAIL", 4, 4),
        ])));
        let result = scanner.scan("short").unwrap();
        assert!(!result.pii_found);
    }

    #[test]
    fn test_backend_unavailable() {
        let error = SensitiveContentScanner::unavailable()
            .scan("Jane Doe")
            .unwrap_err();
        assert!(error.is_backend_unavailable());

        let mut mock = MockEntityRecognizer::new();
        mock.expect_name().return_const("ner");
        mock.expect_is_ready().return_const(false);
        mock.expect_label().never();
        let error = SensitiveContentScanner::new(Arc::new(mock))
            .scan("Jane Doe")
            .unwrap_err();
        assert_eq!(error, KansatsuError::backend_unavailable("ner"));
    }

    #[test]
    fn test_backend_failure_is_reported() {
        let mut mock = MockEntityRecognizer::new();
        mock.expect_name().return_const("ner");
        mock.expect_is_ready().return_const(true);
        mock.expect_label()
            .returning(|_| Err(RecognizerError::Failed("tokenizer crashed".to_string())));

        let error = SensitiveContentScanner::new(Arc::new(mock))
            .scan("Jane Doe")
            .unwrap_err();
        assert!(matches!(error, KansatsuError::Backend { .. }));
    }

    #[test]
    fn test_redact_with_mask_style() {
        let scanner = SensitiveContentScanner::new(Arc::new(PatternRecognizer::new()))
            .with_config(ScannerConfig::default().with_redaction(RedactionStyle::Mask));

        let redaction = scanner.redact("SSN 123-45-6789 on file").unwrap();
        assert_eq!(redaction.text, "SSN *********** on file");
        assert_eq!(redaction.result.findings.len(), 1);
    }

    #[test]
    fn test_entity_type_serde() {
        let json = serde_json::to_string(&EntityType::PhoneNumber).unwrap();
        assert_eq!(json, "\"PHONE_NUMBER\"");

        let parsed: EntityType = serde_json::from_str("\"credit_card\"").unwrap();
        assert_eq!(parsed, EntityType::CreditCard);

        let custom: EntityType = serde_json::from_str("\"NRIC\"").unwrap();
        assert_eq!(custom, EntityType::Other("NRIC".to_string()));
    }
}
