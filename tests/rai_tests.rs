//! Sensitive-content scanning through the agent with a combined backend

use kansatsu::rai::{
    CompositeRecognizer, EntityRecognizer, EntitySpan, PatternRecognizer, RecognizerError,
    ScannerConfig,
};
use kansatsu::{EntityType, Kansatsu, KansatsuConfig};
use std::sync::Arc;

const CLINICAL_NOTE: &str = "Patient Jane Doe (MRN: 12345) called from 555-867-5309 about her card 4111 1111 1111 1111.";

/// Stand-in for a statistical NER model: tags fixed phrases with raw labels
struct PhraseTagger {
    phrases: Vec<(&'static str, &'static str)>,
    ready: bool,
}

impl PhraseTagger {
    fn new(phrases: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            phrases,
            ready: true,
        }
    }
}

impl EntityRecognizer for PhraseTagger {
    fn name(&self) -> &'static str {
        "phrase-tagger"
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn label(&self, text: &str) -> Result<Vec<EntitySpan>, RecognizerError> {
        Ok(self
            .phrases
            .iter()
            .flat_map(|(phrase, label)| {
                text.match_indices(phrase)
                    .map(move |(start, matched)| EntitySpan::new(*label, start, start + matched.len()))
            })
            .collect())
    }
}

fn agent_with(tagger: PhraseTagger, config: KansatsuConfig) -> Kansatsu {
    let recognizer = CompositeRecognizer::new()
        .with(Arc::new(tagger))
        .with(Arc::new(PatternRecognizer::new()));
    Kansatsu::builder()
        .config(config)
        .recognizer(Arc::new(recognizer))
        .build()
        .unwrap()
}

fn clinical_agent() -> Kansatsu {
    agent_with(
        PhraseTagger::new(vec![("Jane Doe", "PER"), ("Doe", "ORG")]),
        KansatsuConfig::new("rai-tests"),
    )
}

#[tokio::test]
async fn test_clinical_note_is_fully_redacted() {
    let agent = clinical_agent();

    let redaction = agent.redact_sensitive_content(CLINICAL_NOTE).unwrap();
    assert_eq!(
        redaction.text,
        "Patient [PERSON] (MRN: [MEDICAL_RECORD_NUMBER]) called from [PHONE_NUMBER] about her card [CREDIT_CARD]."
    );

    let categories = redaction.result.categories();
    assert_eq!(
        categories,
        vec![
            EntityType::Person,
            EntityType::MedicalRecordNumber,
            EntityType::PhoneNumber,
            EntityType::CreditCard,
        ]
    );
    assert!(!categories.contains(&EntityType::Organization));
}

#[tokio::test]
async fn test_findings_point_into_original_text() {
    let agent = clinical_agent();

    let result = agent.check_sensitive_content(CLINICAL_NOTE).unwrap();
    assert!(result.pii_found);
    for finding in &result.findings {
        assert_eq!(&CLINICAL_NOTE[finding.start..finding.end], finding.matched_text);
    }
    let windows: Vec<_> = result.findings.windows(2).collect();
    assert!(windows.iter().all(|pair| pair[0].end <= pair[1].start));

    let snapshot = agent.snapshot();
    assert_eq!(snapshot.rai_alerts.len(), 4);
    assert_eq!(snapshot.rai_alerts[0].alert_type, "PERSON");
    assert_eq!(snapshot.rai_alerts[0].details, "Found at index 8");

    // Reporting again appends another alert per finding
    assert_eq!(agent.report_findings(&result), 4);
    assert_eq!(agent.snapshot().rai_alert_count, 8);
}

#[tokio::test]
async fn test_category_filter_limits_findings() {
    let config = KansatsuConfig::new("rai-filtered").with_scanner(
        ScannerConfig::default().with_categories([EntityType::PhoneNumber]),
    );
    let agent = agent_with(
        PhraseTagger::new(vec![("Jane Doe", "PER")]),
        config,
    );

    let redaction = agent.redact_sensitive_content(CLINICAL_NOTE).unwrap();
    assert_eq!(redaction.result.categories(), vec![EntityType::PhoneNumber]);
    assert!(redaction.text.contains("Jane Doe"));
    assert!(redaction.text.contains("[PHONE_NUMBER]"));
    assert!(redaction.text.contains("12345"));
}

#[tokio::test]
async fn test_plain_and_empty_text() {
    let agent = clinical_agent();

    let empty = agent.check_sensitive_content("").unwrap();
    assert!(!empty.pii_found);
    assert!(empty.findings.is_empty());

    let plain = agent
        .redact_sensitive_content("Stretch your hamstring for thirty seconds.")
        .unwrap();
    assert!(!plain.result.pii_found);
    assert_eq!(plain.text, "Stretch your hamstring for thirty seconds.");

    let phone = agent.redact_sensitive_content("Call 555-867-5309").unwrap();
    assert_eq!(phone.text, "Call [PHONE_NUMBER]");
}

#[tokio::test]
async fn test_unloaded_backend_is_reported_not_ignored() {
    let mut tagger = PhraseTagger::new(vec![("Jane Doe", "PER")]);
    tagger.ready = false;
    let agent = agent_with(tagger, KansatsuConfig::new("rai-unloaded"));

    let err = agent.check_sensitive_content(CLINICAL_NOTE).unwrap_err();
    assert!(err.is_backend_unavailable());
    // Blank input never needs a backend
    assert!(agent.check_sensitive_content("   ").is_ok());
}
