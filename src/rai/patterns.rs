//! Regex-based recognizer for high-precision identifiers
//!
//! Context patterns (credit card, medical record number, date of birth) run
//! first and claim the whole keyword-plus-value range, so the simpler patterns
//! cannot re-detect digits inside them. A card number that fails the Luhn
//! check still claims its range but produces no span.

use super::recognizer::{EntityRecognizer, EntitySpan, RecognizerError};
use super::EntityType;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

static CREDIT_CARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:credit card|card|cc)[\s\w:;#-]*?((?:\d[ -]*?){13,16})\b")
        .expect("credit card pattern")
});

static MEDICAL_RECORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:mrn|medical record|patient id|medical number|medical id)\b[\s\w:;#-]{0,20}?\b([a-z]{0,4}-?\d[\w-]*\w|\d)\b",
    )
    .expect("medical record pattern")
});

static DATE_OF_BIRTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:dob|date of birth|birthday|birth date)\b[\s\w:;#,-]{0,20}?(\d{1,2}[-/]\d{1,2}[-/]\d{2,4}|(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{1,2},?\s+\d{4})",
    )
    .expect("date of birth pattern")
});

static SSN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn pattern"));

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email pattern")
});

static PHONE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\(\d{3}\)\s?|\b\d{3}[-.\s]?)\d{3}[-.\s]?\d{4}\b").expect("phone pattern")
});

/// Luhn checksum over a string of ASCII digits
pub fn is_luhn_valid(number: &str) -> bool {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let checksum: u32 = number
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();

    checksum % 10 == 0
}

/// Recognizer for identifiers with a recognizable textual shape
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternRecognizer;

impl PatternRecognizer {
    pub fn new() -> Self {
        Self
    }
}

impl EntityRecognizer for PatternRecognizer {
    fn name(&self) -> &'static str {
        "patterns"
    }

    fn label(&self, text: &str) -> Result<Vec<EntitySpan>, RecognizerError> {
        let mut spans = Vec::new();
        let mut claimed: Vec<Range<usize>> = Vec::new();

        for (entity, pattern) in [
            (EntityType::CreditCard, &*CREDIT_CARD),
            (EntityType::MedicalRecordNumber, &*MEDICAL_RECORD),
            (EntityType::DateOfBirth, &*DATE_OF_BIRTH),
        ] {
            for captures in pattern.captures_iter(text) {
                let (Some(whole), Some(value)) = (captures.get(0), captures.get(1)) else {
                    continue;
                };
                claimed.push(whole.range());

                if entity == EntityType::CreditCard {
                    let digits: String = value
                        .as_str()
                        .chars()
                        .filter(|c| c.is_ascii_digit())
                        .collect();
                    if !is_luhn_valid(&digits) {
                        tracing::debug!(
                            "Card-like number at {} failed the Luhn check, suppressing",
                            value.start()
                        );
                        continue;
                    }
                }

                // Trailing separators are part of the repetition, not the number
                let trimmed = value.as_str().trim_end_matches([' ', '-']);
                spans.push(EntitySpan::new(
                    entity.as_str(),
                    value.start(),
                    value.start() + trimmed.len(),
                ));
            }
        }

        for (entity, pattern) in [
            (EntityType::Ssn, &*SSN),
            (EntityType::Email, &*EMAIL),
            (EntityType::PhoneNumber, &*PHONE_NUMBER),
        ] {
            for found in pattern.find_iter(text) {
                let range = found.range();
                if claimed
                    .iter()
                    .any(|c| c.start < range.end && range.start < c.end)
                {
                    continue;
                }
                claimed.push(range.clone());
                spans.push(EntitySpan::new(entity.as_str(), range.start, range.end));
            }
        }

        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(text: &str) -> Vec<(String, String)> {
        PatternRecognizer::new()
            .label(text)
            .unwrap()
            .into_iter()
            .map(|span| (span.label, text[span.start..span.end].to_string()))
            .collect()
    }

    #[test]
    fn test_luhn() {
        assert!(is_luhn_valid("4111111111111111"));
        assert!(is_luhn_valid("79927398713"));
        assert!(!is_luhn_valid("4111111111111112"));
        assert!(!is_luhn_valid("41x1"));
        assert!(!is_luhn_valid(""));
    }

    #[test]
    fn test_phone_number() {
        assert_eq!(
            labels("Call 555-867-5309"),
            vec![("PHONE_NUMBER".to_string(), "555-867-5309".to_string())]
        );
        assert_eq!(
            labels("Office: (555) 867-5309."),
            vec![("PHONE_NUMBER".to_string(), "(555) 867-5309".to_string())]
        );
    }

    #[test]
    fn test_email_and_ssn() {
        let found = labels("Mail jane.doe@example.com, SSN 123-45-6789");
        assert!(found.contains(&("EMAIL".to_string(), "jane.doe@example.com".to_string())));
        assert!(found.contains(&("SSN".to_string(), "123-45-6789".to_string())));
    }

    #[test]
    fn test_credit_card_requires_luhn() {
        let valid = labels("My card number is 4111 1111 1111 1111 thanks");
        assert_eq!(
            valid,
            vec![("CREDIT_CARD".to_string(), "4111 1111 1111 1111".to_string())]
        );

        // Invalid numbers are suppressed and not re-detected as phone numbers
        let invalid = labels("card 1234 5678 9012 3456");
        assert!(invalid.is_empty(), "{:?}", invalid);
    }

    #[test]
    fn test_medical_record_number() {
        let found = labels("The patient's MRN is 12345. Call him later.");
        assert_eq!(
            found,
            vec![("MEDICAL_RECORD_NUMBER".to_string(), "12345".to_string())]
        );
    }

    #[test]
    fn test_date_of_birth() {
        let found = labels("DOB: 04/12/1987");
        assert_eq!(
            found,
            vec![("DATE_OF_BIRTH".to_string(), "04/12/1987".to_string())]
        );

        let found = labels("date of birth is March 3, 1990");
        assert_eq!(
            found,
            vec![("DATE_OF_BIRTH".to_string(), "March 3, 1990".to_string())]
        );
    }

    #[test]
    fn test_plain_text_has_no_spans() {
        assert!(labels("The weather in Paris is sunny.").is_empty());
    }
}
