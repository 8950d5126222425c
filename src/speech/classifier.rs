//! Consent classification seam.
//!
//! A classifier reads one transcript and decides whether it contains
//! explicit, first-person, present-tense consent to be recorded, extracting
//! the speaker's name when one is stated. Anything third-person,
//! conditional, historical, or negated is a negative.

use crate::error::{FaceveilError, Result};
use serde::Deserialize;

/// The classifier's decision for one transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentVerdict {
    pub consented: bool,
    pub name: Option<String>,
}

impl ConsentVerdict {
    pub fn negative() -> Self {
        Self {
            consented: false,
            name: None,
        }
    }
}

/// Trait for consent classification, allowing swapping implementations
/// (local language model vs mock).
pub trait ConsentClassifier: Send {
    fn classify(&mut self, transcript: &str) -> Result<ConsentVerdict>;

    fn model_name(&self) -> &str;
}

/// Raw JSON shape the language model is prompted to emit.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    consent: bool,
    #[serde(default)]
    speaker: Option<String>,
}

/// Parses the model's output into a verdict. The model is prompted for a
/// JSON object; anything else is rejected so a garbled generation can never
/// produce a false positive.
pub fn parse_verdict(raw_output: &str) -> Result<ConsentVerdict> {
    let start = raw_output.find('{');
    let end = raw_output.rfind('}');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(FaceveilError::Classification {
            message: format!("no JSON object in model output: {raw_output:?}"),
        });
    };
    if end < start {
        return Err(FaceveilError::Classification {
            message: "malformed JSON object in model output".to_string(),
        });
    }

    let raw: RawVerdict =
        serde_json::from_str(&raw_output[start..=end]).map_err(|e| {
            FaceveilError::Classification {
                message: format!("unparseable verdict: {e}"),
            }
        })?;

    let name = raw.speaker.filter(|name| {
        let trimmed = name.trim();
        !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("unknown")
    });

    Ok(ConsentVerdict {
        consented: raw.consent,
        name,
    })
}

/// Mock classifier driven by simple keyword rules, mirroring the phrases
/// the real prompt treats as positives. Useful for pipeline tests.
pub struct MockConsentClassifier {
    mode: MockMode,
}

enum MockMode {
    Keyword,
    Fixed(ConsentVerdict),
    Failing,
}

impl MockConsentClassifier {
    /// Recognizes "i consent", "you can record me", "you have my
    /// permission" and pulls a name from "my name is X" / "i'm X".
    pub fn keyword() -> Self {
        Self {
            mode: MockMode::Keyword,
        }
    }

    pub fn fixed(verdict: ConsentVerdict) -> Self {
        Self {
            mode: MockMode::Fixed(verdict),
        }
    }

    pub fn failing() -> Self {
        Self {
            mode: MockMode::Failing,
        }
    }
}

impl ConsentClassifier for MockConsentClassifier {
    fn classify(&mut self, transcript: &str) -> Result<ConsentVerdict> {
        match &self.mode {
            MockMode::Fixed(verdict) => Ok(verdict.clone()),
            MockMode::Failing => Err(FaceveilError::Classification {
                message: "mock classification failure".to_string(),
            }),
            MockMode::Keyword => {
                let lowered = transcript.to_lowercase();
                let negated = lowered.contains("don't consent")
                    || lowered.contains("do not consent")
                    || lowered.contains("not consent");
                let consented = !negated
                    && (lowered.contains("i consent")
                        || lowered.contains("you can record me")
                        || lowered.contains("you have my permission"));

                let name = ["my name is ", "i'm ", "i am "]
                    .iter()
                    .find_map(|marker| lowered.find(marker).map(|i| i + marker.len()))
                    .and_then(|start| {
                        let rest = &lowered[start..];
                        let word: String = rest
                            .chars()
                            .take_while(|c| c.is_alphanumeric() || *c == ' ')
                            .collect();
                        let word = word.trim().split_whitespace().next()?.to_string();
                        if word.is_empty() {
                            None
                        } else {
                            Some(word)
                        }
                    });

                Ok(ConsentVerdict {
                    consented,
                    name: if consented { name } else { None },
                })
            }
        }
    }

    fn model_name(&self) -> &str {
        "mock-classifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict_positive_with_name() {
        let verdict = parse_verdict(r#"{"consent": true, "speaker": "Alice"}"#).unwrap();
        assert!(verdict.consented);
        assert_eq!(verdict.name, Some("Alice".to_string()));
    }

    #[test]
    fn test_parse_verdict_negative() {
        let verdict = parse_verdict(r#"{"consent": false, "speaker": null}"#).unwrap();
        assert!(!verdict.consented);
        assert_eq!(verdict.name, None);
    }

    #[test]
    fn test_parse_verdict_unknown_speaker_is_none() {
        let verdict = parse_verdict(r#"{"consent": true, "speaker": "UNKNOWN"}"#).unwrap();
        assert!(verdict.consented);
        assert_eq!(verdict.name, None);
    }

    #[test]
    fn test_parse_verdict_empty_speaker_is_none() {
        let verdict = parse_verdict(r#"{"consent": true, "speaker": "  "}"#).unwrap();
        assert_eq!(verdict.name, None);
    }

    #[test]
    fn test_parse_verdict_missing_speaker_field() {
        let verdict = parse_verdict(r#"{"consent": false}"#).unwrap();
        assert!(!verdict.consented);
    }

    #[test]
    fn test_parse_verdict_with_surrounding_prose() {
        let raw = "Sure, here's the answer: {\"consent\": true, \"speaker\": \"bob\"} done.";
        let verdict = parse_verdict(raw).unwrap();
        assert!(verdict.consented);
        assert_eq!(verdict.name, Some("bob".to_string()));
    }

    #[test]
    fn test_parse_verdict_garbage_is_error() {
        assert!(parse_verdict("I think they consented").is_err());
        assert!(parse_verdict("").is_err());
        assert!(parse_verdict("{not json}").is_err());
    }

    #[test]
    fn test_keyword_mock_detects_consent_with_name() {
        let mut classifier = MockConsentClassifier::keyword();
        let verdict = classifier
            .classify("I consent to be recorded, my name is Alice")
            .unwrap();
        assert!(verdict.consented);
        assert_eq!(verdict.name, Some("alice".to_string()));
    }

    #[test]
    fn test_keyword_mock_negative_on_plain_speech() {
        let mut classifier = MockConsentClassifier::keyword();
        let verdict = classifier.classify("nice weather today").unwrap();
        assert!(!verdict.consented);
    }

    #[test]
    fn test_keyword_mock_negative_on_negation() {
        let mut classifier = MockConsentClassifier::keyword();
        let verdict = classifier
            .classify("I do not consent to be recorded")
            .unwrap();
        assert!(!verdict.consented);
    }

    #[test]
    fn test_keyword_mock_consent_without_name() {
        let mut classifier = MockConsentClassifier::keyword();
        let verdict = classifier.classify("you can record me").unwrap();
        assert!(verdict.consented);
        assert_eq!(verdict.name, None);
    }

    #[test]
    fn test_fixed_mock() {
        let mut classifier = MockConsentClassifier::fixed(ConsentVerdict {
            consented: true,
            name: Some("carol".to_string()),
        });
        let verdict = classifier.classify("anything").unwrap();
        assert_eq!(verdict.name, Some("carol".to_string()));
    }

    #[test]
    fn test_failing_mock() {
        let mut classifier = MockConsentClassifier::failing();
        assert!(classifier.classify("anything").is_err());
    }
}
