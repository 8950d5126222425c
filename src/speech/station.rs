//! Speech worker: transcription and consent detection.
//!
//! Each worker in the pool pulls speech segments from the shared queue,
//! transcribes them, and runs the consent classifier on the transcript. A
//! positive verdict arms the capture latch; failures produce no verdict
//! rather than a wrong one.

use crate::consent::filename::{sanitize_name, UNKNOWN_NAME};
use crate::consent::latch::CaptureLatch;
use crate::pipeline::error::StationError;
use crate::pipeline::health::{bump, PipelineMetrics};
use crate::pipeline::station::Station;
use crate::pipeline::types::{SpeechSegment, Transcript};
use crate::speech::classifier::ConsentClassifier;
use crate::speech::transcriber::Transcriber;
use std::sync::Arc;

pub struct SpeechWorker {
    transcriber: Box<dyn Transcriber>,
    classifier: Box<dyn ConsentClassifier>,
    latch: Arc<CaptureLatch>,
    metrics: Arc<PipelineMetrics>,
    worker_id: usize,
    transcriptions_completed: u64,
}

impl SpeechWorker {
    pub fn new(
        transcriber: Box<dyn Transcriber>,
        classifier: Box<dyn ConsentClassifier>,
        latch: Arc<CaptureLatch>,
        metrics: Arc<PipelineMetrics>,
        worker_id: usize,
    ) -> Self {
        Self {
            transcriber,
            classifier,
            latch,
            metrics,
            worker_id,
            transcriptions_completed: 0,
        }
    }
}

impl Station for SpeechWorker {
    type Input = SpeechSegment;
    type Output = ();

    fn name(&self) -> &'static str {
        "speech-worker"
    }

    fn process(&mut self, segment: SpeechSegment) -> Result<Vec<()>, StationError> {
        let text = self
            .transcriber
            .transcribe(&segment.samples)
            .map_err(|e| StationError::Recoverable(format!("transcription: {e}")))?;

        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let transcript = Transcript {
            text: text.to_string(),
            start_secs: segment.start_secs,
            end_secs: segment.end_secs,
        };

        self.transcriptions_completed += 1;
        bump(&self.metrics.transcriptions);
        log::info!(
            "[transcript {:.2}s-{:.2}s] {}",
            transcript.start_secs,
            transcript.end_secs,
            transcript.text
        );

        let verdict = self
            .classifier
            .classify(&transcript.text)
            .map_err(|e| StationError::Recoverable(format!("classification: {e}")))?;

        if verdict.consented {
            // Normalize to a filename-safe token before arming; a sanitized
            // "unknown" carries no name.
            let normalized = sanitize_name(verdict.name.as_deref());
            let name = if normalized == UNKNOWN_NAME {
                None
            } else {
                Some(normalized)
            };

            log::info!(
                "consent detected (worker {}): {}",
                self.worker_id,
                name.as_deref().unwrap_or(UNKNOWN_NAME)
            );
            if !self.latch.arm(name) {
                log::debug!("capture request already pending, coalesced");
            }
        }

        Ok(Vec::new())
    }

    fn shutdown(&mut self) {
        log::info!(
            "speech worker {} completed {} transcriptions",
            self.worker_id,
            self.transcriptions_completed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::classifier::{ConsentVerdict, MockConsentClassifier};
    use crate::speech::transcriber::MockTranscriber;
    use std::sync::atomic::Ordering;

    fn segment() -> SpeechSegment {
        SpeechSegment::new(vec![1000i16; 16_000], 1.0, 2.0)
    }

    fn worker(
        transcriber: MockTranscriber,
        classifier: MockConsentClassifier,
        latch: Arc<CaptureLatch>,
        metrics: Arc<PipelineMetrics>,
    ) -> SpeechWorker {
        SpeechWorker::new(
            Box::new(transcriber),
            Box::new(classifier),
            latch,
            metrics,
            0,
        )
    }

    #[test]
    fn test_consent_arms_latch_with_sanitized_name() {
        let latch = Arc::new(CaptureLatch::new());
        let metrics = PipelineMetrics::new();
        let mut worker = worker(
            MockTranscriber::new("m").with_response("I consent to be recorded, my name is Mary Jane"),
            MockConsentClassifier::fixed(ConsentVerdict {
                consented: true,
                name: Some("Mary Jane".to_string()),
            }),
            latch.clone(),
            metrics.clone(),
        );

        worker.process(segment()).unwrap();

        let request = latch.take().unwrap();
        assert_eq!(request.name, Some("mary_jane".to_string()));
        assert_eq!(metrics.transcriptions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_negative_verdict_leaves_latch_unarmed() {
        let latch = Arc::new(CaptureLatch::new());
        let mut worker = worker(
            MockTranscriber::new("m").with_response("nice weather today"),
            MockConsentClassifier::keyword(),
            latch.clone(),
            PipelineMetrics::new(),
        );

        worker.process(segment()).unwrap();
        assert!(!latch.is_armed());
    }

    #[test]
    fn test_unknown_name_arms_with_none() {
        let latch = Arc::new(CaptureLatch::new());
        let mut worker = worker(
            MockTranscriber::new("m").with_response("you can record me"),
            MockConsentClassifier::fixed(ConsentVerdict {
                consented: true,
                name: None,
            }),
            latch.clone(),
            PipelineMetrics::new(),
        );

        worker.process(segment()).unwrap();
        let request = latch.take().unwrap();
        assert_eq!(request.name, None);
    }

    #[test]
    fn test_unusable_name_becomes_none() {
        let latch = Arc::new(CaptureLatch::new());
        let mut worker = worker(
            MockTranscriber::new("m").with_response("I consent"),
            MockConsentClassifier::fixed(ConsentVerdict {
                consented: true,
                name: Some("!!!".to_string()),
            }),
            latch.clone(),
            PipelineMetrics::new(),
        );

        worker.process(segment()).unwrap();
        assert_eq!(latch.take().unwrap().name, None);
    }

    #[test]
    fn test_repeated_positives_coalesce() {
        let latch = Arc::new(CaptureLatch::new());
        let mut worker = worker(
            MockTranscriber::new("m").with_response("I consent, my name is Alice"),
            MockConsentClassifier::fixed(ConsentVerdict {
                consented: true,
                name: Some("alice".to_string()),
            }),
            latch.clone(),
            PipelineMetrics::new(),
        );

        worker.process(segment()).unwrap();
        worker.process(segment()).unwrap();
        worker.process(segment()).unwrap();

        // Still exactly one pending request.
        assert!(latch.take().is_some());
        assert!(latch.take().is_none());
    }

    #[test]
    fn test_transcription_failure_is_recoverable() {
        let latch = Arc::new(CaptureLatch::new());
        let mut worker = worker(
            MockTranscriber::new("m").with_failure(),
            MockConsentClassifier::keyword(),
            latch.clone(),
            PipelineMetrics::new(),
        );

        let result = worker.process(segment());
        assert!(matches!(result, Err(StationError::Recoverable(_))));
        assert!(!latch.is_armed());
    }

    #[test]
    fn test_classification_failure_is_recoverable_and_produces_no_verdict() {
        let latch = Arc::new(CaptureLatch::new());
        let mut worker = worker(
            MockTranscriber::new("m").with_response("I consent"),
            MockConsentClassifier::failing(),
            latch.clone(),
            PipelineMetrics::new(),
        );

        let result = worker.process(segment());
        assert!(matches!(result, Err(StationError::Recoverable(_))));
        assert!(!latch.is_armed());
    }

    #[test]
    fn test_empty_transcript_skips_classification() {
        let latch = Arc::new(CaptureLatch::new());
        let metrics = PipelineMetrics::new();
        let mut worker = worker(
            MockTranscriber::new("m").with_response("   "),
            // Would arm if consulted; must not be.
            MockConsentClassifier::fixed(ConsentVerdict {
                consented: true,
                name: None,
            }),
            latch.clone(),
            metrics.clone(),
        );

        worker.process(segment()).unwrap();
        assert!(!latch.is_armed());
        assert_eq!(metrics.transcriptions.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_keyword_flow_end_to_end() {
        let latch = Arc::new(CaptureLatch::new());
        let mut worker = worker(
            MockTranscriber::new("m")
                .with_response("I consent to be recorded, my name is Alice"),
            MockConsentClassifier::keyword(),
            latch.clone(),
            PipelineMetrics::new(),
        );

        worker.process(segment()).unwrap();
        assert_eq!(latch.take().unwrap().name, Some("alice".to_string()));
    }
}
