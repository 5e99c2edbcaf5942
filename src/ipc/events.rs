//! Event types broadcast by the engine.
//!
//! Everything is serde-serializable (camelCase) so a host runtime can forward
//! events over its own transport without re-mapping field names.

use serde::{Deserialize, Serialize};

use crate::smoothing::Detection;

// ---------------------------------------------------------------------------
// Recognition events
// ---------------------------------------------------------------------------

/// Result of one inference pass, in the mode the session was configured for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum RecognitionOutcome {
    /// Smoothed mode: one debounced detection decision per window.
    Detection(Detection),
    /// Raw mode: the classifier's unprocessed score vector.
    RawScores { scores: Vec<f32> },
}

/// Emitted once per processed window, plus one terminal event per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum RecognitionEvent {
    /// A window was classified successfully.
    #[serde(rename_all = "camelCase")]
    Result {
        /// Sequence number of the window that produced this result.
        seq: u64,
        #[serde(flatten)]
        outcome: RecognitionOutcome,
        /// Wall-clock duration of the classifier call in milliseconds.
        inference_time_ms: u64,
    },
    /// The classifier failed on one window; capture continued.
    InferenceError { seq: u64, message: String },
    /// The session ended. Sent exactly once, on final window or cancellation.
    EndOfStream,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted when the engine's lifecycle state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but no session started yet.
    Idle,
    /// Actively capturing and classifying.
    Listening,
    /// Session over; the engine may be restarted.
    Stopped,
    /// Unrecoverable session error — restart required.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn result_event_serializes_with_camel_case_and_flattened_outcome() {
        let event = RecognitionEvent::Result {
            seq: 4,
            outcome: RecognitionOutcome::Detection(Detection {
                label: Some("yes".into()),
                score: 0.82,
                at: Duration::from_millis(1200),
            }),
            inference_time_ms: 17,
        };

        let json = serde_json::to_value(&event).expect("serialize result event");
        assert_eq!(json["type"], "result");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["mode"], "detection");
        assert_eq!(json["label"], "yes");
        assert_eq!(json["inferenceTimeMs"], 17);

        let round_trip: RecognitionEvent =
            serde_json::from_value(json).expect("deserialize result event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn raw_scores_event_carries_the_vector() {
        let event = RecognitionEvent::Result {
            seq: 0,
            outcome: RecognitionOutcome::RawScores {
                scores: vec![0.1, 0.7, 0.2],
            },
            inference_time_ms: 3,
        };
        let json = serde_json::to_value(&event).expect("serialize raw event");
        assert_eq!(json["mode"], "rawScores");
        assert_eq!(json["scores"][1].as_f64().unwrap(), 0.7f32 as f64);
    }

    #[test]
    fn end_of_stream_is_a_bare_tag() {
        let json = serde_json::to_value(RecognitionEvent::EndOfStream).unwrap();
        assert_eq!(json["type"], "endOfStream");
    }

    #[test]
    fn engine_status_serializes_lowercase() {
        let event = EngineStatusEvent {
            status: EngineStatus::Listening,
            detail: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "listening");
    }
}
