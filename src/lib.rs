//! # harken
//!
//! Streaming audio command recognition engine.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → capture thread (spawn_blocking)
//!                                                    │
//!                                             WindowAssembler
//!                                                    │  owned window snapshot
//!                                            bounded(1) handoff
//!                                                    │
//!                                          inference worker thread
//!                                      Classifier::infer → DetectionSmoother
//!                                                    │
//!                                    broadcast::Sender<RecognitionEvent>
//! ```
//!
//! The audio callback is zero-alloc. Window assembly runs synchronously on the
//! capture thread; classification and smoothing run on a dedicated worker so a
//! slow classifier never stalls capture.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod classify;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod smoothing;

// Convenience re-exports for downstream crates
pub use audio::source::{FileSource, SampleSource};
pub use buffering::assembler::{Emission, WindowAssembler};
pub use classify::{Classifier, ClassifierHandle, ClassifierInput, InputLayout};
pub use engine::{EngineConfig, HarkenEngine};
pub use error::HarkenError;
pub use ipc::events::{
    EngineStatus, EngineStatusEvent, RecognitionEvent, RecognitionOutcome,
};
pub use smoothing::{Detection, DetectionSmoother, ScoreAveraging, SmootherConfig};
