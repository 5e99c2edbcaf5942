//! Classifier abstraction.
//!
//! The `Classifier` trait decouples the pipeline from any specific backend —
//! the engine only knows the input tensor layout convention and the fact that
//! one window of normalized samples maps to one score vector.
//!
//! `&mut self` on `infer` intentionally expresses that backends may be
//! stateful (arena allocators, interpreter scratch buffers). All mutation is
//! serialised through `ClassifierHandle`'s `parking_lot::Mutex`.

pub mod stub;

pub use stub::StubClassifier;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Divisor for 16-bit → float normalization (i16::MAX).
const I16_FULL_SCALE: f32 = 32_767.0;

/// Input tensor layout convention expected by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputLayout {
    /// Single-input waveform tensor, shaped `[length, 1]` or `[1, length]`
    /// depending on the model.
    RawAudio,
    /// Two-input form: `(waveform, sample_rate)` — the decoded-wav convention
    /// used by speech-commands style models.
    DecodedWaveform,
}

/// One window of audio, normalized and annotated, ready for inference.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierInput<'a> {
    /// Mono samples normalized to [-1.0, 1.0].
    pub samples: &'a [f32],
    /// Capture sample rate in Hz. Only meaningful for
    /// `InputLayout::DecodedWaveform`, which feeds it as a second tensor.
    pub sample_rate: u32,
    /// Which tensor shape convention to apply.
    pub layout: InputLayout,
}

/// Contract for classification backends.
pub trait Classifier: Send + 'static {
    /// One-time warm-up: load weights, pre-allocate buffers, run a dummy
    /// inference. Called once before the first session.
    ///
    /// # Errors
    /// Returns an error if model assets are missing or corrupt.
    fn warm_up(&mut self) -> Result<()>;

    /// Map one window to a per-label score vector.
    ///
    /// The returned vector's length must equal the configured label count;
    /// the smoother rejects mismatches.
    fn infer(&mut self, input: &ClassifierInput<'_>) -> Result<Vec<f32>>;
}

/// Thread-safe reference-counted handle to any `Classifier` implementor.
///
/// `parking_lot::Mutex` for non-poisoning locks — an inference panic must not
/// wedge subsequent sessions.
#[derive(Clone)]
pub struct ClassifierHandle(pub Arc<Mutex<dyn Classifier>>);

impl ClassifierHandle {
    /// Wrap any `Classifier` in a `ClassifierHandle`.
    pub fn new<C: Classifier>(classifier: C) -> Self {
        Self(Arc::new(Mutex::new(classifier)))
    }
}

impl std::fmt::Debug for ClassifierHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierHandle").finish_non_exhaustive()
    }
}

/// Normalize 16-bit samples to floats in [-1.0, 1.0] by dividing by 32767.
pub fn normalize(window: &[i16]) -> Vec<f32> {
    window.iter().map(|&s| s as f32 / I16_FULL_SCALE).collect()
}
