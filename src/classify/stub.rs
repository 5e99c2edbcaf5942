//! `StubClassifier` — placeholder backend that scores without a real model.
//!
//! Scores each window by RMS energy: a loud window pushes probability mass to
//! the last label, a quiet one to the first. Lets the full capture → window →
//! smooth → sink pipeline be exercised end-to-end before a model backend is
//! wired in.

use tracing::debug;

use crate::classify::{Classifier, ClassifierInput};
use crate::error::Result;

/// Energy-echo stub classifier.
pub struct StubClassifier {
    num_labels: usize,
    /// RMS above which the window counts as "loud".
    threshold: f32,
}

impl StubClassifier {
    pub fn new(num_labels: usize) -> Self {
        Self {
            num_labels,
            threshold: 0.05,
        }
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }
}

impl Classifier for StubClassifier {
    fn warm_up(&mut self) -> Result<()> {
        debug!("StubClassifier::warm_up — no-op");
        Ok(())
    }

    fn infer(&mut self, input: &ClassifierInput<'_>) -> Result<Vec<f32>> {
        let rms = Self::rms(input.samples);
        let mut scores = vec![0.0f32; self.num_labels];
        if self.num_labels == 0 {
            return Ok(scores);
        }

        let hot = if rms >= self.threshold {
            self.num_labels - 1
        } else {
            0
        };
        scores[hot] = 0.95;
        debug!(rms, hot, "stub inference");
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::InputLayout;

    fn input(samples: &[f32]) -> ClassifierInput<'_> {
        ClassifierInput {
            samples,
            sample_rate: 16_000,
            layout: InputLayout::RawAudio,
        }
    }

    #[test]
    fn quiet_window_scores_first_label() {
        let mut c = StubClassifier::new(3);
        let samples = vec![0.001f32; 160];
        let scores = c.infer(&input(&samples)).unwrap();
        assert_eq!(scores, vec![0.95, 0.0, 0.0]);
    }

    #[test]
    fn loud_window_scores_last_label() {
        let mut c = StubClassifier::new(3);
        let samples = vec![0.5f32; 160];
        let scores = c.infer(&input(&samples)).unwrap();
        assert_eq!(scores, vec![0.0, 0.0, 0.95]);
    }
}
