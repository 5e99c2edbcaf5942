//! Detection smoothing: suppress label flicker across consecutive windows and
//! rate-limit repeated firings.
//!
//! ## Algorithm (per call)
//!
//! 1. Append `(now, scores)` to a time-ordered history.
//! 2. Drop entries older than `now - average_window`.
//! 3. Average each label's score over the retained history.
//! 4. Candidate = highest average; ties break to the lowest label index.
//! 5. Fire only if the average clears `detection_threshold`, the global
//!    `min_time_between` has elapsed since the last firing of any label, and
//!    the candidate is outside its own `suppression_time` cooldown.
//! 6. Otherwise report no detection.
//!
//! Timestamps are durations since the session epoch and must be monotone
//! non-decreasing; the caller (the inference worker) guarantees this.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{HarkenError, Result};

/// How per-label scores are averaged over the history window.
///
/// The exact formula is a strategy rather than a constant of the design:
/// anything that excludes entries past the window is acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScoreAveraging {
    /// Plain arithmetic mean over retained entries.
    Arithmetic,
    /// Exponentially decayed mean: an entry aged `a` within the window of
    /// length `w` weighs `decay^(a / w)`. `decay` in (0, 1]; 1.0 degenerates
    /// to the arithmetic mean.
    Exponential { decay: f32 },
}

/// Immutable per-session smoothing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmootherConfig {
    /// History window over which scores are averaged (ms). Default: 1000.
    pub average_window_ms: u64,
    /// Minimum averaged score to report a detection, in [0, 1]. Default: 0.3.
    pub detection_threshold: f32,
    /// Cooldown after a label fires before the same label may fire again (ms).
    /// Default: 1500.
    pub suppression_ms: u64,
    /// Minimum interval between any two reported detections (ms). Default: 30.
    pub min_time_between_ms: u64,
    /// Averaging strategy. Default: arithmetic mean.
    pub averaging: ScoreAveraging,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            average_window_ms: 1_000,
            detection_threshold: 0.3,
            suppression_ms: 1_500,
            min_time_between_ms: 30,
            averaging: ScoreAveraging::Arithmetic,
        }
    }
}

/// One debounced detection decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    /// Detected label, or `None` for the no-detection marker.
    pub label: Option<String>,
    /// The candidate's averaged score at decision time (0.0 when the history
    /// was empty).
    pub score: f32,
    /// Timestamp the decision was made for, relative to the session epoch.
    pub at: Duration,
}

struct ScoredFrame {
    at: Duration,
    scores: Vec<f32>,
}

/// Bounded time-ordered history of score vectors plus cooldown bookkeeping.
pub struct DetectionSmoother {
    labels: Vec<String>,
    config: SmootherConfig,
    history: VecDeque<ScoredFrame>,
    /// When any label last fired.
    last_fired_at: Option<Duration>,
    /// Per-label time of the most recent firing, indexed like `labels`.
    cooldowns: Vec<Option<Duration>>,
}

impl DetectionSmoother {
    pub fn new(labels: Vec<String>, config: SmootherConfig) -> Self {
        let n = labels.len();
        Self {
            labels,
            config,
            history: VecDeque::new(),
            last_fired_at: None,
            cooldowns: vec![None; n],
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Consume the latest score vector and decide whether to report a
    /// detection at time `now`.
    ///
    /// # Errors
    /// `HarkenError::LabelMismatch` when the score vector's length differs
    /// from the label count.
    pub fn process(&mut self, scores: &[f32], now: Duration) -> Result<Detection> {
        if scores.len() != self.labels.len() {
            return Err(HarkenError::LabelMismatch {
                expected: self.labels.len(),
                got: scores.len(),
            });
        }

        self.history.push_back(ScoredFrame {
            at: now,
            scores: scores.to_vec(),
        });
        let horizon = now.saturating_sub(Duration::from_millis(self.config.average_window_ms));
        while let Some(front) = self.history.front() {
            if front.at < horizon {
                self.history.pop_front();
            } else {
                break;
            }
        }

        let Some((candidate, avg)) = self.best_average(now) else {
            return Ok(Detection {
                label: None,
                score: 0.0,
                at: now,
            });
        };

        let above_threshold = avg >= self.config.detection_threshold;
        let interval_ok = self
            .last_fired_at
            .map(|t| now.saturating_sub(t) >= Duration::from_millis(self.config.min_time_between_ms))
            .unwrap_or(true);
        let outside_cooldown = self.cooldowns[candidate]
            .map(|t| now.saturating_sub(t) >= Duration::from_millis(self.config.suppression_ms))
            .unwrap_or(true);

        trace!(
            candidate = %self.labels[candidate],
            avg,
            above_threshold,
            interval_ok,
            outside_cooldown,
            "smoother decision"
        );

        if above_threshold && interval_ok && outside_cooldown {
            self.cooldowns[candidate] = Some(now);
            self.last_fired_at = Some(now);
            Ok(Detection {
                label: Some(self.labels[candidate].clone()),
                score: avg,
                at: now,
            })
        } else {
            Ok(Detection {
                label: None,
                score: avg,
                at: now,
            })
        }
    }

    /// Clear history and cooldowns for a fresh session.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_fired_at = None;
        self.cooldowns.iter_mut().for_each(|c| *c = None);
    }

    /// Highest averaged label over the retained history; strict `>` while
    /// scanning makes ties resolve to the lowest index.
    fn best_average(&self, now: Duration) -> Option<(usize, f32)> {
        if self.history.is_empty() || self.labels.is_empty() {
            return None;
        }

        let window = Duration::from_millis(self.config.average_window_ms);
        let mut sums = vec![0.0f32; self.labels.len()];
        let mut weight_total = 0.0f32;

        for frame in &self.history {
            let weight = match self.config.averaging {
                ScoreAveraging::Arithmetic => 1.0,
                ScoreAveraging::Exponential { decay } => {
                    let age = now.saturating_sub(frame.at);
                    let frac = if window.is_zero() {
                        0.0
                    } else {
                        age.as_secs_f32() / window.as_secs_f32()
                    };
                    decay.max(f32::MIN_POSITIVE).powf(frac)
                }
            };
            weight_total += weight;
            for (sum, &s) in sums.iter_mut().zip(&frame.scores) {
                *sum += s * weight;
            }
        }

        let mut best = 0usize;
        let mut best_avg = sums[0] / weight_total;
        for (i, sum) in sums.iter().enumerate().skip(1) {
            let avg = sum / weight_total;
            if avg > best_avg {
                best = i;
                best_avg = avg;
            }
        }
        Some((best, best_avg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn labels() -> Vec<String> {
        vec!["_silence_".into(), "yes".into(), "no".into()]
    }

    fn config() -> SmootherConfig {
        SmootherConfig {
            average_window_ms: 1_000,
            detection_threshold: 0.5,
            suppression_ms: 1_500,
            min_time_between_ms: 100,
            averaging: ScoreAveraging::Arithmetic,
        }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn strong_score_fires_once_then_is_rate_limited() {
        let mut sm = DetectionSmoother::new(labels(), config());

        let first = sm.process(&[0.0, 0.9, 0.0], ms(1_000)).unwrap();
        assert_eq!(first.label.as_deref(), Some("yes"));

        // Half the minimum interval later: suppressed even though the score
        // still clears the threshold.
        let second = sm.process(&[0.0, 0.9, 0.0], ms(1_050)).unwrap();
        assert_eq!(second.label, None);
        assert!(second.score >= 0.5);
    }

    #[test]
    fn same_label_respects_suppression_cooldown() {
        let mut sm = DetectionSmoother::new(labels(), config());

        assert_eq!(
            sm.process(&[0.0, 0.9, 0.0], ms(1_000)).unwrap().label.as_deref(),
            Some("yes")
        );
        // Past min interval but inside the 1500 ms cooldown.
        assert_eq!(sm.process(&[0.0, 0.9, 0.0], ms(1_400)).unwrap().label, None);
        // Past the cooldown (old frames have aged out of the history too).
        let again = sm.process(&[0.0, 0.9, 0.0], ms(2_501)).unwrap();
        assert_eq!(again.label.as_deref(), Some("yes"));
    }

    #[test]
    fn a_different_label_is_not_blocked_by_anothers_cooldown() {
        let mut sm = DetectionSmoother::new(labels(), config());

        assert_eq!(
            sm.process(&[0.0, 0.9, 0.0], ms(1_000)).unwrap().label.as_deref(),
            Some("yes")
        );
        // 1100 ms later the "yes" frames have left the 1000 ms history window;
        // "no" is the candidate and only the global min interval applies.
        let other = sm.process(&[0.0, 0.0, 0.9], ms(2_100)).unwrap();
        assert_eq!(other.label.as_deref(), Some("no"));
    }

    #[test]
    fn all_zero_scores_never_fire() {
        let mut cfg = config();
        cfg.detection_threshold = 0.01;
        let mut sm = DetectionSmoother::new(labels(), cfg);
        for i in 0..20 {
            let d = sm.process(&[0.0, 0.0, 0.0], ms(100 * i)).unwrap();
            assert_eq!(d.label, None);
            assert_eq!(d.score, 0.0);
        }
    }

    #[test]
    fn averaging_spans_the_history_window() {
        let mut sm = DetectionSmoother::new(labels(), config());
        // Two frames inside the window: average of 0.9 and 0.3 is 0.6.
        sm.process(&[0.0, 0.9, 0.0], ms(100)).unwrap();
        let d = sm.process(&[0.0, 0.3, 0.0], ms(200)).unwrap();
        assert_relative_eq!(d.score, 0.6, epsilon = 1e-6);
    }

    #[test]
    fn stale_frames_age_out_of_the_average() {
        let mut sm = DetectionSmoother::new(labels(), config());
        sm.process(&[0.0, 0.9, 0.0], ms(0)).unwrap();
        // 1500 ms later the first frame is outside the 1000 ms window, so the
        // average is just the fresh 0.2 frame — below threshold.
        let d = sm.process(&[0.0, 0.2, 0.0], ms(1_500)).unwrap();
        assert_eq!(d.label, None);
        assert_relative_eq!(d.score, 0.2, epsilon = 1e-6);
    }

    #[test]
    fn ties_break_to_the_lowest_label_index() {
        let mut cfg = config();
        cfg.detection_threshold = 0.5;
        let mut sm = DetectionSmoother::new(labels(), cfg);
        let d = sm.process(&[0.0, 0.7, 0.7], ms(10)).unwrap();
        assert_eq!(d.label.as_deref(), Some("yes"));
    }

    #[test]
    fn score_vector_length_is_validated() {
        let mut sm = DetectionSmoother::new(labels(), config());
        let err = sm.process(&[0.1, 0.2], ms(10)).unwrap_err();
        assert!(matches!(
            err,
            HarkenError::LabelMismatch { expected: 3, got: 2 }
        ));
    }

    #[test]
    fn exponential_averaging_weights_recent_frames_harder() {
        let mut cfg = config();
        cfg.averaging = ScoreAveraging::Exponential { decay: 0.1 };
        let mut sm = DetectionSmoother::new(labels(), cfg);

        sm.process(&[0.0, 0.9, 0.0], ms(0)).unwrap();
        // 900 ms later the old frame's weight is 0.1^0.9 ≈ 0.126, so the
        // fresh 0.1 frame dominates and the average sits well below the
        // arithmetic mean of 0.5.
        let d = sm.process(&[0.0, 0.1, 0.0], ms(900)).unwrap();
        assert!(d.score < 0.25, "score = {}", d.score);
    }

    #[test]
    fn reset_clears_history_and_cooldowns() {
        let mut sm = DetectionSmoother::new(labels(), config());
        sm.process(&[0.0, 0.9, 0.0], ms(1_000)).unwrap();
        sm.reset();
        // Without the reset this would sit inside the suppression cooldown.
        let d = sm.process(&[0.0, 0.9, 0.0], ms(1_050)).unwrap();
        assert_eq!(d.label.as_deref(), Some("yes"));
    }
}
