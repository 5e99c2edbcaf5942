//! Engine lifecycle: configuration, session start/stop, event fan-out.

pub mod pipeline;

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    audio::{
        source::{FileSource, RingSource, SampleSource},
        AudioCapture,
    },
    buffering::create_sample_ring,
    classify::{ClassifierHandle, InputLayout},
    error::{HarkenError, Result},
    ipc::events::{EngineStatus, EngineStatusEvent, RecognitionEvent},
    smoothing::{ScoreAveraging, SmootherConfig},
};

use pipeline::{DiagnosticsSnapshot, PipelineContext, PipelineDiagnostics};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const STATUS_CHANNEL_CAPACITY: usize = 16;

/// Session parameters. Validated when a session starts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Device buffer size in samples; the pipeline reads chunks of half this.
    pub buffer_size: usize,
    /// Samples per inference window.
    pub audio_length: usize,
    /// Windows per session; the last one ends the session.
    pub num_of_inferences: usize,
    /// Tensor shape convention the classifier expects.
    pub input_layout: InputLayout,
    /// Emit unsmoothed score vectors instead of debounced detections.
    pub output_raw_scores: bool,
    /// Abort the session on the first classifier error instead of skipping
    /// the failed window.
    pub fail_fast: bool,
    /// Class labels, index-aligned with the classifier's output scores.
    /// May be empty in raw mode.
    pub labels: Vec<String>,
    pub smoothing: SmootherConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            buffer_size: 2_048,
            audio_length: 16_000,
            num_of_inferences: 1,
            input_layout: InputLayout::RawAudio,
            output_raw_scores: false,
            fail_fast: false,
            labels: Vec::new(),
            smoothing: SmootherConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Samples read from the source per pipeline iteration.
    pub fn read_frame_len(&self) -> usize {
        self.buffer_size / 2
    }

    /// Check the parameters a session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(HarkenError::InvalidConfig("sample_rate must be > 0".into()));
        }
        if self.buffer_size < 2 || self.buffer_size % 2 != 0 {
            return Err(HarkenError::InvalidConfig(format!(
                "buffer_size must be even and >= 2, got {}",
                self.buffer_size
            )));
        }
        if self.audio_length == 0 {
            return Err(HarkenError::InvalidConfig("audio_length must be > 0".into()));
        }
        if self.num_of_inferences == 0 {
            return Err(HarkenError::InvalidConfig(
                "num_of_inferences must be > 0".into(),
            ));
        }
        // A read chunk larger than a window could carry over more than one
        // window boundary at once, which the splicer does not support.
        if self.read_frame_len() > self.audio_length {
            return Err(HarkenError::InvalidConfig(format!(
                "read frame ({}) must not exceed audio_length ({})",
                self.read_frame_len(),
                self.audio_length
            )));
        }
        if !self.output_raw_scores {
            if self.labels.is_empty() {
                return Err(HarkenError::InvalidConfig(
                    "labels are required unless output_raw_scores is set".into(),
                ));
            }
            let t = self.smoothing.detection_threshold;
            if !(0.0..=1.0).contains(&t) {
                return Err(HarkenError::InvalidConfig(format!(
                    "detection_threshold must be within [0, 1], got {t}"
                )));
            }
            if let ScoreAveraging::Exponential { decay } = self.smoothing.averaging {
                if !(decay > 0.0 && decay <= 1.0) {
                    return Err(HarkenError::InvalidConfig(format!(
                        "exponential decay must be within (0, 1], got {decay}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Top-level handle: owns the classifier and runs one session at a time.
///
/// `start`/`stop` are idempotent. Calling `start` while a session runs, or
/// `stop` while none does, is a logged no-op. Results reach subscribers via
/// a broadcast channel, so any number of sinks can watch a session.
pub struct HarkenEngine {
    config: EngineConfig,
    classifier: ClassifierHandle,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<EngineStatus>>,
    event_tx: broadcast::Sender<RecognitionEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl HarkenEngine {
    pub fn new(config: EngineConfig, classifier: ClassifierHandle) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            config,
            classifier,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            event_tx,
            status_tx,
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        }
    }

    /// Run the classifier once on silence so model initialization cost is
    /// paid before the first real window.
    pub fn warm_up(&self) -> Result<()> {
        info!("warming up classifier");
        self.classifier.0.lock().warm_up()
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RecognitionEvent> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Start a live microphone session.
    ///
    /// The device is opened on the blocking thread that will run the pipeline
    /// (cpal streams are bound to their creation thread); this call waits for
    /// the open to be confirmed and reports device failures synchronously.
    ///
    /// No-op if a session is already running.
    pub fn start(&self) -> Result<()> {
        self.config.validate()?;
        if !self.begin_session() {
            return Ok(());
        }

        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();
        let ctx_parts = self.session_parts();
        let sample_rate = self.config.sample_rate;

        tokio::task::spawn_blocking(move || {
            let (producer, consumer) = create_sample_ring();
            let running = Arc::clone(&ctx_parts.running);
            let capture = match AudioCapture::open_default(producer, Arc::clone(&running), sample_rate)
            {
                Ok(capture) => {
                    let _ = open_tx.send(Ok(()));
                    capture
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };
            let source = Box::new(RingSource::new(consumer, running));
            pipeline::run(ctx_parts.into_context(source));
            capture.stop();
        });

        match open_rx.recv() {
            Ok(Ok(())) => {
                self.set_status(EngineStatus::Listening, None);
                info!("session started (microphone)");
                Ok(())
            }
            Ok(Err(e)) => {
                self.abort_start(&e);
                Err(e)
            }
            Err(_) => {
                let e = HarkenError::AudioStream("capture task exited before opening".into());
                self.abort_start(&e);
                Err(e)
            }
        }
    }

    /// Start a session reading from `source` instead of the microphone.
    ///
    /// No-op if a session is already running.
    pub fn start_with_source(&self, source: Box<dyn SampleSource>) -> Result<()> {
        self.config.validate()?;
        if !self.begin_session() {
            return Ok(());
        }

        let ctx = self.session_parts().into_context(source);
        tokio::task::spawn_blocking(move || pipeline::run(ctx));

        self.set_status(EngineStatus::Listening, None);
        info!("session started (external source)");
        Ok(())
    }

    /// Start a session over a stored mono 16-bit WAV file.
    pub fn start_file(&self, path: &Path) -> Result<()> {
        let source = FileSource::open(path, self.config.sample_rate)?;
        self.start_with_source(Box::new(source))
    }

    /// Request the current session to stop. No-op when none is running.
    ///
    /// The pipeline drains buffered audio, finishes any inference in flight
    /// and emits `EndOfStream` before going quiet; wait for that event to
    /// know the session is fully over.
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("stop requested");
        } else {
            debug!("stop called with no session running");
        }
    }

    /// Claim the single session slot. False means one is already running.
    fn begin_session(&self) -> bool {
        let claimed = self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if claimed {
            self.diagnostics.reset();
        } else {
            debug!("start called while a session is running");
        }
        claimed
    }

    fn abort_start(&self, e: &HarkenError) {
        self.running.store(false, Ordering::SeqCst);
        self.set_status(EngineStatus::Error, Some(e.to_string()));
    }

    fn set_status(&self, status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = status;
        let _ = self.status_tx.send(EngineStatusEvent { status, detail });
    }

    fn session_parts(&self) -> SessionParts {
        SessionParts {
            config: self.config.clone(),
            classifier: self.classifier.clone(),
            running: Arc::clone(&self.running),
            event_tx: self.event_tx.clone(),
            status_tx: self.status_tx.clone(),
            status: Arc::clone(&self.status),
            diagnostics: Arc::clone(&self.diagnostics),
        }
    }
}

/// Everything a pipeline needs except the sample source, which live and
/// file sessions construct differently.
struct SessionParts {
    config: EngineConfig,
    classifier: ClassifierHandle,
    running: Arc<AtomicBool>,
    event_tx: broadcast::Sender<RecognitionEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    status: Arc<Mutex<EngineStatus>>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl SessionParts {
    fn into_context(self, source: Box<dyn SampleSource>) -> PipelineContext {
        PipelineContext {
            config: self.config,
            classifier: self.classifier,
            source,
            running: self.running,
            event_tx: self.event_tx,
            status_tx: self.status_tx,
            status: self.status,
            diagnostics: self.diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> EngineConfig {
        EngineConfig {
            labels: vec!["a".into(), "b".into()],
            ..EngineConfig::default()
        }
    }

    #[test]
    fn default_config_needs_labels_in_smoothed_mode() {
        let config = EngineConfig::default();
        assert!(matches!(
            config.validate(),
            Err(HarkenError::InvalidConfig(_))
        ));
    }

    #[test]
    fn raw_mode_accepts_empty_labels() {
        let config = EngineConfig {
            output_raw_scores: true,
            ..EngineConfig::default()
        };
        config.validate().expect("raw mode without labels");
    }

    #[test]
    fn rejects_odd_buffer_size() {
        let config = EngineConfig {
            buffer_size: 1_023,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_read_frame_larger_than_window() {
        let config = EngineConfig {
            buffer_size: 4_096,
            audio_length: 1_024,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = valid_config();
        config.smoothing.detection_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_exponential_decay() {
        let mut config = valid_config();
        config.smoothing.averaging = ScoreAveraging::Exponential { decay: 0.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_config_passes() {
        valid_config().validate().expect("config should validate");
    }
}
