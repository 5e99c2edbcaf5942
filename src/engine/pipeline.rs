//! Blocking pipeline loop.
//!
//! ## Per-session shape
//!
//! ```text
//! capture thread                     inference worker
//! ──────────────                     ────────────────
//! read chunk from SampleSource       recv job (bounded(1) channel)
//! feed WindowAssembler               normalize i16 → f32 (/ 32767)
//!   Emission::Window  ──try_send──►  Classifier::infer (timed)
//!   (slot full → window skipped)     DetectionSmoother::process
//!   Emission::FinalWindow ──send──►  broadcast RecognitionEvent
//!   then loop ends                   on final job / disconnect:
//!                                    broadcast EndOfStream (exactly once)
//! ```
//!
//! Assembly runs synchronously on the capture thread — it defines buffer
//! boundaries and must never be deferred. The bounded(1) channel is the
//! single-flight guard: a window arriving while the previous inference is
//! still running is skipped and counted, never queued without bound. A single
//! worker draining a single channel delivers results to the smoother in
//! window order.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Instant;

use crossbeam_channel::{Receiver, TrySendError};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    audio::source::SampleSource,
    buffering::assembler::{Emission, WindowAssembler},
    classify::{self, ClassifierHandle, ClassifierInput},
    engine::EngineConfig,
    error::HarkenError,
    ipc::events::{EngineStatus, EngineStatusEvent, RecognitionEvent, RecognitionOutcome},
    smoothing::DetectionSmoother,
};

pub struct PipelineDiagnostics {
    pub chunks_read: AtomicUsize,
    pub samples_in: AtomicUsize,
    pub windows_emitted: AtomicUsize,
    pub windows_skipped: AtomicUsize,
    pub inference_calls: AtomicUsize,
    pub inference_errors: AtomicUsize,
    pub detections_fired: AtomicUsize,
}

impl Default for PipelineDiagnostics {
    fn default() -> Self {
        Self {
            chunks_read: AtomicUsize::new(0),
            samples_in: AtomicUsize::new(0),
            windows_emitted: AtomicUsize::new(0),
            windows_skipped: AtomicUsize::new(0),
            inference_calls: AtomicUsize::new(0),
            inference_errors: AtomicUsize::new(0),
            detections_fired: AtomicUsize::new(0),
        }
    }
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.chunks_read.store(0, Ordering::Relaxed);
        self.samples_in.store(0, Ordering::Relaxed);
        self.windows_emitted.store(0, Ordering::Relaxed);
        self.windows_skipped.store(0, Ordering::Relaxed);
        self.inference_calls.store(0, Ordering::Relaxed);
        self.inference_errors.store(0, Ordering::Relaxed);
        self.detections_fired.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            chunks_read: self.chunks_read.load(Ordering::Relaxed),
            samples_in: self.samples_in.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            windows_skipped: self.windows_skipped.load(Ordering::Relaxed),
            inference_calls: self.inference_calls.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            detections_fired: self.detections_fired.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub chunks_read: usize,
    pub samples_in: usize,
    pub windows_emitted: usize,
    pub windows_skipped: usize,
    pub inference_calls: usize,
    pub inference_errors: usize,
    pub detections_fired: usize,
}

/// All context the pipeline needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub config: EngineConfig,
    pub classifier: ClassifierHandle,
    pub source: Box<dyn SampleSource>,
    pub running: Arc<AtomicBool>,
    pub event_tx: broadcast::Sender<RecognitionEvent>,
    pub status_tx: broadcast::Sender<EngineStatusEvent>,
    pub status: Arc<Mutex<EngineStatus>>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// One completed window handed to the inference worker.
struct InferenceJob {
    window: Vec<i16>,
    seq: u64,
    is_final: bool,
}

/// Run the blocking capture loop until the final window, source exhaustion,
/// or `ctx.running` going false.
pub fn run(mut ctx: PipelineContext) {
    info!(
        audio_length = ctx.config.audio_length,
        num_of_inferences = ctx.config.num_of_inferences,
        read_frame = ctx.config.read_frame_len(),
        "pipeline started"
    );

    let mut frame = vec![0i16; ctx.config.read_frame_len()];
    let mut assembler =
        WindowAssembler::new(ctx.config.audio_length, ctx.config.num_of_inferences);

    // Single-slot handoff: at most one window waits behind the inference in
    // flight. A full slot means the worker is lagging and the window is
    // dropped rather than queued without bound.
    let (job_tx, job_rx) = crossbeam_channel::bounded::<InferenceJob>(1);
    let worker = spawn_inference_worker(&ctx, job_rx);

    let mut seq = 0u64;

    while ctx.running.load(Ordering::Relaxed) {
        let n = match ctx.source.read(&mut frame) {
            Ok(0) => {
                debug!("sample source closed");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                error!("sample source failed: {e}");
                set_status(&ctx, EngineStatus::Error, Some(e.to_string()));
                break;
            }
        };

        ctx.diagnostics.chunks_read.fetch_add(1, Ordering::Relaxed);
        ctx.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);

        match assembler.feed(&frame[..n]) {
            Ok(Emission::None) => {}

            Ok(Emission::Window(window)) => {
                ctx.diagnostics
                    .windows_emitted
                    .fetch_add(1, Ordering::Relaxed);
                let job = InferenceJob {
                    window,
                    seq,
                    is_final: false,
                };
                seq += 1;
                match job_tx.try_send(job) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(seq = seq - 1, "inference still running — window skipped");
                        ctx.diagnostics
                            .windows_skipped
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        // Worker bailed (fail-fast); nothing left to feed.
                        break;
                    }
                }
            }

            Ok(Emission::FinalWindow(window)) => {
                ctx.diagnostics
                    .windows_emitted
                    .fetch_add(1, Ordering::Relaxed);
                debug!(seq, "final window — capture ending");
                // Blocking send: capture is done, waiting on the worker here
                // stalls nothing.
                let _ = job_tx.send(InferenceJob {
                    window,
                    seq,
                    is_final: true,
                });
                break;
            }

            Err(e) => {
                // Corrupt offsets must never be pushed through inference.
                error!("windowing invariant violated: {e}");
                set_status(&ctx, EngineStatus::Error, Some(e.to_string()));
                break;
            }
        }
    }

    ctx.running.store(false, Ordering::SeqCst);
    drop(job_tx);
    if worker.join().is_err() {
        error!("inference worker panicked");
        set_status(&ctx, EngineStatus::Error, Some("inference worker panicked".into()));
    }

    if *ctx.status.lock() != EngineStatus::Error {
        set_status(&ctx, EngineStatus::Stopped, None);
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        chunks_read = snap.chunks_read,
        samples_in = snap.samples_in,
        windows_emitted = snap.windows_emitted,
        windows_skipped = snap.windows_skipped,
        inference_calls = snap.inference_calls,
        inference_errors = snap.inference_errors,
        detections_fired = snap.detections_fired,
        "pipeline stopped — diagnostics"
    );
}

/// Spawn the per-session inference worker.
///
/// The worker owns the smoother and the session epoch, drains the job
/// channel in FIFO order, and emits the terminal `EndOfStream` exactly once
/// on exit — whether it exits via the final job, a fail-fast error, or the
/// channel disconnecting on cancellation.
fn spawn_inference_worker(
    ctx: &PipelineContext,
    job_rx: Receiver<InferenceJob>,
) -> std::thread::JoinHandle<()> {
    let config = ctx.config.clone();
    let classifier = ctx.classifier.clone();
    let running = Arc::clone(&ctx.running);
    let event_tx = ctx.event_tx.clone();
    let diagnostics = Arc::clone(&ctx.diagnostics);

    std::thread::Builder::new()
        .name("harken-infer".into())
        .spawn(move || {
            let epoch = Instant::now();
            let mut smoother = (!config.output_raw_scores).then(|| {
                DetectionSmoother::new(config.labels.clone(), config.smoothing.clone())
            });

            while let Ok(job) = job_rx.recv() {
                let fatal = process_job(
                    &job,
                    &config,
                    &classifier,
                    smoother.as_mut(),
                    epoch,
                    &event_tx,
                    &diagnostics,
                );
                if fatal || job.is_final {
                    running.store(false, Ordering::SeqCst);
                    break;
                }
            }

            let _ = event_tx.send(RecognitionEvent::EndOfStream);
            info!("end of stream");
        })
        .expect("failed to spawn inference worker thread")
}

/// Classify + smooth one window and broadcast the result.
///
/// Returns `true` when the session must stop (fail-fast error policy).
fn process_job(
    job: &InferenceJob,
    config: &EngineConfig,
    classifier: &ClassifierHandle,
    smoother: Option<&mut DetectionSmoother>,
    epoch: Instant,
    event_tx: &broadcast::Sender<RecognitionEvent>,
    diagnostics: &PipelineDiagnostics,
) -> bool {
    diagnostics.inference_calls.fetch_add(1, Ordering::Relaxed);

    let samples = classify::normalize(&job.window);
    let input = ClassifierInput {
        samples: &samples,
        sample_rate: config.sample_rate,
        layout: config.input_layout,
    };

    let started = Instant::now();
    let inferred = classifier.0.lock().infer(&input);
    let inference_time_ms = started.elapsed().as_millis() as u64;

    let outcome: Result<RecognitionOutcome, HarkenError> = match inferred {
        Err(e) => Err(e),
        Ok(scores) => match smoother {
            None => Ok(RecognitionOutcome::RawScores { scores }),
            Some(sm) => sm.process(&scores, epoch.elapsed()).map(|detection| {
                if detection.label.is_some() {
                    diagnostics.detections_fired.fetch_add(1, Ordering::Relaxed);
                }
                RecognitionOutcome::Detection(detection)
            }),
        },
    };

    match outcome {
        Ok(outcome) => {
            let _ = event_tx.send(RecognitionEvent::Result {
                seq: job.seq,
                outcome,
                inference_time_ms,
            });
            false
        }
        Err(e) => {
            diagnostics.inference_errors.fetch_add(1, Ordering::Relaxed);
            error!(seq = job.seq, "inference failed: {e}");
            let _ = event_tx.send(RecognitionEvent::InferenceError {
                seq: job.seq,
                message: e.to_string(),
            });
            config.fail_fast
        }
    }
}

fn set_status(ctx: &PipelineContext, new_status: EngineStatus, detail: Option<String>) {
    *ctx.status.lock() = new_status;
    let _ = ctx.status_tx.send(EngineStatusEvent {
        status: new_status,
        detail,
    });
}
