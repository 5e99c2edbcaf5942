//! Audio capture via cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory (beyond a reused scratch buffer)
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! This module satisfies that contract by writing 16-bit mono samples directly
//! into an SPSC ring buffer producer whose `push_slice` is lock-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioCapture` therefore must be created and dropped on the same
//! thread. The engine accomplishes this by opening it inside `spawn_blocking`.

pub mod source;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use crate::{
    buffering::{Producer, SampleProducer},
    error::{HarkenError, Result},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{error, info, warn};

/// Handle to an active audio capture stream.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the same OS thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Shared flag — set to `false` to signal the callback to no-op.
    running: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32_767.0) as i16
}

impl AudioCapture {
    /// Open the system default microphone at `requested_rate` and push 16-bit
    /// mono samples into `producer`.
    ///
    /// Must be called from the thread that will also drop this value. In
    /// practice this means calling it inside `tokio::task::spawn_blocking`.
    ///
    /// # Errors
    /// Returns `HarkenError::DeviceUnavailable` when no microphone is
    /// available or the device rejects the configuration, or
    /// `HarkenError::AudioStream` if cpal fails to build the stream.
    #[cfg(feature = "audio-cpal")]
    pub fn open_default(
        mut producer: SampleProducer,
        running: Arc<AtomicBool>,
        requested_rate: u32,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| HarkenError::DeviceUnavailable("no default input device".into()))?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| HarkenError::DeviceUnavailable(e.to_string()))?;

        let channels = supported.channels();
        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(requested_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(requested_rate, channels, "audio config selected");

        let running_f32 = Arc::clone(&running);
        let running_i16 = Arc::clone(&running);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let ch = channels as usize;
                let mut mix_buf: Vec<i16> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running_f32.load(Ordering::Relaxed) {
                            return;
                        }
                        let frames = data.len() / ch;
                        mix_buf.resize(frames, 0);
                        for f in 0..frames {
                            let base = f * ch;
                            let mut sum = 0f32;
                            for c in 0..ch {
                                sum += data[base + c];
                            }
                            mix_buf[f] = f32_to_i16(sum / ch as f32);
                        }
                        let written = producer.push_slice(&mix_buf);
                        if written < mix_buf.len() {
                            warn!(
                                "ring buffer full: dropped {} frames",
                                mix_buf.len() - written
                            );
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            SampleFormat::I16 => {
                let ch = channels as usize;
                let mut mix_buf: Vec<i16> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running_i16.load(Ordering::Relaxed) {
                            return;
                        }
                        if ch == 1 {
                            let written = producer.push_slice(data);
                            if written < data.len() {
                                warn!("ring buffer full: dropped {} frames", data.len() - written);
                            }
                            return;
                        }
                        let frames = data.len() / ch;
                        mix_buf.resize(frames, 0);
                        for f in 0..frames {
                            let base = f * ch;
                            let mut sum = 0i32;
                            for c in 0..ch {
                                sum += data[base + c] as i32;
                            }
                            mix_buf[f] = (sum / ch as i32) as i16;
                        }
                        let written = producer.push_slice(&mix_buf);
                        if written < mix_buf.len() {
                            warn!(
                                "ring buffer full: dropped {} frames",
                                mix_buf.len() - written
                            );
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(HarkenError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| HarkenError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| HarkenError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate: requested_rate,
        })
    }

    /// Stop: signal the callback to no-op on its next invocation.
    #[cfg(feature = "audio-cpal")]
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_default(
        _producer: SampleProducer,
        _running: Arc<AtomicBool>,
        _requested_rate: u32,
    ) -> Result<Self> {
        Err(HarkenError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}
