//! Blocking sample sources.
//!
//! `SampleSource` is the capture primitive the pipeline consumes: a blocking
//! "read the next chunk of 16-bit samples" call. Two implementations live
//! here — `RingSource` (live capture, backed by the SPSC ring the cpal
//! callback fills) and `FileSource` (a stored mono 16-bit WAV driven through
//! the same pipeline).

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tracing::debug;

use crate::buffering::{Consumer, SampleConsumer};
use crate::error::{HarkenError, Result};

/// Blocking read of 16-bit mono samples.
///
/// `read` fills as much of `buf` as it can and returns the count. `Ok(0)`
/// means the stream has ended (capture stopped, file exhausted); an `Err`
/// means the device failed. A blocked read must return promptly once the
/// session is stopped.
pub trait SampleSource: Send + 'static {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize>;
}

/// Poll interval while waiting for the ring to fill (avoids busy-wait).
const RING_POLL: Duration = Duration::from_millis(5);

/// Live source: drains the ring buffer the audio callback writes into.
///
/// Blocks until the requested chunk is complete; once the running flag drops,
/// returns whatever is already buffered (possibly `Ok(0)`).
pub struct RingSource {
    consumer: SampleConsumer,
    running: Arc<AtomicBool>,
}

impl RingSource {
    pub fn new(consumer: SampleConsumer, running: Arc<AtomicBool>) -> Self {
        Self { consumer, running }
    }
}

impl SampleSource for RingSource {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.consumer.pop_slice(&mut buf[filled..]);
            if filled == buf.len() {
                break;
            }
            if !self.running.load(Ordering::Relaxed) {
                // One final drain so no captured sample is stranded.
                filled += self.consumer.pop_slice(&mut buf[filled..]);
                break;
            }
            std::thread::sleep(RING_POLL);
        }
        Ok(filled)
    }
}

/// File source: decodes a mono 16-bit PCM WAV up front and serves it in
/// read-sized chunks, so a stored file exercises the same splicing path as
/// live capture.
pub struct FileSource {
    samples: Vec<i16>,
    pos: usize,
}

impl FileSource {
    /// Decode `path`, validating the format against the session sample rate.
    ///
    /// # Errors
    /// `HarkenError::AudioFile` on decode failure, non-mono channel layouts,
    /// non-16-bit sample formats, or a sample-rate mismatch (resampling is
    /// out of scope).
    pub fn open(path: &Path, expected_rate: u32) -> Result<Self> {
        let reader =
            hound::WavReader::open(path).map_err(|e| HarkenError::AudioFile(e.to_string()))?;
        let spec = reader.spec();

        if spec.channels != 1 {
            return Err(HarkenError::AudioFile(format!(
                "expected mono audio, got {} channels",
                spec.channels
            )));
        }
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            return Err(HarkenError::AudioFile(format!(
                "expected 16-bit integer PCM, got {}-bit {:?}",
                spec.bits_per_sample, spec.sample_format
            )));
        }
        if spec.sample_rate != expected_rate {
            return Err(HarkenError::AudioFile(format!(
                "sample rate mismatch: file is {} Hz, session expects {} Hz",
                spec.sample_rate, expected_rate
            )));
        }

        let samples = reader
            .into_samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| HarkenError::AudioFile(e.to_string()))?;

        debug!(samples = samples.len(), rate = expected_rate, "decoded wav");
        Ok(Self { samples, pos: 0 })
    }

    /// Wrap an already-decoded sample buffer (tests, synthetic input).
    pub fn from_samples(samples: Vec<i16>) -> Self {
        Self { samples, pos: 0 }
    }
}

impl SampleSource for FileSource {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize> {
        let available = self.samples.len() - self.pos;
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
