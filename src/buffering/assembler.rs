//! Windowing/splicing state machine.
//!
//! Turns an unbounded stream of small capture reads into a bounded sequence of
//! exactly `num_of_inferences` windows of `audio_length` samples each, with no
//! sample loss or duplication across window boundaries. A chunk that overflows
//! the current window is split: the head fills the window exactly, the tail
//! carries over as the start of the next window. Only the tail of the very
//! last window of a session is discarded.
//!
//! ## State space
//!
//! Each feed is classified by two comparisons — `inference_count` against
//! `num_of_inferences` and `write_offset + chunk.len()` against
//! `audio_length` — into one of five reachable states. Any other combination
//! means the bookkeeping is corrupt and the session must abort rather than
//! continue with bad offsets.

use tracing::{debug, trace};

use crate::error::{HarkenError, Result};

/// What a single `feed` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    /// Chunk absorbed; the in-progress window is still filling.
    None,
    /// A completed window. More windows will follow.
    Window(Vec<i16>),
    /// The last window of the session. The assembler is finished until `reset`.
    FinalWindow(Vec<i16>),
}

/// Internal classification of one feed. Mirrors the five reachable states of
/// the splice bookkeeping; `classify` errors instead of returning a sixth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpliceState {
    Appending,
    Recognising,
    Finalising,
    TrimmingRecognising,
    TrimmingFinalising,
}

/// Fixed-capacity window assembler.
///
/// Owns the in-progress window buffer. Emitted windows are owned snapshots;
/// the internal buffer is reused across windows (and across sessions via
/// [`WindowAssembler::reset`]) without reallocating.
#[derive(Debug)]
pub struct WindowAssembler {
    /// In-progress window. `buf.len()` is the write offset.
    buf: Vec<i16>,
    /// Required window length in samples (the model's input length).
    audio_length: usize,
    /// Total windows to emit before the session ends.
    num_of_inferences: usize,
    /// 1-based count of the window currently being filled.
    inference_count: usize,
    /// Set after the final window; further feeds are an invariant violation.
    finished: bool,
}

impl WindowAssembler {
    /// Create an assembler for `num_of_inferences` windows of `audio_length`
    /// samples. Both must be non-zero (validated by `EngineConfig`; asserted
    /// here for direct users).
    pub fn new(audio_length: usize, num_of_inferences: usize) -> Self {
        assert!(audio_length > 0, "audio_length must be non-zero");
        assert!(num_of_inferences > 0, "num_of_inferences must be non-zero");
        Self {
            buf: Vec::with_capacity(audio_length),
            audio_length,
            num_of_inferences,
            inference_count: 1,
            finished: false,
        }
    }

    /// Current write offset into the in-progress window.
    pub fn write_offset(&self) -> usize {
        self.buf.len()
    }

    /// 1-based index of the window currently being assembled.
    pub fn inference_count(&self) -> usize {
        self.inference_count
    }

    /// Whether the final window has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one chunk of samples read from the capture device.
    ///
    /// # Errors
    /// `HarkenError::InternalConsistency` if the bookkeeping reaches a state
    /// outside the five reachable ones (including feeding after the final
    /// window without a `reset`). The session must not continue past this.
    pub fn feed(&mut self, chunk: &[i16]) -> Result<Emission> {
        let read_count = self.buf.len() + chunk.len();

        match self.classify(read_count)? {
            SpliceState::Appending => {
                self.buf.extend_from_slice(chunk);
                trace!(
                    write_offset = self.buf.len(),
                    audio_length = self.audio_length,
                    inference_count = self.inference_count,
                    "appending"
                );
                Ok(Emission::None)
            }

            SpliceState::Recognising => {
                self.buf.extend_from_slice(chunk);
                let window = self.take_window();
                self.inference_count += 1;
                debug!(
                    inference_count = self.inference_count,
                    num_of_inferences = self.num_of_inferences,
                    "window complete"
                );
                Ok(Emission::Window(window))
            }

            SpliceState::Finalising => {
                self.buf.extend_from_slice(chunk);
                let window = self.take_window();
                self.finished = true;
                debug!("final window complete");
                Ok(Emission::FinalWindow(window))
            }

            SpliceState::TrimmingRecognising => {
                let remaining = self.audio_length - self.buf.len();
                let (head, tail) = chunk.split_at(remaining);
                self.buf.extend_from_slice(head);
                let window = self.take_window();
                // Excess carries over as the start of the next window.
                self.buf.extend_from_slice(tail);
                self.inference_count += 1;
                debug!(
                    trimmed = head.len(),
                    carried_over = tail.len(),
                    inference_count = self.inference_count,
                    "window complete with carry-over"
                );
                Ok(Emission::Window(window))
            }

            SpliceState::TrimmingFinalising => {
                let remaining = self.audio_length - self.buf.len();
                let (head, tail) = chunk.split_at(remaining);
                self.buf.extend_from_slice(head);
                let window = self.take_window();
                self.finished = true;
                debug!(discarded = tail.len(), "final window complete, tail discarded");
                Ok(Emission::FinalWindow(window))
            }
        }
    }

    /// Reinitialize for a new session. Keeps the window buffer's allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.inference_count = 1;
        self.finished = false;
    }

    /// Two three-way comparisons pick exactly one reachable state.
    fn classify(&self, read_count: usize) -> Result<SpliceState> {
        let last = self.inference_count == self.num_of_inferences;
        let within = self.inference_count < self.num_of_inferences;

        if !self.finished {
            if (within || last) && read_count < self.audio_length {
                return Ok(SpliceState::Appending);
            }
            if within && read_count == self.audio_length {
                return Ok(SpliceState::Recognising);
            }
            if last && read_count == self.audio_length {
                return Ok(SpliceState::Finalising);
            }
            if within && read_count > self.audio_length {
                return Ok(SpliceState::TrimmingRecognising);
            }
            if last && read_count > self.audio_length {
                return Ok(SpliceState::TrimmingFinalising);
            }
        }

        Err(HarkenError::InternalConsistency {
            inference_count: self.inference_count,
            num_of_inferences: self.num_of_inferences,
            read_count,
            audio_length: self.audio_length,
        })
    }

    /// Snapshot the full window and clear the in-progress buffer in place.
    fn take_window(&mut self) -> Vec<i16> {
        debug_assert_eq!(self.buf.len(), self.audio_length);
        let window = self.buf.clone();
        self.buf.clear();
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `chunks` and collect every emitted window, panicking on errors.
    fn feed_all(assembler: &mut WindowAssembler, chunks: &[Vec<i16>]) -> Vec<(Vec<i16>, bool)> {
        let mut out = Vec::new();
        for chunk in chunks {
            match assembler.feed(chunk).expect("feed failed") {
                Emission::None => {}
                Emission::Window(w) => out.push((w, false)),
                Emission::FinalWindow(w) => out.push((w, true)),
            }
        }
        out
    }

    /// Sequential samples so splices are easy to verify positionally.
    fn ramp(start: i16, len: usize) -> Vec<i16> {
        (0..len as i16).map(|i| start.wrapping_add(i)).collect()
    }

    #[test]
    fn exact_multiple_chunks_emit_lossless_windows() {
        // 3 windows of 100, chunks of 20: 15 chunks total, no trimming ever.
        let mut asm = WindowAssembler::new(100, 3);
        let chunks: Vec<Vec<i16>> = (0..15).map(|i| ramp(i * 20, 20)).collect();
        let input: Vec<i16> = chunks.iter().flatten().copied().collect();

        let windows = feed_all(&mut asm, &chunks);
        assert_eq!(windows.len(), 3);
        assert!(windows.iter().all(|(w, _)| w.len() == 100));
        assert!(!windows[0].1);
        assert!(!windows[1].1);
        assert!(windows[2].1, "last window must be marked final");

        let concat: Vec<i16> = windows.iter().flat_map(|(w, _)| w.clone()).collect();
        assert_eq!(concat, input, "no loss, no duplication, order preserved");
    }

    #[test]
    fn mid_chunk_boundary_splits_200_824() {
        // Window of 16000, chunk of 1024 arriving at offset 15800: the window
        // finishes with the chunk's first 200 samples, the next window starts
        // with its remaining 824.
        let mut asm = WindowAssembler::new(16_000, 2);
        asm.feed(&vec![0i16; 15_800]).unwrap();
        assert_eq!(asm.write_offset(), 15_800);

        let chunk = ramp(1, 1024);
        let emission = asm.feed(&chunk).unwrap();
        let Emission::Window(w) = emission else {
            panic!("expected a completed window, got {emission:?}");
        };
        assert_eq!(w.len(), 16_000);
        assert_eq!(&w[15_800..], &chunk[..200]);
        assert_eq!(asm.write_offset(), 824);
        assert_eq!(asm.inference_count(), 2);
    }

    #[test]
    fn sixteen_k_session_first_window_on_sixteenth_chunk() {
        // audio_length=16000, num_of_inferences=2, chunks of 1024.
        // 15 chunks fill 15360; the 16th overflows (16384 > 16000) and is
        // split 640/384 between window 1's tail and window 2's head.
        let mut asm = WindowAssembler::new(16_000, 2);
        let mut emitted_at = None;
        let mut first_window = None;

        for n in 1..=16 {
            let chunk = ramp((n % 64) as i16, 1024);
            match asm.feed(&chunk).unwrap() {
                Emission::None => {}
                Emission::Window(w) => {
                    emitted_at = Some(n);
                    first_window = Some((w, chunk));
                    break;
                }
                Emission::FinalWindow(_) => panic!("final window far too early"),
            }
        }

        assert_eq!(emitted_at, Some(16));
        let (w, chunk16) = first_window.unwrap();
        assert_eq!(&w[15_360..], &chunk16[..640]);
        assert_eq!(asm.write_offset(), 384);
    }

    #[test]
    fn carry_over_samples_are_not_lost_or_duplicated() {
        // Chunks of 7 into windows of 10: constant trimming. Total fed must
        // equal the concatenation of all windows up to the session cutoff.
        let mut asm = WindowAssembler::new(10, 4);
        let mut fed: Vec<i16> = Vec::new();
        let mut emitted: Vec<i16> = Vec::new();
        let mut next = 0i16;

        'outer: loop {
            let chunk = ramp(next, 7);
            next = next.wrapping_add(7);
            fed.extend_from_slice(&chunk);
            match asm.feed(&chunk).unwrap() {
                Emission::None => {}
                Emission::Window(w) => emitted.extend_from_slice(&w),
                Emission::FinalWindow(w) => {
                    emitted.extend_from_slice(&w);
                    break 'outer;
                }
            }
        }

        assert_eq!(emitted.len(), 40);
        assert_eq!(&fed[..40], &emitted[..], "windows are a prefix of the input");
        assert!(asm.is_finished());
    }

    #[test]
    fn final_window_tail_is_discarded() {
        let mut asm = WindowAssembler::new(10, 1);
        let emission = asm.feed(&ramp(0, 14)).unwrap();
        let Emission::FinalWindow(w) = emission else {
            panic!("expected final window");
        };
        assert_eq!(w, ramp(0, 10));
        assert!(asm.is_finished());
        // The 4-sample excess is gone: a reset starts from an empty buffer.
        asm.reset();
        assert_eq!(asm.write_offset(), 0);
        assert_eq!(asm.inference_count(), 1);
    }

    #[test]
    fn single_window_exact_fill_is_final() {
        let mut asm = WindowAssembler::new(8, 1);
        assert_eq!(asm.feed(&[1, 2, 3, 4]).unwrap(), Emission::None);
        let emission = asm.feed(&[5, 6, 7, 8]).unwrap();
        assert_eq!(emission, Emission::FinalWindow(vec![1, 2, 3, 4, 5, 6, 7, 8]));
    }

    #[test]
    fn feeding_a_finished_assembler_is_an_internal_consistency_error() {
        let mut asm = WindowAssembler::new(4, 1);
        asm.feed(&[1, 2, 3, 4]).unwrap();
        let err = asm.feed(&[5]).unwrap_err();
        assert!(matches!(err, HarkenError::InternalConsistency { .. }));
    }

    #[test]
    fn reset_allows_a_fresh_session_without_reallocating() {
        let mut asm = WindowAssembler::new(4, 2);
        asm.feed(&[1, 2, 3, 4]).unwrap();
        asm.feed(&[5, 6, 7, 8]).unwrap();
        assert!(asm.is_finished());

        asm.reset();
        assert!(!asm.is_finished());
        let windows = feed_all(&mut asm, &[vec![9, 10], vec![11, 12], vec![13, 14, 15, 16]]);
        assert_eq!(
            windows,
            vec![(vec![9, 10, 11, 12], false), (vec![13, 14, 15, 16], true)]
        );
    }

    #[test]
    fn empty_chunk_is_absorbed_without_state_change() {
        let mut asm = WindowAssembler::new(4, 1);
        asm.feed(&[1, 2]).unwrap();
        assert_eq!(asm.feed(&[]).unwrap(), Emission::None);
        assert_eq!(asm.write_offset(), 2);
    }
}
