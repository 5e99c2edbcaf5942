//! Lock-free SPSC ring buffer for captured samples.
//!
//! Uses `ringbuf::HeapRb<i16>` which provides a wait-free `push_slice`
//! safe to call from the real-time audio callback.

pub mod assembler;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Type alias for the producer half — held by the audio callback thread.
pub type SampleProducer = ringbuf::HeapProd<i16>;

/// Type alias for the consumer half — held by the capture thread.
pub type SampleConsumer = ringbuf::HeapCons<i16>;

/// Buffer capacity: 2^20 = 1 048 576 i16 samples ≈ 65.5 s at 16 kHz.
/// Protects long sessions from callback drops while inference runs.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
///
/// # Panics
/// Never panics — `HeapRb` construction cannot fail for reasonable capacities.
pub fn create_sample_ring() -> (SampleProducer, SampleConsumer) {
    HeapRb::<i16>::new(RING_CAPACITY).split()
}
