//! Audio device contracts.
//!
//! The core consumes and produces blocks of signed 16-bit PCM through
//! these traits; concrete sound-card, UDP and stdin bindings live in the
//! device layer. A stereo device carries two radio channels with the
//! left channel first in each interleaved pair.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::errors::DeviceError;

/// A block of interleaved samples as read from a device.
pub type SampleBlock = Vec<i16>;

/// Source of received audio. `read` blocks until samples are available
/// and returns `DeviceError::EndOfStream` when the device is gone.
pub trait SampleSource: Send {
    fn read(&mut self) -> Result<SampleBlock, DeviceError>;
}

/// Sink for transmitted audio. `write` blocks until the device has
/// accepted the block.
pub trait SampleSink: Send {
    fn write(&mut self, samples: &[i16]) -> Result<(), DeviceError>;
}

/// Split an interleaved block into per-channel streams.
pub fn deinterleave(block: &[i16], channels: usize, out: &mut [Vec<i16>]) {
    debug_assert!(channels >= 1 && out.len() >= channels);
    if channels == 1 {
        out[0].extend_from_slice(block);
        return;
    }
    for frame in block.chunks_exact(channels) {
        for (chan, &sample) in frame.iter().enumerate() {
            out[chan].push(sample);
        }
    }
}

#[derive(Default)]
struct LoopbackShared {
    data: VecDeque<i16>,
    closed: bool,
}

/// An in-memory audio pipe: whatever is written to the sink side comes
/// out of the source side. Used by the integration tests to connect a
/// transmitter to a receiver.
#[derive(Clone, Default)]
pub struct LoopbackDevice {
    shared: Arc<(Mutex<LoopbackShared>, Condvar)>,
    block_size: usize,
}

impl LoopbackDevice {
    pub fn new(block_size: usize) -> Self {
        Self {
            shared: Arc::default(),
            block_size: block_size.max(1),
        }
    }

    /// Close the pipe; readers drain what is left, then get end-of-stream.
    pub fn close(&self) {
        let (lock, cond) = &*self.shared;
        lock.lock().expect("loopback poisoned").closed = true;
        cond.notify_all();
    }
}

impl SampleSource for LoopbackDevice {
    fn read(&mut self) -> Result<SampleBlock, DeviceError> {
        let (lock, cond) = &*self.shared;
        let mut shared = lock.lock().expect("loopback poisoned");
        loop {
            if !shared.data.is_empty() {
                let n = self.block_size.min(shared.data.len());
                return Ok(shared.data.drain(..n).collect());
            }
            if shared.closed {
                return Err(DeviceError::EndOfStream);
            }
            shared = cond.wait(shared).expect("loopback poisoned");
        }
    }
}

impl SampleSink for LoopbackDevice {
    fn write(&mut self, samples: &[i16]) -> Result<(), DeviceError> {
        let (lock, cond) = &*self.shared;
        let mut shared = lock.lock().expect("loopback poisoned");
        if shared.closed {
            return Err(DeviceError::Failed {
                reason: "loopback closed".to_string(),
            });
        }
        shared.data.extend(samples.iter().copied());
        cond.notify_all();
        Ok(())
    }
}
