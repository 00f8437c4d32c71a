//! IMU batching.

use crate::capture::motion::MotionSample;
use crate::core::clock::epoch_millis;
use crate::network::protocol::ClientMessage;

/// Groups motion samples into `imu_batch` messages, preserving order.
#[derive(Debug)]
pub struct ImuBatcher {
    capacity: usize,
    samples: Vec<MotionSample>,
}

impl ImuBatcher {
    /// Batch `capacity` samples per message.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Add a sample. Returns a message once the batch is full.
    pub fn push(&mut self, sample: MotionSample) -> Option<ClientMessage> {
        self.samples.push(sample);
        if self.samples.len() >= self.capacity {
            self.flush()
        } else {
            None
        }
    }

    /// Emit whatever is buffered.
    pub fn flush(&mut self) -> Option<ClientMessage> {
        if self.samples.is_empty() {
            return None;
        }
        let payload = std::mem::replace(&mut self.samples, Vec::with_capacity(self.capacity));
        Some(ClientMessage::ImuBatch {
            payload,
            timestamp: epoch_millis(),
        })
    }

    /// Samples waiting for the next batch.
    pub fn pending(&self) -> usize {
        self.samples.len()
    }
}
