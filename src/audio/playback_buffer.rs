//! FIFO of decoded PCM buffers waiting for the playback device.
//!
//! The inbound message handler pushes, the playback thread pops. The queue
//! is unbounded; a sustained arrival rate above the device rate grows it.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct PlaybackBuffer {
    queue: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
}

impl PlaybackBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        // A panicking holder cannot leave the deque half-updated.
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one buffer and wake a waiting consumer.
    pub fn push(&self, pcm: Vec<u8>) {
        self.lock().push_back(pcm);
        self.ready.notify_one();
    }

    /// Pop the oldest buffer without waiting.
    pub fn try_pop(&self) -> Option<Vec<u8>> {
        self.lock().pop_front()
    }

    /// Pop the oldest buffer, waiting at most `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.lock();
        loop {
            if let Some(pcm) = queue.pop_front() {
                return Some(pcm);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            queue = match self.ready.wait_timeout(queue, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
    }

    /// Drop everything that is still queued.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
