// Bounded drop-oldest frame queue shared by producers and the detection worker

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::frame::Frame;

/// What happened to an offered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Dropped by the input skip factor.
    Skipped,
    Accepted,
    /// Accepted after evicting the oldest queued frame.
    AcceptedWithEviction,
}

struct QueueState {
    frames: VecDeque<Frame>,
    /// Frames offered since creation, used for skip decimation.
    offered: u64,
}

/// Producers never block: a full queue evicts its oldest frame.
/// The lock covers only the push/pop itself.
pub struct FrameQueue {
    state: Mutex<QueueState>,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                offered: 0,
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Accept one frame, then skip `skip_frames`, repeating.
    pub fn offer(&self, frame: Frame, skip_frames: u32) -> OfferOutcome {
        let mut state = self.lock();
        state.offered += 1;
        if state.offered % (skip_frames as u64 + 1) != 0 {
            return OfferOutcome::Skipped;
        }

        let evicted = if state.frames.len() >= self.capacity {
            state.frames.pop_front();
            true
        } else {
            false
        };
        state.frames.push_back(frame);

        if evicted {
            OfferOutcome::AcceptedWithEviction
        } else {
            OfferOutcome::Accepted
        }
    }

    pub fn pop(&self) -> Option<Frame> {
        self.lock().frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all queued frames, returning how many there were.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let n = state.frames.len();
        state.frames.clear();
        n
    }
}
