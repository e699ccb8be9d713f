// Adaptive duty cycle for face work

use crate::constants::{FACE_INTERVAL_WITHOUT_MOTION, FACE_INTERVAL_WITH_MOTION};

/// Decides which eligible cycles run face detection.
///
/// Every call counts as one eligible cycle. Face work runs on every 2nd cycle
/// when the previous cycle saw motion and on every 5th when it did not.
#[derive(Debug, Default)]
pub struct FaceGate {
    counter: u64,
}

impl FaceGate {
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    pub fn should_process(&mut self, last_cycle_had_motion: bool) -> bool {
        self.counter += 1;
        let interval = if last_cycle_had_motion {
            FACE_INTERVAL_WITH_MOTION
        } else {
            FACE_INTERVAL_WITHOUT_MOTION
        };
        self.counter % interval == 0
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }
}
