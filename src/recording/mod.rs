// Recording state machine
//
// Idle -> PreRecord -> Recording -> PostRecord -> Cooldown -> Idle
//
// The machine is pure: callers pass the monotonic `now` (and the matching wall
// clock for filenames) into `handle` and `tick`. A single deadline stands in for
// every timer; re-arming is an explicit assignment in the transition code.

pub mod controller;


use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RecordingTimings;
use crate::constants::{
    RECORD_FILE_EXTENSION, RECORD_FILE_TIME_FORMAT, RECORD_PREFIX_DETECTION, RECORD_PREFIX_MANUAL,
};
use crate::events::TriggerKind;

pub use controller::RecordingController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordingState {
    Idle,
    PreRecord,
    Recording,
    PostRecord,
    Cooldown,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::Idle => "idle",
            RecordingState::PreRecord => "pre_record",
            RecordingState::Recording => "recording",
            RecordingState::PostRecord => "post_record",
            RecordingState::Cooldown => "cooldown",
        }
    }

    /// True while a clip is open.
    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingState::Recording | RecordingState::PostRecord)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingInput {
    /// Motion or face trigger from the detection side.
    Detection(TriggerKind),
    Manual,
    Stop,
}

/// What the machine asks the outside world to do or know.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingEvent {
    StateChanged { from: RecordingState, to: RecordingState },
    Started { filename: String, session_id: Uuid },
    Stopped { filename: String, duration_ms: u64 },
}

/// The clip currently being written.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSession {
    pub id: Uuid,
    pub filename: String,
    pub trigger: TriggerKind,
    pub started_at: Instant,
    pub started_wall: DateTime<Utc>,
}

impl RecordingSession {
    pub fn duration(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}

/// `<prefix>_yyyyMMdd_HHmmss.mp4`
pub fn session_filename(trigger: TriggerKind, wall: DateTime<Utc>) -> String {
    let prefix = match trigger {
        TriggerKind::Manual => RECORD_PREFIX_MANUAL,
        _ => RECORD_PREFIX_DETECTION,
    };
    format!(
        "{}_{}.{}",
        prefix,
        wall.format(RECORD_FILE_TIME_FORMAT),
        RECORD_FILE_EXTENSION
    )
}

pub struct RecordingStateMachine {
    state: RecordingState,
    timings: RecordingTimings,
    deadline: Option<Instant>,
    session: Option<RecordingSession>,
    /// Trigger that opened the current PreRecord window.
    pending_trigger: Option<TriggerKind>,
}

impl RecordingStateMachine {
    pub fn new(timings: RecordingTimings) -> Self {
        Self {
            state: RecordingState::Idle,
            timings,
            deadline: None,
            session: None,
            pending_trigger: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn timings(&self) -> &RecordingTimings {
        &self.timings
    }

    /// New timings apply from the next time a timer is armed.
    pub fn set_timings(&mut self, timings: RecordingTimings) {
        self.timings = timings;
    }

    pub fn handle(&mut self, input: RecordingInput, now: Instant, wall: DateTime<Utc>) -> Vec<RecordingEvent> {
        let mut events = Vec::new();
        match input {
            RecordingInput::Detection(kind) => self.on_detection(kind, now, &mut events),
            RecordingInput::Manual => self.on_manual(now, wall, &mut events),
            RecordingInput::Stop => self.on_stop(now, &mut events),
        }
        events
    }

    /// Fire every timer that is due at `now`, in order.
    /// Each expiry is evaluated at its own deadline, not at `now`.
    pub fn tick(&mut self, now: Instant, wall: DateTime<Utc>) -> Vec<RecordingEvent> {
        let mut events = Vec::new();
        while let Some(due) = self.deadline {
            if due > now {
                break;
            }
            let due_wall = wall_at(due, now, wall);
            self.on_deadline(due, due_wall, &mut events);
        }
        events
    }

    fn on_detection(&mut self, kind: TriggerKind, now: Instant, events: &mut Vec<RecordingEvent>) {
        if !self.timings.enabled {
            log::debug!("Recording disabled, ignoring {} trigger", kind.as_str());
            return;
        }

        match self.state {
            RecordingState::Idle => {
                self.pending_trigger = Some(kind);
                self.deadline = Some(now + self.timings.pre_record_delay());
                self.transition(RecordingState::PreRecord, events);
            }
            RecordingState::PreRecord => {
                // Debounce: the pre-roll restarts on every trigger
                self.deadline = Some(now + self.timings.pre_record_delay());
            }
            RecordingState::Recording => {
                self.deadline = Some(self.capped(now + self.timings.post_record_delay()));
            }
            RecordingState::PostRecord => {
                log::debug!("Activity resumed ({}), back to recording", kind.as_str());
                self.deadline = Some(self.capped(now + self.timings.post_record_delay()));
                self.transition(RecordingState::Recording, events);
            }
            RecordingState::Cooldown => {
                log::debug!("In cooldown, ignoring {} trigger", kind.as_str());
            }
        }
    }

    fn on_manual(&mut self, now: Instant, wall: DateTime<Utc>, events: &mut Vec<RecordingEvent>) {
        match self.state {
            RecordingState::Idle | RecordingState::PreRecord | RecordingState::Cooldown => {
                log::info!("Manual recording requested");
                self.pending_trigger = None;
                self.begin_session(TriggerKind::Manual, now, wall, events);
                self.deadline = Some(self.capped(now + self.timings.min_record_duration()));
            }
            RecordingState::Recording | RecordingState::PostRecord => {
                log::info!("Manual recording requested while already recording, ignoring");
            }
        }
    }

    fn on_stop(&mut self, now: Instant, events: &mut Vec<RecordingEvent>) {
        match self.state {
            RecordingState::Recording | RecordingState::PostRecord => {
                log::info!("Recording stopped by request");
                self.end_session(now, events);
                self.deadline = None;
                self.transition(RecordingState::Idle, events);
            }
            RecordingState::PreRecord => {
                log::info!("Stop requested during pre-roll, cancelling");
                self.pending_trigger = None;
                self.deadline = None;
                self.transition(RecordingState::Idle, events);
            }
            RecordingState::Idle | RecordingState::Cooldown => {
                log::debug!("Stop requested while not recording, ignoring");
            }
        }
    }

    fn on_deadline(&mut self, due: Instant, due_wall: DateTime<Utc>, events: &mut Vec<RecordingEvent>) {
        match self.state {
            RecordingState::Idle => {
                self.deadline = None;
            }
            RecordingState::PreRecord => {
                let trigger = self.pending_trigger.take().unwrap_or(TriggerKind::Motion);
                self.begin_session(trigger, due, due_wall, events);
                self.deadline = Some(self.capped(due + self.timings.post_record_delay()));
            }
            RecordingState::Recording | RecordingState::PostRecord => {
                let elapsed = self
                    .session
                    .as_ref()
                    .map(|s| s.duration(due))
                    .unwrap_or_default();

                if elapsed >= self.timings.min_record_duration() || elapsed >= self.timings.max_record_duration() {
                    if elapsed >= self.timings.max_record_duration() {
                        log::info!("Maximum recording duration reached");
                    }
                    self.end_session(due, events);
                    self.deadline = Some(due + self.timings.cooldown_period());
                    self.transition(RecordingState::Cooldown, events);
                } else {
                    // Minimum not reached yet: keep the clip open and check again
                    self.deadline = Some(self.capped(due + self.timings.recheck_interval()));
                    if self.state == RecordingState::Recording {
                        self.transition(RecordingState::PostRecord, events);
                    }
                }
            }
            RecordingState::Cooldown => {
                self.deadline = None;
                self.transition(RecordingState::Idle, events);
            }
        }
    }

    fn begin_session(&mut self, trigger: TriggerKind, at: Instant, wall: DateTime<Utc>, events: &mut Vec<RecordingEvent>) {
        let session = RecordingSession {
            id: Uuid::new_v4(),
            filename: session_filename(trigger, wall),
            trigger,
            started_at: at,
            started_wall: wall,
        };
        log::info!("Recording started: {} (trigger {})", session.filename, trigger.as_str());

        self.transition(RecordingState::Recording, events);
        events.push(RecordingEvent::Started {
            filename: session.filename.clone(),
            session_id: session.id,
        });
        self.session = Some(session);
    }

    fn end_session(&mut self, at: Instant, events: &mut Vec<RecordingEvent>) {
        let Some(session) = self.session.take() else {
            log::warn!("Recording stop without an open session");
            return;
        };
        let duration_ms = session.duration(at).as_millis() as u64;
        log::info!("Recording stopped: {} ({} ms)", session.filename, duration_ms);
        events.push(RecordingEvent::Stopped {
            filename: session.filename,
            duration_ms,
        });
    }

    /// Clamp a deadline to the session's maximum length.
    fn capped(&self, deadline: Instant) -> Instant {
        match &self.session {
            Some(s) => deadline.min(s.started_at + self.timings.max_record_duration()),
            None => deadline,
        }
    }

    fn transition(&mut self, to: RecordingState, events: &mut Vec<RecordingEvent>) {
        let from = self.state;
        if from == to {
            return;
        }
        log::debug!("Recording state {} -> {}", from.as_str(), to.as_str());
        self.state = to;
        events.push(RecordingEvent::StateChanged { from, to });
    }
}

/// Wall-clock time corresponding to the monotonic instant `at`, given that `now` is `wall`.
fn wall_at(at: Instant, now: Instant, wall: DateTime<Utc>) -> DateTime<Utc> {
    let behind = now.saturating_duration_since(at);
    match chrono::Duration::from_std(behind) {
        Ok(d) => wall - d,
        Err(_) => wall,
    }
}
