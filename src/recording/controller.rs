// Recording controller
// Owns the state machine, feeds it triggers and drives its timers from a tick thread.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;

use super::{RecordingEvent, RecordingInput, RecordingSession, RecordingState, RecordingStateMachine};
use crate::config::ConfigCell;
use crate::constants::RECORDING_TICK_MS;
use crate::error::Result;
use crate::events::{DetectionListener, ListenerSet, RecordTrigger, RecordingListener, TriggerKind};

struct Shared {
    machine: Mutex<RecordingStateMachine>,
    config: Arc<ConfigCell>,
    listeners: ListenerSet<dyn RecordingListener>,
    running: AtomicBool,
    /// Events not yet delivered, in the order the machine produced them.
    pending: Mutex<VecDeque<RecordingEvent>>,
    /// Held by whichever thread is currently delivering `pending`.
    dispatching: Mutex<()>,
}

impl Shared {
    fn machine(&self) -> MutexGuard<'_, RecordingStateMachine> {
        self.machine.lock().unwrap_or_else(|e| {
            log::warn!("Recording state lock was poisoned, recovering");
            e.into_inner()
        })
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<RecordingEvent>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run one step on the machine, then deliver its events.
    ///
    /// Events are queued while the machine lock is held, so listeners see
    /// them in machine order even when the timer thread and a trigger race.
    fn apply<F>(&self, step: F)
    where
        F: FnOnce(&mut RecordingStateMachine, Instant) -> Vec<RecordingEvent>,
    {
        let timings = self.config.snapshot().recording.clone();
        {
            let mut machine = self.machine();
            machine.set_timings(timings);
            let events = step(&mut *machine, Instant::now());
            if events.is_empty() {
                return;
            }
            self.pending().extend(events);
        }
        self.drain();
    }

    /// Deliver queued events. If another thread (or a listener further up
    /// this stack) is already delivering, it picks ours up instead.
    fn drain(&self) {
        loop {
            let guard = match self.dispatching.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(e)) => e.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };

            loop {
                let batch: Vec<RecordingEvent> = self.pending().drain(..).collect();
                if batch.is_empty() {
                    break;
                }
                self.dispatch(&batch);
            }

            drop(guard);
            // Events queued after the last batch but before the guard dropped
            if self.pending().is_empty() {
                return;
            }
        }
    }

    fn dispatch(&self, events: &[RecordingEvent]) {
        let listeners = self.listeners.snapshot();
        for event in events {
            for listener in &listeners {
                let delivered = catch_unwind(AssertUnwindSafe(|| match event {
                    RecordingEvent::StateChanged { from, to } => {
                        listener.on_recording_state_changed(*from, *to)
                    }
                    RecordingEvent::Started { filename, session_id } => {
                        listener.on_recording_started(filename, *session_id)
                    }
                    RecordingEvent::Stopped { filename, duration_ms } => {
                        listener.on_recording_stopped(filename, *duration_ms)
                    }
                }));
                if delivered.is_err() {
                    log::error!("Recording listener panicked (recovered)");
                }
            }
        }
    }
}

/// Thread-safe front of the recording state machine.
///
/// Register it as a `DetectionListener` so record triggers flow straight in.
/// Listener callbacks arrive in machine order, possibly on another caller's
/// thread when two threads step the machine at once.
pub struct RecordingController {
    shared: Arc<Shared>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl RecordingController {
    pub fn new(config: Arc<ConfigCell>) -> Self {
        let timings = config.snapshot().recording.clone();
        Self {
            shared: Arc::new(Shared {
                machine: Mutex::new(RecordingStateMachine::new(timings)),
                config,
                listeners: ListenerSet::new(),
                running: AtomicBool::new(false),
                pending: Mutex::new(VecDeque::new()),
                dispatching: Mutex::new(()),
            }),
            ticker: Mutex::new(None),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn RecordingListener>) {
        self.shared.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn RecordingListener>) -> bool {
        self.shared.listeners.remove(listener)
    }

    /// Start the timer thread. A no-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut ticker = self.ticker.lock().unwrap_or_else(|e| e.into_inner());
        if ticker.is_some() {
            return Ok(());
        }

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("recording-timer".into())
            .spawn(move || {
                let interval = Duration::from_millis(RECORDING_TICK_MS);
                while shared.running.load(Ordering::SeqCst) {
                    std::thread::sleep(interval);
                    shared.apply(|machine, now| machine.tick(now, Utc::now()));
                }
            });

        match handle {
            Ok(handle) => {
                *ticker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                log::error!("Failed to spawn recording timer: {}", e);
                Err(e.into())
            }
        }
    }

    /// Stop the timer thread. An open clip is closed first.
    pub fn shutdown(&self) {
        let handle = self.ticker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            self.shared.running.store(false, Ordering::SeqCst);
            if handle.join().is_err() {
                log::error!("Recording timer thread panicked");
            }
        }
        if self.state().is_recording() {
            self.stop_recording();
        }
    }

    /// Feed a detection trigger (motion or face).
    pub fn trigger(&self, kind: TriggerKind) {
        let input = match kind {
            TriggerKind::Manual => RecordingInput::Manual,
            other => RecordingInput::Detection(other),
        };
        self.shared.apply(|machine, now| machine.handle(input, now, Utc::now()));
    }

    pub fn manual_trigger(&self) {
        self.trigger(TriggerKind::Manual);
    }

    pub fn stop_recording(&self) {
        self.shared
            .apply(|machine, now| machine.handle(RecordingInput::Stop, now, Utc::now()));
    }

    /// Fire due timers now instead of waiting for the timer thread.
    pub fn poll(&self) {
        self.shared.apply(|machine, now| machine.tick(now, Utc::now()));
    }

    pub fn state(&self) -> RecordingState {
        self.shared.machine().state()
    }

    pub fn current_session(&self) -> Option<RecordingSession> {
        self.shared.machine().session().cloned()
    }
}

impl DetectionListener for RecordingController {
    fn on_record_trigger(&self, trigger: &RecordTrigger) {
        self.trigger(trigger.kind);
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        let handle = self.ticker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            self.shared.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
        }
    }
}
