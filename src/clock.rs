//! Sequencer clock and button polling.
//!
//! This module handles:
//! - A monotonic microsecond clock shared by both threads
//! - The self-rescheduling tick loop that drives the sequencer
//! - The button poll loop that turns samples into looper events
//!
//! # Thread Safety
//! [`SharedLooper`] guards the whole engine (status and track patterns)
//! with one mutex, so a tick and a button event never interleave. Notes are
//! emitted after the engine lock is released.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::button::{ButtonEvent, ButtonFsm, ButtonSource};
use crate::looper::LooperEngine;
use crate::midi::{Note, NoteSink};
use crate::ui::StatusSink;

/// Pause between button samples
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Microseconds since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn emit_all<S: NoteSink + ?Sized>(sink: &mut S, notes: Vec<Note>) {
    for note in notes {
        sink.emit(note);
    }
}

/// Looper engine shared between the sequencer and the button poll.
#[derive(Clone)]
pub struct SharedLooper {
    engine: Arc<Mutex<LooperEngine>>,
}

impl SharedLooper {
    pub fn new(engine: LooperEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    /// Exclusive access to the engine.
    pub fn lock(&self) -> MutexGuard<'_, LooperEngine> {
        lock(&self.engine)
    }

    /// Run one sequencer tick at `now_us`: sample output readiness, advance
    /// the engine, render the new state and emit the step's notes.
    pub fn tick_at<S, R>(&self, now_us: u64, sink: &mut S, renderer: &mut R)
    where
        S: NoteSink + ?Sized,
        R: StatusSink + ?Sized,
    {
        let connected = sink.is_ready();
        let notes = {
            let mut engine = self.lock();
            let notes = engine.on_tick(now_us, connected);
            log::trace!(
                "Tick: {:?} step {} ({} notes)",
                engine.state(),
                engine.status().current_step,
                notes.len()
            );
            renderer.render(connected, engine.status(), engine.tracks());
            notes
        };
        emit_all(sink, notes);
    }

    /// Delay until the tick that started at `started_us` should run again.
    pub fn next_delay_ms(&self, started_us: u64, finished_us: u64) -> u64 {
        self.lock().next_delay_ms(started_us, finished_us)
    }

    /// Deliver a button event and emit whatever it sounds.
    pub fn button_at<S: NoteSink + ?Sized>(&self, event: ButtonEvent, now_us: u64, sink: &mut S) {
        log::debug!("Button: {:?}", event);
        let notes = self.lock().on_button(event, now_us);
        emit_all(sink, notes);
    }
}

/// Start the sequencer thread. Each tick reschedules itself for one step
/// duration minus the time the tick took, never less than 1ms.
pub fn spawn_sequencer<S, R>(
    looper: SharedLooper,
    output: Arc<Mutex<S>>,
    mut renderer: R,
    clock: MonotonicClock,
) -> io::Result<JoinHandle<()>>
where
    S: NoteSink + 'static,
    R: StatusSink + 'static,
{
    thread::Builder::new()
        .name("sequencer".to_string())
        .spawn(move || loop {
            let started_us = clock.now_us();
            looper.tick_at(started_us, &mut *lock(&output), &mut renderer);
            let delay_ms = looper.next_delay_ms(started_us, clock.now_us());
            thread::sleep(Duration::from_millis(delay_ms));
        })
}

/// Start the button poll thread, sampling `source` every millisecond.
pub fn spawn_button_poll<B, S>(
    looper: SharedLooper,
    output: Arc<Mutex<S>>,
    mut source: B,
    mut fsm: ButtonFsm,
    clock: MonotonicClock,
) -> io::Result<JoinHandle<()>>
where
    B: ButtonSource + 'static,
    S: NoteSink + 'static,
{
    thread::Builder::new()
        .name("button-poll".to_string())
        .spawn(move || loop {
            let pressed = source.is_pressed();
            let now_us = clock.now_us();
            if let Some(event) = fsm.poll_at(pressed, now_us) {
                if fsm.is_idle() {
                    log::debug!(
                        "Button released after {} ms",
                        now_us.saturating_sub(fsm.press_start_us()) / 1000
                    );
                }
                looper.button_at(event, now_us, &mut *lock(&output));
            }
            thread::sleep(POLL_INTERVAL);
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper::{LooperState, LooperStatus, Track};
    use crate::midi::{BASS_DRUM, SIDE_STICK};
    use crate::ui::SnapshotCell;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Output that records everything it is asked to play.
    struct RecordingSink {
        ready: bool,
        notes: Vec<Note>,
    }

    impl RecordingSink {
        fn new(ready: bool) -> Self {
            Self {
                ready,
                notes: Vec::new(),
            }
        }
    }

    impl NoteSink for RecordingSink {
        fn is_ready(&mut self) -> bool {
            self.ready
        }

        fn emit(&mut self, note: Note) {
            if self.ready {
                self.notes.push(note);
            }
        }
    }

    /// Renderer that counts calls and remembers the last status.
    #[derive(Default)]
    struct CountingRenderer {
        renders: usize,
        last: Option<(bool, LooperStatus)>,
    }

    impl StatusSink for CountingRenderer {
        fn render(&mut self, connected: bool, status: &LooperStatus, _tracks: &[Track]) {
            self.renders += 1;
            self.last = Some((connected, status.clone()));
        }
    }

    #[derive(Clone)]
    struct SharedButton(Arc<AtomicBool>);

    impl ButtonSource for SharedButton {
        fn is_pressed(&mut self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = MonotonicClock::new();
        let a = clock.now_us();
        let b = clock.now_us();
        assert!(b >= a);
    }

    #[test]
    fn test_tick_emits_and_renders() {
        let looper = SharedLooper::new(LooperEngine::default());
        let mut sink = RecordingSink::new(true);
        let mut renderer = CountingRenderer::default();

        looper.tick_at(0, &mut sink, &mut renderer);

        assert_eq!(sink.notes.len(), 1);
        assert_eq!(sink.notes[0].key, SIDE_STICK);
        assert_eq!(renderer.renders, 1);
        let (connected, status) = renderer.last.unwrap();
        assert!(connected);
        assert_eq!(status.state, LooperState::Playing);
        assert_eq!(status.current_step, 1);
    }

    #[test]
    fn test_tick_without_output_waits() {
        let looper = SharedLooper::new(LooperEngine::default());
        let mut sink = RecordingSink::new(false);
        let mut renderer = CountingRenderer::default();

        looper.tick_at(0, &mut sink, &mut renderer);

        assert!(sink.notes.is_empty());
        let (connected, status) = renderer.last.unwrap();
        assert!(!connected);
        assert_eq!(status.state, LooperState::Waiting);
    }

    #[test]
    fn test_button_preview_reaches_sink() {
        let looper = SharedLooper::new(LooperEngine::default());
        let mut sink = RecordingSink::new(true);
        let mut renderer = CountingRenderer::default();
        looper.tick_at(0, &mut sink, &mut renderer);
        sink.notes.clear();

        looper.button_at(ButtonEvent::Down, 10_000, &mut sink);
        assert_eq!(sink.notes.len(), 1);
        assert_eq!(sink.notes[0].key, BASS_DRUM);

        looper.button_at(ButtonEvent::ClickRelease, 60_000, &mut sink);
        assert_eq!(looper.lock().state(), LooperState::Recording);
        assert!(looper.lock().tracks()[0].pattern[0]);
    }

    #[test]
    fn test_next_delay_uses_engine_tempo() {
        let looper = SharedLooper::new(LooperEngine::default());
        assert_eq!(looper.next_delay_ms(1_000_000, 1_005_000), 120);
        looper.lock().set_bpm(240);
        assert_eq!(looper.next_delay_ms(1_000_000, 1_005_000), 57);
    }

    #[test]
    fn test_sequencer_thread_ticks() {
        let mut engine = LooperEngine::default();
        engine.set_bpm(240);
        let looper = SharedLooper::new(engine);
        let output = Arc::new(Mutex::new(RecordingSink::new(true)));
        let snapshots = SnapshotCell::new();

        spawn_sequencer(looper.clone(), output.clone(), snapshots.clone(), MonotonicClock::new())
            .unwrap();
        thread::sleep(Duration::from_millis(400));

        let snapshot = snapshots.latest().expect("sequencer never rendered");
        assert!(snapshot.connected);
        assert_eq!(snapshot.status.state, LooperState::Playing);
        assert!(looper.lock().status().current_step >= 2);
        // Step 0 click at least
        assert!(!lock(&output).notes.is_empty());
    }

    #[test]
    fn test_button_poll_thread_dispatches_events() {
        let looper = SharedLooper::new(LooperEngine::default());
        let output = Arc::new(Mutex::new(RecordingSink::new(true)));
        let mut renderer = CountingRenderer::default();
        looper.tick_at(0, &mut *lock(&output), &mut renderer);
        lock(&output).notes.clear();

        let pressed = Arc::new(AtomicBool::new(false));
        spawn_button_poll(
            looper.clone(),
            output.clone(),
            SharedButton(pressed.clone()),
            ButtonFsm::default(),
            MonotonicClock::new(),
        )
        .unwrap();

        pressed.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        pressed.store(false, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(lock(&output).notes[0].key, BASS_DRUM);
        assert_eq!(looper.lock().state(), LooperState::Recording);
    }
}
