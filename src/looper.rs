//! Looper state machine.
//!
//! [`LooperEngine`] owns the looper status and the track patterns. It is
//! driven from two directions:
//! - [`LooperEngine::on_tick`] once per sequencer step, which plays the
//!   current step and advances the sequencer
//! - [`LooperEngine::on_button`] for every button event, which records,
//!   switches tracks, enters tap tempo or clears the patterns
//!
//! Both return the notes to emit; the engine itself never touches I/O.
//!
//! # Button actions
//! - click: record the pressed step (starting a fresh two-bar take if not
//!   already recording)
//! - hold: switch to the next track
//! - long hold: tap-tempo mode, left again with a hold
//! - very long hold: clear every track

use crate::button::ButtonEvent;
use crate::midi::{
    Note, BASS_DRUM, CLICK_CHANNEL, CLOSED_HI_HAT, COWBELL, CRASH_CYMBAL_1, DRUM_CHANNEL,
    OPEN_HI_HAT, RIDE_CYMBAL_1, SIDE_STICK, SNARE, VELOCITY_CLICK, VELOCITY_CLICK_ACCENT,
    VELOCITY_FULL,
};
use crate::sequencer::{
    is_click_step, next_tick_delay_ms, quantize_step, step_duration_ms, DEFAULT_BPM, MAX_BPM,
    MIN_BPM, TOTAL_STEPS,
};
use crate::tap_tempo::{TapResult, TapTempo};

/// Status indicator blink while waiting for an output: on, then off (ms)
const WAITING_BLINK_ON_MS: u64 = 100;
const WAITING_BLINK_OFF_MS: u64 = 1300;

/// One step pattern
pub type Pattern = [bool; TOTAL_STEPS];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LooperState {
    /// No output connection; the sequencer runs silently
    Waiting,
    Playing,
    Recording,
    /// Advance to the next track on the coming tick
    TrackSwitch,
    /// Button events drive the tap-tempo detector
    TapTempo,
    /// Clear every pattern on the coming tick
    ClearTracks,
}

impl LooperState {
    pub fn label(&self) -> &'static str {
        match self {
            LooperState::Waiting => "WAITING",
            LooperState::Playing | LooperState::TrackSwitch | LooperState::ClearTracks => {
                "PLAYING"
            }
            LooperState::Recording => "RECORDING",
            LooperState::TapTempo => "TAP TEMPO",
        }
    }
}

/// Timestamps used for quantization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LooperTiming {
    /// When the most recent step was played
    pub last_step_time_us: u64,
    /// When the current button press began; `None` once it is released or
    /// if its `Down` was never seen
    pub button_press_start_us: Option<u64>,
}

/// Runtime playback state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LooperStatus {
    pub bpm: u32,
    pub step_duration_ms: u32,
    pub state: LooperState,
    /// Track that records and previews
    pub current_track: usize,
    /// Step played on the next tick
    pub current_step: usize,
    /// Ticks elapsed in the current recording take
    pub recording_step_count: usize,
    /// Status indicator (LED) state
    pub indicator: bool,
    pub timing: LooperTiming,
}

/// A drum voice and its step pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub name: String,
    pub note: u8,
    /// Channel index (0-15)
    pub channel: u8,
    pub pattern: Pattern,
    /// Copy of the pattern taken when a press begins, restored if the press
    /// turns out to be a hold
    pub hold_pattern: Pattern,
}

impl Track {
    pub fn new(name: impl Into<String>, note: u8, channel: u8) -> Self {
        Self {
            name: name.into(),
            note,
            channel,
            pattern: [false; TOTAL_STEPS],
            hold_pattern: [false; TOTAL_STEPS],
        }
    }

    pub fn clear(&mut self) {
        self.pattern = [false; TOTAL_STEPS];
    }

    pub fn hit(&self) -> Note {
        Note::new(self.channel, self.note, VELOCITY_FULL)
    }
}

/// The four-voice kit the looper starts with.
pub fn default_tracks() -> Vec<Track> {
    vec![
        Track::new("Kick", BASS_DRUM, DRUM_CHANNEL),
        Track::new("Snare", SNARE, DRUM_CHANNEL),
        Track::new("Closed hat", CLOSED_HI_HAT, DRUM_CHANNEL),
        Track::new("Open hat", OPEN_HI_HAT, DRUM_CHANNEL),
    ]
}

/// Metronome and cue sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CueNotes {
    /// Click on every beat of the loop while playing or recording
    pub metronome: bool,
    pub click: u8,
    pub track_switch: u8,
    pub tap_tempo: u8,
    pub clear_tracks: u8,
}

impl Default for CueNotes {
    fn default() -> Self {
        Self {
            metronome: true,
            click: SIDE_STICK,
            track_switch: RIDE_CYMBAL_1,
            tap_tempo: COWBELL,
            clear_tracks: CRASH_CYMBAL_1,
        }
    }
}

pub struct LooperEngine {
    status: LooperStatus,
    tracks: Vec<Track>,
    tap: TapTempo,
    cues: CueNotes,
}

impl LooperEngine {
    /// Create an engine in the Waiting state. An empty track list falls
    /// back to [`default_tracks`].
    pub fn new(tracks: Vec<Track>, bpm: u32, cues: CueNotes) -> Self {
        let tracks = if tracks.is_empty() {
            default_tracks()
        } else {
            tracks
        };
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);

        Self {
            status: LooperStatus {
                bpm,
                step_duration_ms: step_duration_ms(bpm),
                state: LooperState::Waiting,
                current_track: 0,
                current_step: 0,
                recording_step_count: 0,
                indicator: false,
                timing: LooperTiming::default(),
            },
            tracks,
            tap: TapTempo::new(),
            cues,
        }
    }

    pub fn status(&self) -> &LooperStatus {
        &self.status
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn state(&self) -> LooperState {
        self.status.state
    }

    /// Change the tempo; the step duration follows immediately and the
    /// next reschedule uses it.
    pub fn set_bpm(&mut self, bpm: u32) {
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        if bpm != self.status.bpm {
            log::info!("Tempo: {} -> {} bpm", self.status.bpm, bpm);
        }
        self.status.bpm = bpm;
        self.status.step_duration_ms = step_duration_ms(bpm);
    }

    /// Delay before the next tick, given when the current one started and
    /// finished.
    pub fn next_delay_ms(&self, started_us: u64, finished_us: u64) -> u64 {
        next_tick_delay_ms(
            self.status.step_duration_ms,
            finished_us.saturating_sub(started_us),
        )
    }

    fn set_state(&mut self, state: LooperState) {
        if state != self.status.state {
            log::info!("Looper: {:?} -> {:?}", self.status.state, state);
            self.status.state = state;
        }
    }

    fn click(&self, step: usize) -> Note {
        let velocity = if step == 0 {
            VELOCITY_CLICK_ACCENT
        } else {
            VELOCITY_CLICK
        };
        Note::new(CLICK_CHANNEL, self.cues.click, velocity)
    }

    fn cue(&self, key: u8) -> Note {
        Note::new(DRUM_CHANNEL, key, VELOCITY_FULL)
    }

    fn advance_step(&mut self, now_us: u64) {
        self.status.timing.last_step_time_us = now_us;
        self.status.current_step = (self.status.current_step + 1) % TOTAL_STEPS;
    }

    /// Play the current step and advance the sequencer.
    ///
    /// `connected` is the output readiness sampled for this tick.
    pub fn on_tick(&mut self, now_us: u64, connected: bool) -> Vec<Note> {
        let mut notes = Vec::new();

        if !connected {
            if self.status.state != LooperState::Waiting {
                self.tap.reset();
                self.status.timing.button_press_start_us = None;
                self.set_state(LooperState::Waiting);
            }
            self.status.indicator = waiting_blink(now_us);
            self.advance_step(now_us);
            return notes;
        }

        if self.status.state == LooperState::Waiting {
            self.status.current_step = 0;
            self.set_state(LooperState::Playing);
        }

        match self.status.state {
            LooperState::TrackSwitch => {
                self.status.current_track = (self.status.current_track + 1) % self.tracks.len();
                notes.push(self.cue(self.cues.track_switch));
                log::info!("Track: {}", self.tracks[self.status.current_track].name);
                self.set_state(LooperState::Playing);
            }
            LooperState::ClearTracks => {
                for track in &mut self.tracks {
                    track.clear();
                }
                self.status.current_track = 0;
                self.set_state(LooperState::Playing);
            }
            _ => {}
        }

        let step = self.status.current_step;
        let state = self.status.state;
        let current = self.status.current_track;

        let metronome = self.cues.metronome || state == LooperState::TapTempo;
        if metronome && is_click_step(step) {
            notes.push(self.click(step));
        }

        match state {
            LooperState::Playing => {
                notes.extend(self.tracks.iter().filter(|t| t.pattern[step]).map(Track::hit));
                self.status.indicator = self.tracks[current].pattern[step];
            }
            LooperState::Recording => {
                // The recorded track already sounded on button down
                notes.extend(
                    self.tracks
                        .iter()
                        .enumerate()
                        .filter(|(i, t)| *i != current && t.pattern[step])
                        .map(|(_, t)| t.hit()),
                );
                self.status.indicator = true;
                self.status.recording_step_count += 1;
                if self.status.recording_step_count >= TOTAL_STEPS {
                    self.status.indicator = false;
                    self.set_state(LooperState::Playing);
                }
            }
            LooperState::TapTempo => {
                self.status.indicator = is_click_step(step);
            }
            _ => {}
        }

        self.advance_step(now_us);
        notes
    }

    /// Handle a button event that happened at `now_us`.
    pub fn on_button(&mut self, event: ButtonEvent, now_us: u64) -> Vec<Note> {
        let mut notes = Vec::new();

        match self.status.state {
            LooperState::Waiting => {
                self.status.timing.button_press_start_us = None;
                return notes;
            }
            LooperState::TapTempo => {
                self.status.timing.button_press_start_us = None;
                let result = self.tap.handle_event_at(event, now_us);
                if event == ButtonEvent::ClickRelease && self.tap.is_collecting() {
                    log::debug!("Tap: {:?} ({} taps held)", result, self.tap.tap_count());
                }
                match result {
                    TapResult::Prelim(bpm) | TapResult::Final(bpm) => self.set_bpm(bpm),
                    TapResult::Exit => {
                        log::info!("Tap tempo done at {} bpm", self.tap.bpm());
                        self.tap.reset();
                        self.set_state(LooperState::Playing);
                    }
                    TapResult::None => {}
                }
                return notes;
            }
            _ => {}
        }

        let press_start_us = if event == ButtonEvent::Down {
            self.status.timing.button_press_start_us = Some(now_us);
            now_us
        } else if is_release(event) {
            // A release only counts if this engine saw its press begin
            match self.status.timing.button_press_start_us.take() {
                Some(start_us) => start_us,
                None => {
                    log::debug!("Ignoring {:?} without a press", event);
                    return notes;
                }
            }
        } else {
            return notes;
        };

        let current = self.status.current_track;
        match event {
            ButtonEvent::Down => {
                let track = &mut self.tracks[current];
                notes.push(track.hit());
                track.hold_pattern = track.pattern;
            }
            ButtonEvent::HoldRelease => {
                let track = &mut self.tracks[current];
                track.pattern = track.hold_pattern;
                self.set_state(LooperState::TrackSwitch);
            }
            ButtonEvent::LongHoldRelease => {
                self.tap.reset();
                self.set_state(LooperState::TapTempo);
                notes.push(self.cue(self.cues.tap_tempo));
            }
            ButtonEvent::VeryLongHoldRelease => {
                self.set_state(LooperState::ClearTracks);
                notes.push(self.cue(self.cues.clear_tracks));
            }
            ButtonEvent::ClickRelease => self.record_press(press_start_us),
            ButtonEvent::HoldBegin
            | ButtonEvent::LongHoldBegin
            | ButtonEvent::VeryLongHoldBegin => {}
        }

        notes
    }

    /// Write a click into the current track, starting a fresh take if not
    /// already recording.
    fn record_press(&mut self, press_start_us: u64) {
        let current = self.status.current_track;
        if self.status.state != LooperState::Recording {
            self.status.recording_step_count = 0;
            self.tracks[current].clear();
            self.set_state(LooperState::Recording);
        }
        let step = quantize_step(
            press_start_us,
            self.status.timing.last_step_time_us,
            self.status.step_duration_ms,
            self.status.current_step,
        );
        log::debug!("Recorded {} at step {}", self.tracks[current].name, step);
        self.tracks[current].pattern[step] = true;
    }
}

impl Default for LooperEngine {
    fn default() -> Self {
        Self::new(default_tracks(), DEFAULT_BPM, CueNotes::default())
    }
}

fn is_release(event: ButtonEvent) -> bool {
    matches!(
        event,
        ButtonEvent::ClickRelease
            | ButtonEvent::HoldRelease
            | ButtonEvent::LongHoldRelease
            | ButtonEvent::VeryLongHoldRelease
    )
}

fn waiting_blink(now_us: u64) -> bool {
    let period_ms = WAITING_BLINK_ON_MS + WAITING_BLINK_OFF_MS;
    (now_us / 1000) % period_ms < WAITING_BLINK_ON_MS
}
