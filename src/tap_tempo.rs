//! Tap-tempo detection and BPM estimation.
//!
//! Clicks are collected as taps; from the second tap on, every tap updates
//! the estimate. A hold release leaves the mode. Collection restarts after
//! one second without taps, and after the fourth tap.

use crate::button::ButtonEvent;
use crate::sequencer::{DEFAULT_BPM, MAX_BPM, MIN_BPM};

/// Maximum taps averaged into one estimate
pub const MAX_TAPS: usize = 4;

/// Collection is abandoned after this long without a tap
pub const TAP_TIMEOUT_US: u64 = 1_000_000;

/// Outcome of feeding one button event to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapResult {
    None,
    /// Two taps in: provisional estimate
    Prelim(u32),
    /// Three or four taps in: averaged estimate
    Final(u32),
    /// Hold release: leave tap-tempo mode
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TapMode {
    Idle,
    Collecting,
}

#[derive(Debug, Clone)]
pub struct TapTempo {
    mode: TapMode,
    stamps: [u64; MAX_TAPS],
    count: usize,
    last_bpm: u32,
}

impl TapTempo {
    pub fn new() -> Self {
        Self {
            mode: TapMode::Idle,
            stamps: [0; MAX_TAPS],
            count: 0,
            last_bpm: DEFAULT_BPM,
        }
    }

    /// Most recently computed BPM.
    pub fn bpm(&self) -> u32 {
        self.last_bpm
    }

    pub fn is_collecting(&self) -> bool {
        self.mode == TapMode::Collecting
    }

    pub fn tap_count(&self) -> usize {
        self.count
    }

    /// Drop any taps in progress. The last BPM is kept.
    pub fn reset(&mut self) {
        self.mode = TapMode::Idle;
        self.count = 0;
    }

    /// Handle a button event received at `now_us`.
    pub fn handle_event_at(&mut self, event: ButtonEvent, now_us: u64) -> TapResult {
        let is_exit = matches!(
            event,
            ButtonEvent::HoldRelease | ButtonEvent::LongHoldRelease
        );

        match self.mode {
            TapMode::Idle => {
                if is_exit {
                    return TapResult::Exit;
                }
                if event == ButtonEvent::ClickRelease {
                    self.mode = TapMode::Collecting;
                    self.stamps[0] = now_us;
                    self.count = 1;
                }
                TapResult::None
            }
            TapMode::Collecting => {
                if is_exit {
                    self.reset();
                    return TapResult::Exit;
                }

                let since_last_tap = match self.count {
                    0 => 0,
                    n => now_us.saturating_sub(self.stamps[n - 1]),
                };
                if since_last_tap > TAP_TIMEOUT_US {
                    self.reset();
                    return TapResult::None;
                }

                if event != ButtonEvent::ClickRelease {
                    return TapResult::None;
                }

                if self.count < MAX_TAPS {
                    self.stamps[self.count] = now_us;
                    self.count += 1;
                }
                if self.count >= 2 {
                    let last = self.stamps[self.count - 1];
                    self.last_bpm = calc_bpm(self.stamps[0], last, self.count - 1);
                }

                match self.count {
                    2 => TapResult::Prelim(self.last_bpm),
                    3 => TapResult::Final(self.last_bpm),
                    MAX_TAPS => {
                        self.count = 0;
                        TapResult::Final(self.last_bpm)
                    }
                    _ => TapResult::None,
                }
            }
        }
    }
}

impl Default for TapTempo {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert the span between the first and last tap into BPM, rounded to
/// nearest and clamped to [`MIN_BPM`]..=[`MAX_BPM`].
pub fn calc_bpm(first_us: u64, last_us: u64, intervals: usize) -> u32 {
    let delta_us = last_us.saturating_sub(first_us);
    let delta_ms = (delta_us + 500) / 1000;
    if delta_ms == 0 {
        return MIN_BPM;
    }

    let bpm = (60_000 * intervals as u64 + delta_ms / 2) / delta_ms;
    bpm.clamp(MIN_BPM as u64, MAX_BPM as u64) as u32
}
