//! Single-button press interpretation.
//!
//! This module handles:
//! - Debouncing a raw pressed/released signal ([`Debouncer`])
//! - Turning the clean signal into timed press events ([`ButtonFsm`])
//!
//! A press is classified by how long it is held: a click, a hold, a long hold
//! or a very long hold. Crossing each threshold while still pressed emits a
//! `*Begin` event, and the release reports which class the press ended in.

/// Logical events derived from the button signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Down,
    ClickRelease,
    HoldBegin,
    HoldRelease,
    LongHoldBegin,
    LongHoldRelease,
    VeryLongHoldBegin,
    VeryLongHoldRelease,
}

/// Source of the debounced "is pressed" signal.
pub trait ButtonSource: Send {
    fn is_pressed(&mut self) -> bool;
}

/// Press duration thresholds in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldThresholds {
    pub hold_us: u64,
    pub long_hold_us: u64,
    pub very_long_hold_us: u64,
}

impl HoldThresholds {
    pub fn from_millis(hold_ms: u64, long_hold_ms: u64, very_long_hold_ms: u64) -> Self {
        Self {
            hold_us: hold_ms * 1000,
            long_hold_us: long_hold_ms * 1000,
            very_long_hold_us: very_long_hold_ms * 1000,
        }
    }
}

impl Default for HoldThresholds {
    fn default() -> Self {
        Self::from_millis(500, 2000, 5000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PressState {
    Idle,
    PressDown,
    HoldActive,
    LongHoldActive,
    VeryLongHoldActive,
}

/// Press classification state machine.
///
/// Call [`ButtonFsm::poll_at`] once per sample. At most one event is
/// produced per call.
#[derive(Debug, Clone)]
pub struct ButtonFsm {
    state: PressState,
    press_start_us: u64,
    thresholds: HoldThresholds,
}

impl ButtonFsm {
    pub fn new(thresholds: HoldThresholds) -> Self {
        Self {
            state: PressState::Idle,
            press_start_us: 0,
            thresholds,
        }
    }

    /// Timestamp at which the current (or last) press began.
    pub fn press_start_us(&self) -> u64 {
        self.press_start_us
    }

    pub fn is_idle(&self) -> bool {
        self.state == PressState::Idle
    }

    /// Feed one debounced sample taken at `now_us`.
    pub fn poll_at(&mut self, pressed: bool, now_us: u64) -> Option<ButtonEvent> {
        let held_us = now_us.saturating_sub(self.press_start_us);

        match self.state {
            PressState::Idle => {
                if pressed {
                    self.state = PressState::PressDown;
                    self.press_start_us = now_us;
                    return Some(ButtonEvent::Down);
                }
                None
            }
            PressState::PressDown => {
                if !pressed {
                    self.state = PressState::Idle;
                    Some(ButtonEvent::ClickRelease)
                } else if held_us > self.thresholds.hold_us {
                    self.state = PressState::HoldActive;
                    Some(ButtonEvent::HoldBegin)
                } else {
                    None
                }
            }
            PressState::HoldActive => {
                if !pressed {
                    self.state = PressState::Idle;
                    Some(ButtonEvent::HoldRelease)
                } else if held_us > self.thresholds.long_hold_us {
                    self.state = PressState::LongHoldActive;
                    Some(ButtonEvent::LongHoldBegin)
                } else {
                    None
                }
            }
            PressState::LongHoldActive => {
                if !pressed {
                    self.state = PressState::Idle;
                    Some(ButtonEvent::LongHoldRelease)
                } else if held_us > self.thresholds.very_long_hold_us {
                    self.state = PressState::VeryLongHoldActive;
                    Some(ButtonEvent::VeryLongHoldBegin)
                } else {
                    None
                }
            }
            PressState::VeryLongHoldActive => {
                if !pressed {
                    self.state = PressState::Idle;
                    return Some(ButtonEvent::VeryLongHoldRelease);
                }
                None
            }
        }
    }
}

impl Default for ButtonFsm {
    fn default() -> Self {
        Self::new(HoldThresholds::default())
    }
}

/// Number of consistent samples needed before the stable state flips.
pub const DEFAULT_DEBOUNCE_SAMPLES: u8 = 10;

/// Up/down counter debouncer.
///
/// Each pressed sample counts up and each released sample counts down,
/// saturating at `0..=samples`. The stable state only changes when the
/// counter hits either end.
#[derive(Debug, Clone)]
pub struct Debouncer {
    counter: u8,
    samples: u8,
    stable: bool,
}

impl Debouncer {
    pub fn new(samples: u8) -> Self {
        Self {
            counter: 0,
            samples: samples.max(1),
            stable: false,
        }
    }

    pub fn update(&mut self, raw_pressed: bool) -> bool {
        if raw_pressed {
            if self.counter < self.samples {
                self.counter += 1;
            }
        } else if self.counter > 0 {
            self.counter -= 1;
        }

        if self.counter == self.samples {
            self.stable = true;
        } else if self.counter == 0 {
            self.stable = false;
        }
        self.stable
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_SAMPLES)
    }
}

/// Wraps a raw source so every read is debounced.
pub struct Debounced<S> {
    raw: S,
    debouncer: Debouncer,
}

impl<S: ButtonSource> Debounced<S> {
    pub fn new(raw: S, samples: u8) -> Self {
        Self {
            raw,
            debouncer: Debouncer::new(samples),
        }
    }
}

impl<S: ButtonSource> ButtonSource for Debounced<S> {
    fn is_pressed(&mut self) -> bool {
        let raw = self.raw.is_pressed();
        self.debouncer.update(raw)
    }
}
