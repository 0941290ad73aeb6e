//! Sequencer timing: loop shape, step duration, tick rescheduling and
//! quantization of button presses onto sequencer steps.
//!
//! All times are monotonic microseconds, durations are milliseconds.

/// Sequencer resolution (4 = 16th notes)
pub const STEPS_PER_BEAT: u32 = 4;

/// Beats per bar (4/4 time signature)
pub const BEATS_PER_BAR: u32 = 4;

/// Loop length in bars
pub const BARS: u32 = 2;

/// Number of steps in one loop (32 for two bars of 16ths)
pub const TOTAL_STEPS: usize = (STEPS_PER_BEAT * BEATS_PER_BAR * BARS) as usize;

/// Step interval at which the metronome clicks
pub const CLICK_DIVISION: usize = TOTAL_STEPS / BARS as usize / STEPS_PER_BEAT as usize;

pub const DEFAULT_BPM: u32 = 120;
pub const MIN_BPM: u32 = 40;
pub const MAX_BPM: u32 = 240;

/// Smallest delay the tick is ever rescheduled with.
pub const MIN_TICK_DELAY_MS: u64 = 1;

/// Duration of one step in milliseconds (integer truncation).
pub fn step_duration_ms(bpm: u32) -> u32 {
    60_000 / (bpm.max(1) * STEPS_PER_BEAT)
}

/// Delay until the next tick, compensating for the time the handler took.
///
/// Never returns less than [`MIN_TICK_DELAY_MS`], so an overrunning handler
/// degrades to back-to-back ticks instead of a zero or negative delay.
pub fn next_tick_delay_ms(step_ms: u32, latency_us: u64) -> u64 {
    let latency_ms = latency_us / 1000;
    (step_ms as u64)
        .saturating_sub(latency_ms)
        .max(MIN_TICK_DELAY_MS)
}

/// Whether a metronome click belongs on this step.
pub fn is_click_step(step: usize) -> bool {
    step % CLICK_DIVISION == 0
}

/// Snap a press onto the nearest sequencer step.
///
/// `current_step` is the *upcoming* step: by the time a press is evaluated
/// the tick has already advanced, so the step that was sounding when
/// `last_step_us` was recorded is `current_step - 1`. The press offset from
/// that boundary is rounded to the nearest whole step, ties going to the
/// later step.
pub fn quantize_step(press_us: u64, last_step_us: u64, step_ms: u32, current_step: usize) -> usize {
    let step_us = (step_ms.max(1) as i64) * 1000;
    let diff_us = press_us as i64 - last_step_us as i64;
    // floor(diff / step + 1/2) in integer arithmetic
    let offset = (2 * diff_us + step_us).div_euclid(2 * step_us);

    let total = TOTAL_STEPS as i64;
    (current_step as i64 - 1 + offset).rem_euclid(total) as usize
}
