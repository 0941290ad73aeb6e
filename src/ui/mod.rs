//! Status rendering.
//!
//! The sequencer thread hands every tick's state to a [`StatusSink`]. The GUI
//! reads the latest copy out of a [`SnapshotCell`] on its own schedule.

pub mod pattern_grid;

use std::sync::{Arc, Mutex, PoisonError};

use crate::looper::{LooperStatus, Track};
use crate::sequencer::TOTAL_STEPS;

/// Everything needed to draw the looper.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub status: LooperStatus,
    pub tracks: Vec<Track>,
}

impl StatusSnapshot {
    pub fn state_label(&self) -> &'static str {
        if self.connected {
            self.status.state.label()
        } else {
            "WAITING"
        }
    }
}

/// Receives the looper state after each tick.
pub trait StatusSink: Send {
    fn render(&mut self, connected: bool, status: &LooperStatus, tracks: &[Track]);
}

/// Latest snapshot, shared between the sequencer thread and the GUI.
#[derive(Clone, Default)]
pub struct SnapshotCell {
    latest: Arc<Mutex<Option<StatusSnapshot>>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<StatusSnapshot> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StatusSink for SnapshotCell {
    fn render(&mut self, connected: bool, status: &LooperStatus, tracks: &[Track]) {
        if log::log_enabled!(log::Level::Trace) {
            for (i, track) in tracks.iter().enumerate() {
                log::trace!(
                    "{}",
                    pattern_row(track, status.current_step, i == status.current_track)
                );
            }
        }

        let snapshot = StatusSnapshot {
            connected,
            status: status.clone(),
            tracks: tracks.to_vec(),
        };
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }
}

/// One-line text rendering of a track: `>Kick        [*   *   ]`.
///
/// The selected track is marked with `>`, the current step with `|` when
/// empty and `#` when set.
pub fn pattern_row(track: &Track, current_step: usize, selected: bool) -> String {
    let cells: String = (0..TOTAL_STEPS)
        .map(|i| match (i == current_step, track.pattern[i]) {
            (true, true) => '#',
            (true, false) => '|',
            (false, true) => '*',
            (false, false) => ' ',
        })
        .collect();
    format!(
        "{}{:<11} [{}]",
        if selected { '>' } else { ' ' },
        track.name,
        cells
    )
}
