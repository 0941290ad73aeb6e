//! Pattern grid UI component.
//!
//! Renders one row per track with a cell per sequencer step, highlighting
//! the playhead column and the selected track.

use iced::widget::{column, container, row, text, Column, Row};
use iced::{Background, Border, Color, Element, Length, Theme};

use crate::sequencer::{STEPS_PER_BEAT, TOTAL_STEPS};
use crate::ui::StatusSnapshot;

/// Cell and column sizes for consistent grid layout.
const COL_NAME_WIDTH: f32 = 110.0;
const CELL_SIZE: f32 = 18.0;
const ROW_HEIGHT: f32 = 26.0;

/// Cell fill colors.
fn cell_background(is_set: bool, is_playhead: bool, is_beat_start: bool) -> Color {
    match (is_set, is_playhead) {
        (true, true) => Color::from_rgb(1.0, 0.55, 0.9), // Hit under playhead
        (true, false) => Color::from_rgb(0.85, 0.3, 0.7), // Magenta
        (false, true) => Color::from_rgb(0.25, 0.45, 0.5), // Cyan-grey
        (false, false) if is_beat_start => Color::from_rgb(0.2, 0.2, 0.2),
        (false, false) => Color::from_rgb(0.12, 0.12, 0.12), // Dark grey
    }
}

/// Track name color.
fn name_color(selected: bool) -> Color {
    if selected {
        Color::from_rgb(0.95, 0.95, 0.95)
    } else {
        Color::from_rgb(0.6, 0.6, 0.6)
    }
}

/// Status indicator color (the looper's LED).
pub fn indicator_color(on: bool) -> Color {
    if on {
        Color::from_rgb(0.2, 0.9, 0.3)
    } else {
        Color::from_rgb(0.15, 0.2, 0.15)
    }
}

/// Color for the state label.
pub fn state_color(label: &str) -> Color {
    match label {
        "PLAYING" => Color::from_rgb(0.2, 0.8, 0.2),
        "RECORDING" => Color::from_rgb(0.95, 0.3, 0.3),
        "TAP TEMPO" => Color::from_rgb(0.9, 0.4, 0.9),
        _ => Color::from_rgb(0.4, 0.5, 0.95),
    }
}

fn view_cell<'a, M: 'a>(is_set: bool, is_playhead: bool, is_beat_start: bool) -> Element<'a, M> {
    let bg_color = cell_background(is_set, is_playhead, is_beat_start);

    container(text(""))
        .width(Length::Fixed(CELL_SIZE))
        .height(Length::Fixed(CELL_SIZE))
        .style(move |_theme: &Theme| container::Style {
            background: Some(Background::Color(bg_color)),
            border: Border::default().rounded(2),
            ..Default::default()
        })
        .into()
}

/// Render a single track row.
fn view_track_row<'a, M: 'a>(
    name: String,
    pattern: &[bool],
    playhead: usize,
    selected: bool,
) -> Element<'a, M> {
    let label = if selected {
        format!("> {}", name)
    } else {
        format!("  {}", name)
    };

    let cells: Vec<Element<'a, M>> = pattern
        .iter()
        .enumerate()
        .map(|(step, &is_set)| {
            view_cell(
                is_set,
                step == playhead,
                step % STEPS_PER_BEAT as usize == 0,
            )
        })
        .collect();

    row![
        container(text(label).size(14).color(name_color(selected)))
            .width(Length::Fixed(COL_NAME_WIDTH))
            .padding([4, 8])
            .center_y(Length::Fixed(ROW_HEIGHT)),
        Row::with_children(cells).spacing(2),
    ]
    .spacing(4)
    .into()
}

/// Build the complete track grid.
///
/// The playhead marks the step that was just played, which is one behind the
/// looper's upcoming `current_step`.
pub fn view_pattern_grid<'a, M: 'a>(snapshot: &StatusSnapshot) -> Element<'a, M> {
    let status = &snapshot.status;
    let playhead = (status.current_step + TOTAL_STEPS - 1) % TOTAL_STEPS;

    let rows: Vec<Element<'a, M>> = snapshot
        .tracks
        .iter()
        .enumerate()
        .map(|(i, track)| {
            view_track_row(
                track.name.clone(),
                &track.pattern,
                playhead,
                i == status.current_track,
            )
        })
        .collect();

    container(column![Column::with_children(rows).spacing(2)].padding(8))
        .style(|_theme: &Theme| container::Style {
            background: Some(Background::Color(Color::from_rgb(0.08, 0.08, 0.08))),
            border: Border::default().rounded(4),
            ..Default::default()
        })
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_colors_distinguish_states() {
        let set = cell_background(true, false, false);
        let playhead = cell_background(false, true, false);
        let empty = cell_background(false, false, false);
        let beat = cell_background(false, false, true);
        assert_ne!(set, playhead);
        assert_ne!(set, empty);
        assert_ne!(empty, beat);
    }

    #[test]
    fn test_state_colors() {
        assert_ne!(state_color("PLAYING"), state_color("RECORDING"));
        assert_eq!(state_color("WAITING"), state_color("anything else"));
    }
}
