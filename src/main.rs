//! Drum Looper - a single-button drum loop recorder.
//!
//! One MIDI controller button records a two-bar drum loop track by track,
//! switches tracks, taps in the tempo and clears the loop. The loop plays
//! out to a MIDI output (preferring the IAC Driver on macOS) and the window
//! shows the transport state and the pattern grid.

mod button;
mod clock;
mod config;
mod looper;
mod midi;
mod sequencer;
mod tap_tempo;
mod ui;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use iced::time::{self, milliseconds};
use iced::widget::{column, container, row, text};
use iced::{Background, Border, Center, Element, Fill, Length, Subscription, Theme};
use midir::MidiInputConnection;

use button::{ButtonFsm, Debounced};
use clock::{spawn_button_poll, spawn_sequencer, MonotonicClock, SharedLooper};
use config::LooperConfig;
use looper::LooperEngine;
use midi::{ButtonInput, MidiOut};
use ui::pattern_grid::{indicator_color, state_color, view_pattern_grid};
use ui::SnapshotCell;

fn main() -> iced::Result {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(LooperConfig::default_path);
    let config = match LooperConfig::load_or_init(&config_path) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(1);
        }
    };

    iced::application(
        move || DrumLooper::new(config.clone()),
        DrumLooper::update,
        DrumLooper::view,
    )
    .title("Drum Looper")
    .subscription(DrumLooper::subscription)
    .theme(DrumLooper::theme)
    .run()
}

struct DrumLooper {
    snapshots: SnapshotCell,
    output: Arc<Mutex<MidiOut>>,
    button_port: Option<String>,
    _button_connection: Option<MidiInputConnection<()>>,
}

#[derive(Debug, Clone, Copy)]
enum Message {
    Tick,
}

impl DrumLooper {
    fn new(config: LooperConfig) -> Self {
        let engine = LooperEngine::new(config.build_tracks(), config.bpm, config.cue_notes());
        let looper = SharedLooper::new(engine);
        let output = Arc::new(Mutex::new(MidiOut::new(config.output_port.clone())));
        let snapshots = SnapshotCell::new();
        let clock = MonotonicClock::new();

        if let Err(e) = spawn_sequencer(looper.clone(), output.clone(), snapshots.clone(), clock) {
            log::error!("Failed to start sequencer thread: {}", e);
        }

        let button = ButtonInput::new(config.button.trigger);
        let (button_connection, button_port) =
            match button.listen(config.button.input_port.as_deref()) {
                Ok((connection, port)) => (Some(connection), Some(port)),
                Err(e) => {
                    log::warn!("Button input unavailable: {:#}", e);
                    (None, None)
                }
            };

        let source = Debounced::new(button, config.button.debounce_samples);
        let fsm = ButtonFsm::new(config.button.hold_thresholds());
        if let Err(e) = spawn_button_poll(looper, output.clone(), source, fsm, clock) {
            log::error!("Failed to start button thread: {}", e);
        }

        log::info!(
            "Drum looper started at {} bpm with {} tracks",
            config.bpm,
            config.tracks.len()
        );

        Self {
            snapshots,
            output,
            button_port,
            _button_connection: button_connection,
        }
    }

    fn update(&mut self, message: Message) {
        match message {
            Message::Tick => {
                // State is updated by the sequencer thread, just trigger re-render
            }
        }
    }

    fn view(&self) -> Element<'_, Message> {
        let Some(snapshot) = self.snapshots.latest() else {
            return container(text("Starting...").size(20))
                .center_x(Fill)
                .center_y(Fill)
                .into();
        };
        let status = &snapshot.status;

        let output_port = self
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .port_name()
            .map(str::to_string);
        let connection_status = match output_port {
            Some(port) if snapshot.connected => format!("Output: {}", port),
            _ => "No MIDI output".to_string(),
        };
        let button_status = match &self.button_port {
            Some(port) => format!("Button: {}", port),
            None => "No button input".to_string(),
        };

        let label = snapshot.state_label();
        let indicator_on = status.indicator;
        let indicator = container(text(""))
            .width(Length::Fixed(20.0))
            .height(Length::Fixed(20.0))
            .style(move |_theme: &Theme| container::Style {
                background: Some(Background::Color(indicator_color(indicator_on))),
                border: Border::default().rounded(10),
                ..Default::default()
            });

        let track_name = snapshot
            .tracks
            .get(status.current_track)
            .map(|t| t.name.clone())
            .unwrap_or_default();

        let content = column![
            text("Drum Looper").size(40),
            text(connection_status).size(16),
            text(button_status).size(14),
            text("").size(10),
            row![indicator, text(label).size(30).color(state_color(label))]
                .spacing(12)
                .align_y(Center),
            text(format!("BPM: {}", status.bpm)).size(60),
            text(format!("Track: {}", track_name)).size(24),
            text("").size(10),
            view_pattern_grid(&snapshot),
        ]
        .align_x(Center);

        container(content)
            .width(Fill)
            .height(Fill)
            .center_x(Fill)
            .center_y(Fill)
            .into()
    }

    fn subscription(&self) -> Subscription<Message> {
        time::every(milliseconds(50)).map(|_| Message::Tick)
    }

    fn theme(&self) -> Theme {
        Theme::Dark
    }
}
