//! MIDI constants, note encoding and port I/O.
//!
//! Notes go out as a note-on immediately followed by its note-off, which is
//! all a drum receiver needs. The single looper button can be any MIDI
//! controller key or pedal, read through [`ButtonInput`].

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use midly::live::LiveEvent;
use midly::num::{u4, u7};
use midly::MidiMessage;
use serde::{Deserialize, Serialize};

use crate::button::ButtonSource;

/// Channel index of the metronome click (MIDI channel 1)
pub const CLICK_CHANNEL: u8 = 0;

/// Channel index of the GM drum kit (MIDI channel 10)
pub const DRUM_CHANNEL: u8 = 9;

// General MIDI percussion keys
pub const BASS_DRUM: u8 = 36;
pub const SIDE_STICK: u8 = 37;
pub const SNARE: u8 = 38;
pub const CLOSED_HI_HAT: u8 = 42;
pub const OPEN_HI_HAT: u8 = 46;
pub const CRASH_CYMBAL_1: u8 = 49;
pub const RIDE_CYMBAL_1: u8 = 51;
pub const COWBELL: u8 = 56;

pub const VELOCITY_FULL: u8 = 0x7F;
pub const VELOCITY_CLICK_ACCENT: u8 = 0x5F;
pub const VELOCITY_CLICK: u8 = 0x20;

/// Minimum time between reconnection attempts on the output port.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// A percussive note: channel index 0-15, key 0-127, velocity 0-127.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    pub channel: u8,
    pub key: u8,
    pub velocity: u8,
}

impl Note {
    pub fn new(channel: u8, key: u8, velocity: u8) -> Self {
        Self {
            channel,
            key,
            velocity,
        }
    }

    /// Raw note-on message.
    pub fn on_message(&self) -> io::Result<Vec<u8>> {
        encode(
            self.channel,
            MidiMessage::NoteOn {
                key: u7::new(self.key & 0x7F),
                vel: u7::new(self.velocity & 0x7F),
            },
        )
    }

    /// Raw note-off message (release velocity 0).
    pub fn off_message(&self) -> io::Result<Vec<u8>> {
        encode(
            self.channel,
            MidiMessage::NoteOff {
                key: u7::new(self.key & 0x7F),
                vel: u7::new(0),
            },
        )
    }
}

fn encode(channel: u8, message: MidiMessage) -> io::Result<Vec<u8>> {
    let event = LiveEvent::Midi {
        channel: u4::new(channel & 0x0F),
        message,
    };
    let mut bytes = Vec::with_capacity(3);
    event.write_std(&mut bytes)?;
    Ok(bytes)
}

/// Destination for the looper's notes.
pub trait NoteSink: Send {
    /// Whether the destination can currently receive notes.
    fn is_ready(&mut self) -> bool;

    /// Fire-and-forget note emission.
    fn emit(&mut self, note: Note);
}

/// Pick a port: first name containing `preferred`, else one containing
/// "IAC" (macOS virtual bus), else the first port.
pub fn pick_port(names: &[String], preferred: Option<&str>) -> Option<usize> {
    if names.is_empty() {
        return None;
    }
    if let Some(wanted) = preferred {
        if let Some(idx) = names.iter().position(|n| n.contains(wanted)) {
            return Some(idx);
        }
    }
    Some(names.iter().position(|n| n.contains("IAC")).unwrap_or(0))
}

/// Output connection that reconnects on its own.
///
/// A failed send drops the connection; [`NoteSink::is_ready`] retries at
/// most once per [`RECONNECT_INTERVAL`].
pub struct MidiOut {
    preferred_port: Option<String>,
    connection: Option<MidiOutputConnection>,
    port_name: Option<String>,
    last_attempt: Option<Instant>,
}

impl MidiOut {
    pub fn new(preferred_port: Option<String>) -> Self {
        let mut out = Self {
            preferred_port,
            connection: None,
            port_name: None,
            last_attempt: None,
        };
        if let Err(e) = out.connect() {
            log::warn!("MIDI output unavailable: {:#}", e);
        }
        out
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Open the output port.
    pub fn connect(&mut self) -> anyhow::Result<()> {
        self.last_attempt = Some(Instant::now());

        let midi_out = MidiOutput::new("drum-looper-out")
            .map_err(|e| anyhow!("Failed to create MIDI output: {}", e))?;

        let ports = midi_out.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| midi_out.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
            .collect();

        let idx = pick_port(&names, self.preferred_port.as_deref())
            .ok_or_else(|| anyhow!("No MIDI output ports found"))?;

        let connection = midi_out
            .connect(&ports[idx], "drum-looper-out")
            .map_err(|e| anyhow!("Failed to connect MIDI output: {}", e))?;

        log::info!("MIDI output connected to: {}", names[idx]);
        self.connection = Some(connection);
        self.port_name = Some(names[idx].clone());
        Ok(())
    }

    fn send(&mut self, message: &[u8]) -> anyhow::Result<()> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| anyhow!("MIDI output not connected"))?;
        connection
            .send(message)
            .map_err(|e| anyhow!("Failed to send MIDI: {}", e))
    }

    fn send_note(&mut self, note: Note) -> anyhow::Result<()> {
        self.send(&note.on_message()?)?;
        self.send(&note.off_message()?)
    }

    fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            log::warn!(
                "MIDI output disconnected from: {}",
                self.port_name.as_deref().unwrap_or("Unknown")
            );
        }
        self.port_name = None;
    }
}

impl NoteSink for MidiOut {
    fn is_ready(&mut self) -> bool {
        if self.connection.is_some() {
            return true;
        }

        let due = self
            .last_attempt
            .map_or(true, |t| t.elapsed() >= RECONNECT_INTERVAL);
        if due {
            if let Err(e) = self.connect() {
                log::debug!("MIDI output reconnect failed: {:#}", e);
            }
        }
        self.connection.is_some()
    }

    fn emit(&mut self, note: Note) {
        if self.connection.is_none() {
            return;
        }

        if let Err(e) = self.send_note(note) {
            log::warn!("{:#}", e);
            self.disconnect();
        }
    }
}

/// What on the controller acts as the looper button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "number", rename_all = "lowercase")]
pub enum ButtonTrigger {
    /// A key: pressed while held down
    Note(u8),
    /// A controller such as the sustain pedal: pressed at value 64 and up
    Cc(u8),
}

impl Default for ButtonTrigger {
    fn default() -> Self {
        // Sustain pedal
        ButtonTrigger::Cc(64)
    }
}

/// Raw button state fed by a MIDI input port.
///
/// Cloned handles share state, so one clone can live in the MIDI callback
/// while another is sampled by the poll loop.
#[derive(Clone)]
pub struct ButtonInput {
    trigger: ButtonTrigger,
    pressed: Arc<AtomicBool>,
}

impl ButtonInput {
    pub fn new(trigger: ButtonTrigger) -> Self {
        Self {
            trigger,
            pressed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Update the raw state from one incoming MIDI message.
    pub fn handle_midi_message(&self, message: &[u8]) {
        let Ok(LiveEvent::Midi { message, .. }) = LiveEvent::parse(message) else {
            return;
        };

        let state = match (self.trigger, message) {
            (ButtonTrigger::Note(n), MidiMessage::NoteOn { key, vel }) if key.as_int() == n => {
                Some(vel.as_int() > 0)
            }
            (ButtonTrigger::Note(n), MidiMessage::NoteOff { key, .. }) if key.as_int() == n => {
                Some(false)
            }
            (ButtonTrigger::Cc(n), MidiMessage::Controller { controller, value })
                if controller.as_int() == n =>
            {
                Some(value.as_int() >= 64)
            }
            _ => None,
        };

        if let Some(pressed) = state {
            self.pressed.store(pressed, Ordering::SeqCst);
        }
    }

    /// Connect to an input port and start feeding this button from it.
    pub fn listen(
        &self,
        preferred_port: Option<&str>,
    ) -> anyhow::Result<(MidiInputConnection<()>, String)> {
        let midi_in = MidiInput::new("drum-looper-button")
            .map_err(|e| anyhow!("Failed to create MIDI input: {}", e))?;

        let ports = midi_in.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| midi_in.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
            .collect();

        let idx = pick_port(&names, preferred_port)
            .ok_or_else(|| anyhow!("No MIDI input ports found"))?;

        let button = self.clone();
        let connection = midi_in
            .connect(
                &ports[idx],
                "drum-looper-button-in",
                move |_timestamp, message, _| {
                    button.handle_midi_message(message);
                },
                (),
            )
            .map_err(|e| anyhow!("Failed to connect MIDI input: {}", e))?;

        log::info!("Button input listening on: {} ({:?})", names[idx], self.trigger);
        Ok((connection, names[idx].clone()))
    }
}

impl ButtonSource for ButtonInput {
    fn is_pressed(&mut self) -> bool {
        self.pressed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_off_bytes() {
        let note = Note::new(DRUM_CHANNEL, BASS_DRUM, VELOCITY_FULL);
        assert_eq!(note.on_message().unwrap(), vec![0x99, 36, 0x7F]);
        assert_eq!(note.off_message().unwrap(), vec![0x89, 36, 0x00]);
    }

    #[test]
    fn test_click_note_on_channel_one() {
        let note = Note::new(CLICK_CHANNEL, SIDE_STICK, VELOCITY_CLICK_ACCENT);
        assert_eq!(note.on_message().unwrap(), vec![0x90, 37, 0x5F]);
    }

    #[test]
    fn test_out_of_range_values_are_masked() {
        let note = Note::new(0x1A, 0xC0, 0xFF);
        assert_eq!(note.on_message().unwrap(), vec![0x9A, 0x40, 0x7F]);
    }

    #[test]
    fn test_pick_port_prefers_configured_name() {
        let names = vec![
            "Launchpad".to_string(),
            "IAC Driver Bus 1".to_string(),
            "Pico Looper".to_string(),
        ];
        assert_eq!(pick_port(&names, Some("Pico")), Some(2));
    }

    #[test]
    fn test_pick_port_falls_back_to_iac_then_first() {
        let names = vec!["Launchpad".to_string(), "IAC Driver Bus 1".to_string()];
        assert_eq!(pick_port(&names, Some("Missing")), Some(1));
        assert_eq!(pick_port(&names, None), Some(1));

        let names = vec!["Launchpad".to_string(), "Keystep".to_string()];
        assert_eq!(pick_port(&names, None), Some(0));
        assert_eq!(pick_port(&[], None), None);
    }

    #[test]
    fn test_button_input_note_trigger() {
        let mut button = ButtonInput::new(ButtonTrigger::Note(60));
        assert!(!button.is_pressed());

        button.handle_midi_message(&[0x90, 60, 100]);
        assert!(button.is_pressed());

        button.handle_midi_message(&[0x80, 60, 0]);
        assert!(!button.is_pressed());

        // Note on with velocity 0 is a release
        button.handle_midi_message(&[0x90, 60, 100]);
        button.handle_midi_message(&[0x90, 60, 0]);
        assert!(!button.is_pressed());
    }

    #[test]
    fn test_button_input_ignores_other_keys() {
        let mut button = ButtonInput::new(ButtonTrigger::Note(60));
        button.handle_midi_message(&[0x90, 61, 100]);
        assert!(!button.is_pressed());
        button.handle_midi_message(&[0xB0, 60, 127]);
        assert!(!button.is_pressed());
    }

    #[test]
    fn test_button_input_sustain_pedal() {
        let mut button = ButtonInput::new(ButtonTrigger::default());
        button.handle_midi_message(&[0xB3, 64, 127]);
        assert!(button.is_pressed());
        button.handle_midi_message(&[0xB3, 64, 63]);
        assert!(!button.is_pressed());
    }

    #[test]
    fn test_button_input_ignores_garbage() {
        let mut button = ButtonInput::new(ButtonTrigger::default());
        button.handle_midi_message(&[]);
        button.handle_midi_message(&[0xF8]);
        button.handle_midi_message(&[0x40]);
        assert!(!button.is_pressed());
    }

    #[test]
    fn test_button_input_clones_share_state() {
        let button = ButtonInput::new(ButtonTrigger::Note(36));
        let mut sampler = button.clone();
        button.handle_midi_message(&[0x99, 36, 90]);
        assert!(sampler.is_pressed());
    }
}
