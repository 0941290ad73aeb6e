//! Configuration persistence for the drum looper.
//!
//! Saves and loads looper configuration to/from YAML files.

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::button::{HoldThresholds, DEFAULT_DEBOUNCE_SAMPLES};
use crate::looper::{default_tracks, CueNotes, Track};
use crate::midi::ButtonTrigger;
use crate::sequencer::{DEFAULT_BPM, MAX_BPM, MIN_BPM};

/// Upper bound on the number of tracks.
pub const MAX_TRACKS: usize = 8;

/// Configuration for a single drum track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackConfig {
    pub name: String,
    /// MIDI note number (0-127)
    pub note: u8,
    /// MIDI channel (1-16, stored as 1-indexed for human readability)
    #[serde(default = "default_drum_channel")]
    pub channel: u8,
}

fn default_drum_channel() -> u8 {
    10 // GM drums
}

/// The looper button: where it comes from and how presses are timed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonConfig {
    /// MIDI input device name (substring match)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_port: Option<String>,
    #[serde(default)]
    pub trigger: ButtonTrigger,
    #[serde(default = "default_debounce_samples")]
    pub debounce_samples: u8,
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
    #[serde(default = "default_long_hold_ms")]
    pub long_hold_ms: u64,
    #[serde(default = "default_very_long_hold_ms")]
    pub very_long_hold_ms: u64,
}

fn default_debounce_samples() -> u8 {
    DEFAULT_DEBOUNCE_SAMPLES
}

fn default_hold_ms() -> u64 {
    500
}

fn default_long_hold_ms() -> u64 {
    2000
}

fn default_very_long_hold_ms() -> u64 {
    5000
}

impl ButtonConfig {
    pub fn hold_thresholds(&self) -> HoldThresholds {
        HoldThresholds::from_millis(self.hold_ms, self.long_hold_ms, self.very_long_hold_ms)
    }
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            input_port: None,
            trigger: ButtonTrigger::default(),
            debounce_samples: default_debounce_samples(),
            hold_ms: default_hold_ms(),
            long_hold_ms: default_long_hold_ms(),
            very_long_hold_ms: default_very_long_hold_ms(),
        }
    }
}

/// Note numbers for the metronome click and the action cues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CueConfig {
    pub click: u8,
    pub track_switch: u8,
    pub tap_tempo: u8,
    pub clear_tracks: u8,
}

impl Default for CueConfig {
    fn default() -> Self {
        let cues = CueNotes::default();
        Self {
            click: cues.click,
            track_switch: cues.track_switch,
            tap_tempo: cues.tap_tempo,
            clear_tracks: cues.clear_tracks,
        }
    }
}

/// Complete looper configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LooperConfig {
    /// Starting tempo
    #[serde(default = "default_bpm")]
    pub bpm: u32,
    /// Click on the beats while playing and recording
    #[serde(default = "default_metronome")]
    pub metronome: bool,
    /// MIDI output device name (substring match)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_port: Option<String>,
    #[serde(default)]
    pub button: ButtonConfig,
    #[serde(default = "default_track_configs")]
    pub tracks: Vec<TrackConfig>,
    #[serde(default)]
    pub cues: CueConfig,
}

fn default_bpm() -> u32 {
    DEFAULT_BPM
}

fn default_metronome() -> bool {
    true
}

fn default_track_configs() -> Vec<TrackConfig> {
    default_tracks()
        .into_iter()
        .map(|t| TrackConfig {
            name: t.name,
            note: t.note,
            channel: t.channel + 1,
        })
        .collect()
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            bpm: default_bpm(),
            metronome: default_metronome(),
            output_port: None,
            button: ButtonConfig::default(),
            tracks: default_track_configs(),
            cues: CueConfig::default(),
        }
    }
}

impl LooperConfig {
    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        let project_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        project_dir.join("looper_config.yaml")
    }

    /// Load and validate configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config YAML {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    /// Load the file if it exists. Otherwise return the defaults and write
    /// them out for editing.
    pub fn load_or_init<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load(path)?;
            log::info!("Loaded config from {}", path.display());
            return Ok(config);
        }

        let config = Self::default();
        match config.save(path) {
            Ok(()) => log::info!("Wrote default config to {}", path.display()),
            Err(e) => log::warn!("{:#}", e),
        }
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            (MIN_BPM..=MAX_BPM).contains(&self.bpm),
            "bpm {} outside {}..={}",
            self.bpm,
            MIN_BPM,
            MAX_BPM
        );
        ensure!(
            (1..=MAX_TRACKS).contains(&self.tracks.len()),
            "need 1 to {} tracks, found {}",
            MAX_TRACKS,
            self.tracks.len()
        );
        for track in &self.tracks {
            ensure!(
                (1..=16).contains(&track.channel),
                "track {}: channel {} outside 1..=16",
                track.name,
                track.channel
            );
            ensure!(
                track.note <= 127,
                "track {}: note {} above 127",
                track.name,
                track.note
            );
        }

        let cues = &self.cues;
        for (name, note) in [
            ("click", cues.click),
            ("track_switch", cues.track_switch),
            ("tap_tempo", cues.tap_tempo),
            ("clear_tracks", cues.clear_tracks),
        ] {
            ensure!(note <= 127, "cue {}: note {} above 127", name, note);
        }

        let button = &self.button;
        ensure!(
            button.debounce_samples > 0,
            "button debounce_samples must be at least 1"
        );
        ensure!(
            button.hold_ms < button.long_hold_ms && button.long_hold_ms < button.very_long_hold_ms,
            "button thresholds must increase: hold {} < long hold {} < very long hold {}",
            button.hold_ms,
            button.long_hold_ms,
            button.very_long_hold_ms
        );
        let (ButtonTrigger::Note(n) | ButtonTrigger::Cc(n)) = button.trigger;
        ensure!(n <= 127, "button trigger number {} above 127", n);
        Ok(())
    }

    /// Tracks with empty patterns, channels converted to 0-indexed.
    pub fn build_tracks(&self) -> Vec<Track> {
        self.tracks
            .iter()
            .map(|t| Track::new(t.name.clone(), t.note, t.channel.saturating_sub(1)))
            .collect()
    }

    pub fn cue_notes(&self) -> CueNotes {
        CueNotes {
            metronome: self.metronome,
            click: self.cues.click,
            track_switch: self.cues.track_switch,
            tap_tempo: self.cues.tap_tempo,
            clear_tracks: self.cues.clear_tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{BASS_DRUM, COWBELL, DRUM_CHANNEL, SIDE_STICK};

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: LooperConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, LooperConfig::default());
        assert_eq!(config.bpm, 120);
        assert!(config.metronome);
        assert_eq!(config.tracks.len(), 4);
        assert_eq!(config.tracks[0].channel, 10);
        assert_eq!(config.cues.click, SIDE_STICK);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "
bpm: 96
metronome: false
output_port: Drum Machine
tracks:
  - name: Kick
    note: 36
  - name: Clap
    note: 39
    channel: 11
cues:
  tap_tempo: 60
";
        let config: LooperConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.bpm, 96);
        assert_eq!(config.output_port.as_deref(), Some("Drum Machine"));
        assert_eq!(config.tracks[0].channel, 10);
        assert_eq!(config.cues.tap_tempo, 60);
        assert_eq!(config.cues.click, SIDE_STICK);
        assert_eq!(config.button, ButtonConfig::default());

        let cues = config.cue_notes();
        assert!(!cues.metronome);
        assert_ne!(cues.tap_tempo, COWBELL);
    }

    #[test]
    fn test_button_trigger_yaml() {
        let yaml = "
button:
  input_port: nanoKONTROL
  trigger:
    kind: note
    number: 60
  hold_ms: 400
";
        let config: LooperConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.button.input_port.as_deref(), Some("nanoKONTROL"));
        assert_eq!(config.button.trigger, ButtonTrigger::Note(60));
        assert_eq!(config.button.debounce_samples, DEFAULT_DEBOUNCE_SAMPLES);

        let thresholds = config.button.hold_thresholds();
        assert_eq!(thresholds.hold_us, 400_000);
        assert_eq!(thresholds.very_long_hold_us, 5_000_000);
    }

    #[test]
    fn test_build_tracks_uses_zero_indexed_channels() {
        let tracks = LooperConfig::default().build_tracks();
        assert_eq!(tracks.len(), 4);
        assert_eq!(tracks[0].note, BASS_DRUM);
        assert_eq!(tracks[0].channel, DRUM_CHANNEL);
        assert!(tracks.iter().all(|t| t.pattern.iter().all(|&b| !b)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = LooperConfig {
            bpm: 300,
            ..LooperConfig::default()
        };
        assert!(config.validate().is_err());

        config.bpm = 120;
        config.tracks.clear();
        assert!(config.validate().is_err());

        config.tracks = default_track_configs();
        config.tracks[1].channel = 0;
        assert!(config.validate().is_err());

        config.tracks[1].channel = 10;
        config.tracks[2].note = 200;
        assert!(config.validate().is_err());

        config.tracks[2].note = 42;
        config.button.long_hold_ms = 500;
        assert!(config.validate().is_err());

        config.button.long_hold_ms = 2000;
        config.validate().unwrap();
    }

    #[test]
    fn test_too_many_tracks() {
        let track = TrackConfig {
            name: "Tom".to_string(),
            note: 45,
            channel: 10,
        };
        let config = LooperConfig {
            tracks: vec![track; MAX_TRACKS + 1],
            ..LooperConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("looper_config.yaml");

        let config = LooperConfig {
            bpm: 90,
            button: ButtonConfig {
                trigger: ButtonTrigger::Cc(67),
                ..ButtonConfig::default()
            },
            ..LooperConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = LooperConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("looper_config.yaml");
        fs::write(&path, "bpm: 10\n").unwrap();

        assert!(LooperConfig::load(&path).is_err());
        assert!(LooperConfig::load_or_init(&path).is_err());
    }

    #[test]
    fn test_load_or_init_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("looper_config.yaml");

        let config = LooperConfig::load_or_init(&path).unwrap();
        assert_eq!(config, LooperConfig::default());
        assert!(path.exists());
        assert_eq!(LooperConfig::load(&path).unwrap(), config);
    }
}
