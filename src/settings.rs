use crate::generator::{Bulb, BulbFilter, ITERATION_CEILING, Mode};
use crate::pool::{DEFAULT_AUDIBILITY, TickParams};
use crate::raster::TrailStyle;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Live user settings. Read by the producer once per tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    pub trajectories: usize,
    pub max_iterations: usize,
    pub min_iterations: usize,
    pub trail_length: usize,
    pub mode: Mode,
    pub bulbs: BulbFilter,
    pub scale: f32,
    pub fps: u32,
    pub audio_tracks: usize,
    pub audibility: f64,
    pub mirror: bool,
    /// Cleared while paused; not persisted.
    pub rendering: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            trajectories: 300,
            max_iterations: 900,
            min_iterations: 10,
            trail_length: 20,
            mode: Mode::Escaping,
            bulbs: BulbFilter::ALL,
            scale: 0.5,
            fps: 30,
            audio_tracks: 0,
            audibility: DEFAULT_AUDIBILITY,
            mirror: true,
            rendering: true,
        }
    }
}

/// Numeric settings that the UI steps up and down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Knob {
    Trajectories,
    MaxIterations,
    MinIterations,
    TrailLength,
    Scale,
    AudioTracks,
    Fps,
}

impl Knob {
    pub const ALL: [Self; 7] = [
        Self::Trajectories,
        Self::MaxIterations,
        Self::MinIterations,
        Self::TrailLength,
        Self::Scale,
        Self::AudioTracks,
        Self::Fps,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Trajectories => "Trajectories",
            Self::MaxIterations => "Max Iterations",
            Self::MinIterations => "Min Iterations",
            Self::TrailLength => "Trail Length",
            Self::Scale => "Scale",
            Self::AudioTracks => "Audio Tracks",
            Self::Fps => "Recording FPS",
        }
    }

    pub fn range(self) -> (f64, f64) {
        match self {
            Self::Trajectories => (1.0, 10_000.0),
            Self::MaxIterations | Self::MinIterations | Self::TrailLength => {
                (2.0, ITERATION_CEILING as f64)
            }
            Self::Scale => (0.5, 10.0),
            Self::AudioTracks => (0.0, 10.0),
            Self::Fps => (1.0, 100.0),
        }
    }

    /// Ranges starting above zero are stepped geometrically.
    fn logarithmic(self) -> bool {
        self.range().0 > 0.0
    }
}

const LOG_STEP: f64 = 1.25;

impl Settings {
    pub fn get(&self, knob: Knob) -> f64 {
        match knob {
            Knob::Trajectories => self.trajectories as f64,
            Knob::MaxIterations => self.max_iterations as f64,
            Knob::MinIterations => self.min_iterations as f64,
            Knob::TrailLength => self.trail_length as f64,
            Knob::Scale => self.scale as f64,
            Knob::AudioTracks => self.audio_tracks as f64,
            Knob::Fps => self.fps as f64,
        }
    }

    /// Sets `knob` to `value`, clamped to its range.
    pub fn set(&mut self, knob: Knob, value: f64) {
        let (lo, hi) = knob.range();
        let v = if value.is_finite() { value.clamp(lo, hi) } else { lo };
        match knob {
            Knob::Trajectories => self.trajectories = v.round() as usize,
            Knob::MaxIterations => self.max_iterations = v.round() as usize,
            Knob::MinIterations => self.min_iterations = v.round() as usize,
            Knob::TrailLength => self.trail_length = v.round() as usize,
            Knob::Scale => self.scale = v as f32,
            Knob::AudioTracks => self.audio_tracks = v.round() as usize,
            Knob::Fps => self.fps = v.round() as u32,
        }
    }

    /// Moves `knob` by `steps` notches; integer knobs always move by at least one.
    pub fn adjust(&mut self, knob: Knob, steps: i32) {
        if steps == 0 {
            return;
        }
        let cur = self.get(knob);
        let mut next = if knob.logarithmic() {
            cur * LOG_STEP.powi(steps)
        } else {
            cur + steps as f64
        };
        if knob != Knob::Scale && next.round() == cur.round() {
            next = cur + steps.signum() as f64;
        }
        self.set(knob, next);
    }

    pub fn toggle_mode(&mut self) {
        self.mode = self.mode.toggled();
    }

    pub fn toggle_bulb(&mut self, bulb: Bulb) {
        self.bulbs = self.bulbs.toggled(bulb);
    }

    /// Brings every field back inside its range.
    pub fn clamped(mut self) -> Self {
        for knob in Knob::ALL {
            let v = self.get(knob);
            self.set(knob, v);
        }
        if !self.audibility.is_finite() || self.audibility < 0.0 {
            self.audibility = DEFAULT_AUDIBILITY;
        }
        self
    }

    pub fn to_tick_params(&self) -> TickParams {
        let s = self.clamped();
        TickParams {
            target: s.trajectories,
            min_len: s.min_iterations,
            max_len: s.max_iterations.min(ITERATION_CEILING),
            mode: s.mode,
            bulbs: s.bulbs,
            audio_target: s.audio_tracks,
            audibility: s.audibility,
            random_start: true,
        }
    }

    pub fn trail_style(&self) -> TrailStyle {
        let s = self.clamped();
        TrailStyle {
            segments: s.trail_length,
            scale: s.scale,
            mirror: s.mirror,
            mode: s.mode,
            bulbs: s.bulbs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    Io(String),
    Parse { line: usize, message: String },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::Parse { line, message } => write!(f, "parse error at line {line}: {message}"),
        }
    }
}

impl std::error::Error for SettingsError {}

impl Settings {
    /// Reads `key=value` lines; a missing file gives defaults and unknown keys
    /// are skipped.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = match std::fs::read_to_string(path) {
            Ok(v) => v,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(SettingsError::Io(err.to_string())),
        };
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, SettingsError> {
        let mut s = Self::default();
        for (line_idx, raw) in text.lines().enumerate() {
            let line_no = line_idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key_raw, value_raw)) = line.split_once('=') else {
                return Err(SettingsError::Parse {
                    line: line_no,
                    message: "expected <key>=<value>".to_string(),
                });
            };
            let key = key_raw.trim();
            let value = value_raw.trim();
            let bad = |what: &str| SettingsError::Parse {
                line: line_no,
                message: format!("{key} must be {what}"),
            };

            if let Some(knob) = knob_for_key(key) {
                let v = value.parse::<f64>().map_err(|_| bad("a number"))?;
                s.set(knob, v);
                continue;
            }
            if let Some(id) = key.strip_prefix("bulb_") {
                // Unknown bulb ids fall through to the ignored-key case.
                if let Some(bulb) = id.parse::<u8>().ok().and_then(Bulb::from_id) {
                    let on = parse_bool(value).ok_or_else(|| bad("true/false"))?;
                    s.bulbs = s.bulbs.with(bulb, on);
                }
                continue;
            }
            match key {
                "inclusion" => {
                    let on = parse_bool(value).ok_or_else(|| bad("true/false"))?;
                    s.mode = if on { Mode::Inclusion } else { Mode::Escaping };
                }
                "mirror" => s.mirror = parse_bool(value).ok_or_else(|| bad("true/false"))?,
                "audibility" => {
                    let v = value.parse::<f64>().map_err(|_| bad("a number"))?;
                    if !v.is_finite() || v < 0.0 {
                        return Err(bad("a non-negative number"));
                    }
                    s.audibility = v;
                }
                _ => {}
            }
        }
        Ok(s)
    }

    pub fn to_text(&self) -> String {
        let mut body = String::from("# twinklebrot settings v1\n");
        for knob in Knob::ALL {
            match knob {
                Knob::Scale => body.push_str(&format!("{}={}\n", key_for_knob(knob), self.scale)),
                _ => body.push_str(&format!("{}={}\n", key_for_knob(knob), self.get(knob) as u64)),
            }
        }
        body.push_str(&format!("inclusion={}\n", self.mode == Mode::Inclusion));
        for bulb in Bulb::all() {
            body.push_str(&format!("bulb_{}={}\n", bulb.id(), self.bulbs.enabled(bulb)));
        }
        body.push_str(&format!("mirror={}\n", self.mirror));
        body.push_str(&format!("audibility={}\n", self.audibility));
        body
    }

    pub fn save(&self, path: Option<&Path>) -> Result<(), SettingsError> {
        let Some(path) = path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, self.to_text()).map_err(|e| SettingsError::Io(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| SettingsError::Io(e.to_string()))
    }
}

fn key_for_knob(knob: Knob) -> &'static str {
    match knob {
        Knob::Trajectories => "trajectories",
        Knob::MaxIterations => "max_iterations",
        Knob::MinIterations => "min_iterations",
        Knob::TrailLength => "trail_length",
        Knob::Scale => "scale",
        Knob::AudioTracks => "audio_tracks",
        Knob::Fps => "fps",
    }
}

fn knob_for_key(key: &str) -> Option<Knob> {
    Knob::ALL.into_iter().find(|k| key_for_knob(*k) == key)
}

pub fn settings_storage_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.trim().is_empty() {
            return Some(PathBuf::from(xdg).join("twinklebrot").join("settings.txt"));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("twinklebrot")
            .join("settings.txt"),
    )
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Settings shared between the UI, which edits them, and the producer, which
/// snapshots them at the start of every tick.
#[derive(Clone, Default)]
pub struct SharedSettings {
    inner: Arc<Mutex<Settings>>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(settings)),
        }
    }

    /// A poisoned lock still holds valid plain data, so it is recovered.
    fn lock(&self) -> MutexGuard<'_, Settings> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Settings {
        *self.lock()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Settings) -> R) -> R {
        f(&mut self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tick_defaults() {
        assert_eq!(Settings::default().to_tick_params(), TickParams::default());
        assert_eq!(Settings::default().trail_style(), TrailStyle::default());
    }

    #[test]
    fn set_clamps_to_range() {
        let mut s = Settings::default();
        s.set(Knob::Trajectories, 1e9);
        assert_eq!(s.trajectories, 10_000);
        s.set(Knob::Scale, 0.1);
        assert_eq!(s.scale, 0.5);
        s.set(Knob::AudioTracks, -3.0);
        assert_eq!(s.audio_tracks, 0);
        s.set(Knob::Fps, f64::NAN);
        assert_eq!(s.fps, 1);
    }

    #[test]
    fn adjust_moves_small_integers_by_one() {
        let mut s = Settings::default();
        s.set(Knob::MinIterations, 2.0);
        s.adjust(Knob::MinIterations, 1);
        assert_eq!(s.min_iterations, 3);
        s.adjust(Knob::AudioTracks, 2);
        assert_eq!(s.audio_tracks, 2);
        s.adjust(Knob::Trajectories, 1);
        assert_eq!(s.trajectories, 375);
    }

    #[test]
    fn parse_reports_line_numbers() {
        let err = Settings::parse("# header\ntrajectories=12\nnot a pair\n").unwrap_err();
        assert_eq!(
            err,
            SettingsError::Parse {
                line: 3,
                message: "expected <key>=<value>".to_string()
            }
        );
        let err = Settings::parse("mirror=maybe").unwrap_err();
        assert!(matches!(err, SettingsError::Parse { line: 1, .. }));
    }

    #[test]
    fn text_round_trip_keeps_values() {
        let mut s = Settings::default();
        s.trajectories = 42;
        s.mode = Mode::Inclusion;
        s.bulbs = BulbFilter::ALL.with(Bulb::Hands, false);
        s.scale = 2.5;
        s.mirror = false;
        let back = Settings::parse(&s.to_text()).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let s = Settings::parse("colour=blue\nbulb_9=false\nfps=60\n").unwrap();
        assert_eq!(s.fps, 60);
        assert_eq!(s.bulbs, BulbFilter::ALL);
    }

    #[test]
    fn shared_settings_snapshot_sees_updates() {
        let shared = SharedSettings::new(Settings::default());
        shared.update(|s| s.toggle_bulb(Bulb::Head));
        assert!(!shared.snapshot().bulbs.enabled(Bulb::Head));
    }
}
