use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use twinklebrot::generator::{Bulb, Mode};
use twinklebrot::settings::{Knob, Settings, SettingsError, SharedSettings};

fn temp_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!("twinklebrot-{tag}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn save_then_load_restores_everything() {
    let dir = temp_dir("roundtrip");
    let path = dir.join("nested").join("settings.txt");

    let mut s = Settings::default();
    s.set(Knob::Trajectories, 1234.0);
    s.set(Knob::MinIterations, 40.0);
    s.set(Knob::Scale, 2.5);
    s.set(Knob::AudioTracks, 3.0);
    s.toggle_mode();
    s.toggle_bulb(Bulb::Hands);
    s.mirror = false;
    s.audibility = 0.75;
    s.save(Some(&path)).unwrap();

    let loaded = Settings::load(Some(&path)).unwrap();
    assert_eq!(loaded.trajectories, 1234);
    assert_eq!(loaded.min_iterations, 40);
    assert_eq!(loaded.scale, 2.5);
    assert_eq!(loaded.audio_tracks, 3);
    assert_eq!(loaded.mode, Mode::Inclusion);
    assert!(!loaded.bulbs.enabled(Bulb::Hands));
    assert!(loaded.bulbs.enabled(Bulb::Head));
    assert!(!loaded.mirror);
    assert_eq!(loaded.audibility, 0.75);
    assert!(!path.with_extension("tmp").exists());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn missing_file_gives_defaults() {
    let dir = temp_dir("missing");
    let loaded = Settings::load(Some(&dir.join("nope.txt"))).unwrap();
    assert_eq!(loaded, Settings::default());
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn parse_errors_carry_line_numbers() {
    let err = Settings::parse("# header\ntrajectories=10\nfps=fast\n").unwrap_err();
    assert!(matches!(err, SettingsError::Parse { line: 3, .. }), "{err:?}");
    assert!(err.to_string().contains("line 3"));

    let err = Settings::parse("just words").unwrap_err();
    assert!(matches!(err, SettingsError::Parse { line: 1, .. }));
}

#[test]
fn out_of_range_values_are_clamped_on_load() {
    let s = Settings::parse("trajectories=0\nmax_iterations=99999999\nscale=100\n").unwrap();
    assert_eq!(s.trajectories, 1);
    assert_eq!(s.max_iterations, 100_000);
    assert_eq!(s.scale, 10.0);
}

#[test]
fn shared_settings_updates_are_visible_to_snapshots() {
    let shared = SharedSettings::new(Settings::default());
    let other = shared.clone();
    other.update(|s| s.adjust(Knob::Trajectories, 1));
    assert_eq!(shared.snapshot().trajectories, 375);
    let params = shared.snapshot().to_tick_params();
    assert_eq!(params.target, 375);
}
