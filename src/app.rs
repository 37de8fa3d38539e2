use crate::audio::{AudioOutput, VoiceBank};
use crate::config::Config;
use crate::engine::{Control, Engine, EngineExit, EngineStatus};
use crate::frame_sync::{FrameConsumer, FrameToken, SyncError, frame_channel};
use crate::generator::{Bulb, Generator, Mode};
use crate::pool::{PoolError, PoolManager};
use crate::raster::downsample;
use crate::record::recording_file_name;
use crate::render::{Frame, HalfBlockRenderer, Renderer, hud_rows_for, wrap_lines};
use crate::settings::{Knob, Settings, SharedSettings, settings_storage_path};
use crate::terminal::{TerminalGuard, checked_size};
use anyhow::Context;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use std::io::BufWriter;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

/// How long the display waits for a frame before servicing input again.
const FRAME_POLL: Duration = Duration::from_millis(25);
/// How long shutdown waits for the tick thread before leaving it behind.
const JOIN_GRACE: Duration = Duration::from_secs(2);
const NOTICE_TTL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    None,
    Quit,
    ToggleRecording,
    /// Screen layout changed; repaint everything.
    Relayout,
}

struct UiState {
    show_hud: bool,
    show_help: bool,
    knob: usize,
}

impl UiState {
    fn new() -> Self {
        Self {
            show_hud: true,
            show_help: false,
            knob: 0,
        }
    }

    fn selected(&self) -> Knob {
        Knob::ALL[self.knob % Knob::ALL.len()]
    }
}

pub fn run(cfg: Config) -> anyhow::Result<()> {
    let settings_path = cfg.settings.clone().or_else(settings_storage_path);
    let initial = match Settings::load(settings_path.as_deref()) {
        Ok(s) => s,
        Err(err) => {
            log::warn!("ignoring settings file: {err}");
            Settings::default()
        }
    };
    let settings = SharedSettings::new(Settings { rendering: true, ..initial });

    let voices = Arc::new(VoiceBank::new());
    let mut startup_notice = None;
    let mut audio = if cfg.no_audio {
        None
    } else {
        match AudioOutput::new(Arc::clone(&voices), cfg.device.as_deref()) {
            Ok(a) => Some(a),
            Err(err) => {
                log::warn!("audio disabled: {err:#}");
                startup_notice = Some(format!("audio disabled: {err}"));
                None
            }
        }
    };

    let generator = match cfg.seed {
        Some(seed) => Generator::with_seed(seed),
        None => Generator::from_entropy(),
    };
    let pool = PoolManager::new(generator, cfg.memory_budget_bytes());
    let (sync, consumer) = frame_channel(cfg.width, cfg.height);
    let (control_tx, control_rx) = crossbeam_channel::unbounded();
    let mut engine = Engine::new(
        pool,
        sync,
        (cfg.width, cfg.height),
        settings.clone(),
        Arc::clone(&voices),
        control_rx,
    );
    if let Some(a) = audio.as_mut() {
        if let Some(tap) = a.take_record_tap() {
            engine = engine.with_record_tap(tap, a.sample_rate_hz);
        }
    }
    let status = engine.status();
    let stop = engine.stop_handle();
    let producer = thread::Builder::new()
        .name("tick".to_string())
        .spawn(move || engine.run())
        .context("spawn tick thread")?;

    let term = TerminalGuard::new()?;
    let display = DisplayLoop {
        cfg: &cfg,
        settings: &settings,
        status: &status,
        consumer: &consumer,
        control_tx: &control_tx,
        notice: startup_notice.map(|n| (n, Instant::now())),
    };
    let ui_result = display.run();

    stop.store(true, Ordering::Relaxed);
    consumer.interrupt();
    drop(consumer);
    let exit = join_with_grace(producer);
    drop(audio);

    let mut final_settings = settings.snapshot();
    if let Some(Err(err)) = &exit {
        if let Some(pool_err @ PoolError::ResourceExhausted { .. }) = err.downcast_ref::<PoolError>() {
            final_settings.trajectories = Settings::default().trajectories;
            save_settings(&final_settings, settings_path.as_deref());
            term.restore();
            eprintln!("Out of memory: {pool_err}.");
            eprintln!(
                "The trajectory count was reset to {}. Restart twinklebrot to continue.",
                final_settings.trajectories
            );
            std::process::exit(1);
        }
    }
    save_settings(&final_settings, settings_path.as_deref());
    drop(term);

    match exit {
        Some(Ok(reason)) => log::info!("tick thread ended: {reason:?}"),
        Some(Err(err)) => return Err(err.context("tick thread failed")),
        None => log::warn!("tick thread still busy after {JOIN_GRACE:?}; leaving it behind"),
    }
    ui_result
}

fn save_settings(s: &Settings, path: Option<&std::path::Path>) {
    if let Err(err) = s.save(path) {
        log::warn!("could not save settings: {err}");
    }
}

/// `None` when the thread is still running after the grace period (for
/// example stuck replenishing an unsatisfiable window).
fn join_with_grace(
    handle: thread::JoinHandle<anyhow::Result<EngineExit>>,
) -> Option<anyhow::Result<EngineExit>> {
    let deadline = Instant::now() + JOIN_GRACE;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(10));
    }
    match handle.join() {
        Ok(r) => Some(r),
        Err(_) => Some(Err(anyhow::anyhow!("tick thread panicked"))),
    }
}

struct DisplayLoop<'a> {
    cfg: &'a Config,
    settings: &'a SharedSettings,
    status: &'a EngineStatus,
    consumer: &'a FrameConsumer,
    control_tx: &'a crossbeam_channel::Sender<Control>,
    notice: Option<(String, Instant)>,
}

impl DisplayLoop<'_> {
    fn run(mut self) -> anyhow::Result<()> {
        let mut out = BufWriter::new(TerminalGuard::stdout());
        let mut renderer = HalfBlockRenderer::new();
        let mut ui = UiState::new();
        let mut size = checked_size()?;
        let mut pixels = Vec::new();
        let mut held: Option<FrameToken> = None;
        let mut fps = FpsCounter::new();
        let mut dirty = true;

        loop {
            while event::poll(Duration::from_millis(0))? {
                match event::read()? {
                    Event::Key(k) if k.kind != KeyEventKind::Release => {
                        match handle_key(k.code, k.modifiers, &mut ui, self.settings) {
                            KeyAction::Quit => return Ok(()),
                            KeyAction::ToggleRecording => self.toggle_recording(),
                            KeyAction::Relayout => renderer.invalidate(),
                            KeyAction::None => {}
                        }
                        dirty = true;
                    }
                    Event::Resize(c, r) => {
                        size = (c, r);
                        renderer.invalidate();
                        dirty = true;
                    }
                    _ => {}
                }
            }

            let settings = self.settings.snapshot();
            if settings.rendering {
                if let Some(token) = held.take() {
                    self.release(token)?;
                }
            }

            let hud = if ui.show_hud {
                self.build_hud(size.0 as usize, &settings, &ui, fps.fps())
            } else {
                String::new()
            };
            let hud_rows = hud_rows_for(size.1, ui.show_hud, &hud);
            let visual_rows = size.1.saturating_sub(hud_rows).max(1);
            let (pw, ph) = Frame::pixel_size(size.0, visual_rows, renderer.pixels_per_cell());

            if held.is_none() {
                match self.consumer.wait_ready(FRAME_POLL) {
                    Ok(Some(token)) => {
                        self.consumer
                            .capture(&token, |raster| downsample(raster, pw, ph, &mut pixels))
                            .map_err(anyhow::Error::from)?;
                        fps.tick();
                        dirty = true;
                        if settings.rendering {
                            self.release(token)?;
                        } else {
                            // Holding the token is what pauses the producer.
                            held = Some(token);
                        }
                    }
                    Ok(None) => {}
                    Err(SyncError::Disconnected) => return Ok(()),
                    Err(err) => return Err(err.into()),
                }
            } else {
                if let Some(token) = held.as_ref().filter(|_| dirty) {
                    // The producer is parked, so the held frame can be re-read at a new size.
                    self.consumer
                        .capture(token, |raster| downsample(raster, pw, ph, &mut pixels))
                        .map_err(anyhow::Error::from)?;
                }
                thread::sleep(FRAME_POLL);
            }

            if !dirty || pixels.len() != pw * ph * 4 {
                continue;
            }
            let frame = Frame {
                term_cols: size.0,
                term_rows: size.1,
                visual_rows,
                pixel_width: pw,
                pixel_height: ph,
                pixels_rgba: &pixels,
                hud: &hud,
                hud_rows,
                overlay: ui.show_help.then_some(HELP_TEXT),
                sync_updates: self.cfg.sync_updates,
            };
            renderer.render(&frame, &mut out)?;
            dirty = false;
        }
    }

    fn release(&self, token: FrameToken) -> anyhow::Result<()> {
        match self.consumer.release(token) {
            Ok(()) | Err(SyncError::Disconnected) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn toggle_recording(&mut self) {
        let control = if self.status.recording.load(Ordering::Relaxed) {
            Control::StopRecording
        } else {
            Control::StartRecording {
                out: recording_file_name(&self.cfg.record_path),
            }
        };
        if self.control_tx.send(control).is_err() {
            self.notice = Some(("tick thread is gone".to_string(), Instant::now()));
        }
    }

    fn build_hud(&mut self, cols: usize, s: &Settings, ui: &UiState, fps: f32) -> String {
        if let Some(n) = self.status.take_notice() {
            self.notice = Some((n, Instant::now()));
        }
        if self.notice.as_ref().is_some_and(|(_, at)| at.elapsed() > NOTICE_TTL) {
            self.notice = None;
        }
        let pool = self.status.pool_size.load(Ordering::Relaxed);
        let channels = self.status.channels.load(Ordering::Relaxed);
        let frame = self.status.frame.load(Ordering::Relaxed);
        let recording = self.status.recording.load(Ordering::Relaxed);
        let notice = self.notice.as_ref().map(|(n, _)| n.as_str());
        build_hud(cols, s, ui.selected(), pool, channels, frame, recording, fps, notice)
    }
}

fn handle_key(code: KeyCode, mods: KeyModifiers, ui: &mut UiState, settings: &SharedSettings) -> KeyAction {
    if mods.contains(KeyModifiers::CONTROL) && matches!(code, KeyCode::Char('c')) {
        return KeyAction::Quit;
    }

    match code {
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => KeyAction::Quit,
        KeyCode::Up => {
            ui.knob = (ui.knob + Knob::ALL.len() - 1) % Knob::ALL.len();
            KeyAction::None
        }
        KeyCode::Down => {
            ui.knob = (ui.knob + 1) % Knob::ALL.len();
            KeyAction::None
        }
        KeyCode::Left | KeyCode::Char('-') => {
            let knob = ui.selected();
            settings.update(|s| s.adjust(knob, -1));
            KeyAction::None
        }
        KeyCode::Right | KeyCode::Char('+') | KeyCode::Char('=') => {
            let knob = ui.selected();
            settings.update(|s| s.adjust(knob, 1));
            KeyAction::None
        }
        KeyCode::Char(' ') => {
            settings.update(|s| s.rendering = !s.rendering);
            KeyAction::None
        }
        KeyCode::Char('m') | KeyCode::Char('M') => {
            settings.update(|s| s.toggle_mode());
            KeyAction::None
        }
        KeyCode::Char('o') | KeyCode::Char('O') => {
            settings.update(|s| s.mirror = !s.mirror);
            KeyAction::None
        }
        KeyCode::Char(c @ '0'..='4') => {
            if let Some(bulb) = Bulb::from_id(c as u8 - b'0') {
                settings.update(|s| s.toggle_bulb(bulb));
            }
            KeyAction::None
        }
        KeyCode::Char('r') | KeyCode::Char('R') => KeyAction::ToggleRecording,
        KeyCode::Char('i') | KeyCode::Char('I') => {
            ui.show_hud = !ui.show_hud;
            KeyAction::Relayout
        }
        KeyCode::Char('?') | KeyCode::Char('h') | KeyCode::Char('H') | KeyCode::F(1) => {
            ui.show_help = !ui.show_help;
            KeyAction::Relayout
        }
        _ => KeyAction::None,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_hud(
    cols: usize,
    s: &Settings,
    selected: Knob,
    pool: usize,
    channels: usize,
    frame: u64,
    recording: bool,
    fps: f32,
    notice: Option<&str>,
) -> String {
    let knobs = Knob::ALL
        .iter()
        .map(|&k| {
            let v = match k {
                Knob::Scale => format!("{:.1}", s.get(k)),
                _ => format!("{}", s.get(k) as u64),
            };
            if k == selected {
                format!("[{} {}]", k.label(), v)
            } else {
                format!("{} {}", k.label(), v)
            }
        })
        .collect::<Vec<_>>()
        .join(" | ");

    let mut status = format!(
        "{} | pool {} | audio {}/{} | frame {} | {:>4.1} fps | mirror {}",
        s.mode.label(),
        pool,
        channels,
        s.audio_tracks,
        frame,
        fps,
        if s.mirror { "on" } else { "off" },
    );
    if s.mode == Mode::Inclusion {
        status.push_str(" | bulbs");
        for bulb in Bulb::all() {
            let mark = if s.bulbs.enabled(bulb) { '+' } else { '-' };
            status.push_str(&format!(" {}{mark}", bulb.id()));
        }
    }
    if recording {
        status.push_str(" | REC");
    }
    if !s.rendering {
        status.push_str(" | PAUSED");
    }

    let mut lines = vec![status, knobs];
    if let Some(n) = notice {
        lines.push(n.to_string());
    }
    lines.push("keys: up/down select | left/right adjust | space pause | m mode | 0-4 bulbs | o mirror | r record | i HUD | ? help | q quit".to_string());
    wrap_lines(cols, &lines).join("\n")
}

const HELP_TEXT: &str = "Twinklebrot\n\
up/down  select a setting\n\
left/right or -/+  adjust it\n\
space  pause / resume\n\
m  switch between outside and inside the M-set\n\
0-4  toggle bulbs (0 other, 1 cardioid, 2 head, 3 hands, 4 top knot)\n\
o  mirror left/right\n\
r  start / stop recording\n\
i  show / hide HUD\n\
? or h or F1  toggle this help\n\
q or esc  quit";

struct FpsCounter {
    last: Instant,
    frames: u32,
    fps: f32,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            last: Instant::now(),
            frames: 0,
            fps: 0.0,
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f32();
        if dt >= 0.5 {
            self.fps = self.frames as f32 / dt;
            self.frames = 0;
            self.last = now;
        }
    }

    fn fps(&self) -> f32 {
        self.fps
    }
}
