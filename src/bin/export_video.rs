use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use twinklebrot::audio::{Mixer, VoiceBank};
use twinklebrot::frame_sync::{FrameTap, frame_channel};
use twinklebrot::generator::{Generator, Mode};
use twinklebrot::pool::PoolManager;
use twinklebrot::raster::rasterize;
use twinklebrot::record::{RecordOptions, Recorder};
use twinklebrot::settings::{Knob, Settings};

const DEFAULT_OUTPUT: &str = "twinklebrot.mp4";
const DEFAULT_SEED: u64 = 0x7717_B207;
const DEFAULT_SAMPLE_RATE: u32 = 44_100;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "export_video",
    version,
    about = "Offline, seeded Twinklebrot render to MP4 via ffmpeg"
)]
pub(crate) struct Cli {
    #[arg(long, value_name = "MP4", default_value = DEFAULT_OUTPUT)]
    pub(crate) out: PathBuf,

    #[arg(long, default_value_t = 1280)]
    pub(crate) width: usize,

    #[arg(long, default_value_t = 720)]
    pub(crate) height: usize,

    #[arg(long, default_value_t = 30)]
    pub(crate) fps: u32,

    #[arg(long, default_value_t = 300)]
    pub(crate) frames: usize,

    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub(crate) seed: u64,

    /// Start from a saved settings file instead of the defaults.
    #[arg(long, value_name = "FILE")]
    pub(crate) settings: Option<PathBuf>,

    #[arg(long)]
    pub(crate) trajectories: Option<usize>,

    #[arg(long)]
    pub(crate) min_iterations: Option<usize>,

    #[arg(long)]
    pub(crate) max_iterations: Option<usize>,

    #[arg(long)]
    pub(crate) trail: Option<usize>,

    #[arg(long)]
    pub(crate) scale: Option<f32>,

    #[arg(long)]
    pub(crate) audio_tracks: Option<usize>,

    #[arg(long, default_value_t = false)]
    pub(crate) inclusion: bool,

    #[arg(long, default_value_t = false)]
    pub(crate) no_mirror: bool,

    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    pub(crate) sample_rate: u32,

    #[arg(long, default_value_t = false)]
    pub(crate) no_audio: bool,

    #[arg(long, value_name = "MB", default_value_t = twinklebrot::config::DEFAULT_MEMORY_BUDGET_MB)]
    pub(crate) memory_budget_mb: u64,
}

pub(crate) fn validate_args(args: &Cli) -> Result<()> {
    if args.width < 2 {
        bail!("--width must be >= 2");
    }
    if args.height < 2 {
        bail!("--height must be >= 2");
    }
    if args.fps == 0 {
        bail!("--fps must be >= 1");
    }
    if args.frames == 0 {
        bail!("--frames must be >= 1");
    }
    if args.sample_rate == 0 {
        bail!("--sample-rate must be >= 1");
    }
    Ok(())
}

/// Applies the command-line overrides on top of `base`, clamped to the usual ranges.
pub(crate) fn settings_from_args(args: &Cli, base: Settings) -> Settings {
    let mut s = base;
    let overrides = [
        (Knob::Trajectories, args.trajectories.map(|v| v as f64)),
        (Knob::MinIterations, args.min_iterations.map(|v| v as f64)),
        (Knob::MaxIterations, args.max_iterations.map(|v| v as f64)),
        (Knob::TrailLength, args.trail.map(|v| v as f64)),
        (Knob::Scale, args.scale.map(|v| v as f64)),
        (Knob::AudioTracks, args.audio_tracks.map(|v| v as f64)),
    ];
    for (knob, value) in overrides {
        if let Some(v) = value {
            s.set(knob, v);
        }
    }
    if args.inclusion {
        s.mode = Mode::Inclusion;
    }
    if args.no_mirror {
        s.mirror = false;
    }
    s.fps = args.fps;
    s.rendering = true;
    s
}

/// Mono samples belonging to frame `frame_idx`; sums exactly to `sr` per second.
pub(crate) fn samples_for_frame(frame_idx: usize, sample_rate: u32, fps: u32) -> usize {
    let sr = sample_rate as u64;
    let fps = fps.max(1) as u64;
    let start = frame_idx as u64 * sr / fps;
    let end = (frame_idx as u64 + 1) * sr / fps;
    (end - start) as usize
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Cli::parse();
    run(args)
}

fn run(args: Cli) -> Result<()> {
    validate_args(&args)?;
    let base = Settings::load(args.settings.as_deref())
        .with_context(|| format!("load settings {:?}", args.settings))?;
    let settings = settings_from_args(&args, base);
    let params = settings.to_tick_params();
    if !params.can_replenish() {
        bail!(
            "iteration window [{}, {}) cannot produce trajectories in this mode",
            params.min_len,
            params.max_len
        );
    }
    let style = settings.trail_style();

    let mut pool = PoolManager::new(
        Generator::with_seed(args.seed),
        args.memory_budget_mb as u128 * 1024 * 1024,
    );
    pool.validate(&params)?;

    let voices = Arc::new(VoiceBank::new());
    let mut mixer = Mixer::new(Arc::clone(&voices));
    let sample_rate = (!args.no_audio).then_some(args.sample_rate);
    let mut recorder = Recorder::start(RecordOptions {
        out: args.out.clone(),
        width: args.width,
        height: args.height,
        fps: args.fps,
        sample_rate_hz: sample_rate,
    })?;

    let (mut sync, consumer) = frame_channel(args.width, args.height);
    let mut audio = Vec::new();
    let start = Instant::now();

    for frame_idx in 0..args.frames {
        pool.tick(&params)?;
        voices.publish(pool.voices());

        if let Some(sr) = sample_rate {
            audio.resize(samples_for_frame(frame_idx, sr, args.fps), 0.0);
            mixer.fill_mono(&mut audio);
            recorder.push_audio(&audio).context("write audio")?;
        }

        let published = sync.render_frame(Some(&mut recorder as &mut dyn FrameTap), |raster| {
            rasterize(raster, pool.views(), &style)
        })?;
        if let Some(err) = published.tap_error {
            return Err(err).context("write frame to ffmpeg stdin");
        }
        // Same handshake as the live display, with this thread as the consumer.
        if let Some(token) = consumer.try_ready()? {
            consumer.release(token)?;
        }
        sync.wait_consumed()?;

        if (frame_idx + 1) % args.fps as usize == 0 {
            log::info!(
                "frame {}/{}: {} trajectories, {} sonified",
                frame_idx + 1,
                args.frames,
                pool.len(),
                pool.channels().len()
            );
        }
    }

    let summary = recorder.finish()?;
    println!(
        "exported {} frames @ {} fps ({} audio samples) in {:.1}s -> {}",
        summary.frames,
        args.fps,
        summary.audio_samples,
        start.elapsed().as_secs_f32(),
        summary.path.display()
    );
    Ok(())
}
