use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::path::PathBuf;

/// Default budget for point storage across the whole pool.
pub const DEFAULT_MEMORY_BUDGET_MB: u64 = 2048;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "twinklebrot",
    version,
    about = "Animated, sonified Mandelbrot trajectories in the terminal"
)]
pub struct Config {
    /// Off-screen raster width in pixels (also the recording size).
    #[arg(long, default_value_t = 640)]
    pub width: usize,

    #[arg(long, default_value_t = 360)]
    pub height: usize,

    /// Fixed seed for a reproducible trajectory sequence.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Substring of the output device name.
    #[arg(long)]
    pub device: Option<String>,

    #[arg(long, default_value_t = false)]
    pub no_audio: bool,

    #[arg(long, default_value_t = false)]
    pub list_devices: bool,

    /// Settings file; defaults to $XDG_CONFIG_HOME/twinklebrot/settings.txt.
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Directory recordings are written to.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub record_path: PathBuf,

    #[arg(long, value_name = "MB", default_value_t = DEFAULT_MEMORY_BUDGET_MB)]
    pub memory_budget_mb: u64,

    /// Log file; without it logging stays off, whatever RUST_LOG says.
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub sync_updates: bool,
}

impl Config {
    pub fn memory_budget_bytes(&self) -> u128 {
        self.memory_budget_mb as u128 * 1024 * 1024
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.width < 2 || self.height < 2 {
            anyhow::bail!("--width and --height must be >= 2");
        }
        if self.memory_budget_mb == 0 {
            anyhow::bail!("--memory-budget-mb must be >= 1");
        }
        Ok(())
    }

    /// Logger writing to `--log-file`, filtered by RUST_LOG (default `info`).
    ///
    /// `None` without a log file: the app owns the screen, so nothing may go
    /// to stderr while it runs.
    pub fn log_builder(&self) -> anyhow::Result<Option<env_logger::Builder>> {
        let Some(path) = self.log_file.as_deref() else {
            return Ok(None);
        };
        let file = File::create(path).with_context(|| format!("create log file {}", path.display()))?;
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.target(env_logger::Target::Pipe(Box::new(file)));
        Ok(Some(builder))
    }
}
