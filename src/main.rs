use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cfg = twinklebrot::config::Config::parse();
    // Without --log-file no logger is installed, so the log macros stay silent.
    if let Some(mut logger) = cfg.log_builder()? {
        logger.init();
    }
    if cfg.list_devices {
        twinklebrot::audio::list_output_devices()?;
        return Ok(());
    }
    cfg.validate()?;

    twinklebrot::app::run(cfg)
}
