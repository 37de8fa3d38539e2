use anyhow::{Context, bail};
use crossterm::{
    ExecutableCommand, cursor,
    terminal::{self, ClearType},
};
use std::io::{Stdout, Write, stdout};

/// Smallest terminal the half-block view and one HUD row fit in.
pub const MIN_COLS: u16 = 20;
pub const MIN_ROWS: u16 = 4;

/// Raw mode plus alternate screen for as long as the guard lives.
pub struct TerminalGuard {
    restored: bool,
}

impl TerminalGuard {
    pub fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode().context("enable raw mode")?;
        // Exists before the remaining steps so a failure still restores raw mode.
        let guard = Self { restored: false };

        let mut out = stdout();
        out.execute(terminal::EnterAlternateScreen)
            .context("enter alternate screen")?;
        out.execute(terminal::Clear(ClearType::All))
            .context("clear screen")?;
        out.execute(cursor::Hide).context("hide cursor")?;

        Ok(guard)
    }

    pub fn stdout() -> Stdout {
        stdout()
    }

    /// Leaves the alternate screen now, so a message can be printed to the
    /// normal screen before the process exits.
    pub fn restore(mut self) {
        self.leave();
    }

    fn leave(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        let _ = terminal::disable_raw_mode();
        let mut out = stdout();
        let _ = out.write_all(b"\x1b[?2026l\x1b[?7h\x1b[0m");
        let _ = out.flush();
        let _ = out.execute(cursor::Show);
        let _ = out.execute(terminal::LeaveAlternateScreen);
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        self.leave();
    }
}

pub fn checked_size() -> anyhow::Result<(u16, u16)> {
    let (cols, rows) = terminal::size().context("get terminal size")?;
    if cols < MIN_COLS || rows < MIN_ROWS {
        bail!("terminal too small (need at least {MIN_COLS}x{MIN_ROWS}, got {cols}x{rows})");
    }
    Ok((cols, rows))
}
