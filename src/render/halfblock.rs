use crate::render::{Frame, Renderer, draw_overlay_popup};
use std::io::Write;

const HALF_BLOCK: char = '\u{2580}';

type Cell = ((u8, u8, u8), (u8, u8, u8));

/// Two vertical pixels per cell: the upper half as foreground, the lower as
/// background.
///
/// Trails are sparse on a black field, so only cells that changed since the
/// previous paint are rewritten.
pub struct HalfBlockRenderer {
    last_fg: Option<(u8, u8, u8)>,
    last_bg: Option<(u8, u8, u8)>,
    screen: Vec<Cell>,
    screen_cols: usize,
}

impl HalfBlockRenderer {
    pub fn new() -> Self {
        Self {
            last_fg: None,
            last_bg: None,
            screen: Vec::new(),
            screen_cols: 0,
        }
    }
}

impl Default for HalfBlockRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn rgb_at(px: &[u8], i: usize) -> (u8, u8, u8) {
    (px[i], px[i + 1], px[i + 2])
}

impl Renderer for HalfBlockRenderer {
    fn name(&self) -> &'static str {
        "halfblock"
    }

    fn pixels_per_cell(&self) -> (usize, usize) {
        (1, 2)
    }

    fn invalidate(&mut self) {
        self.screen.clear();
    }

    fn render(&mut self, frame: &Frame<'_>, out: &mut dyn Write) -> anyhow::Result<()> {
        let cols = frame.term_cols as usize;
        let visual_rows = frame.visual_rows as usize;
        let (w, h) = (frame.pixel_width, frame.pixel_height);
        if cols == 0 || visual_rows == 0 || w != cols || h != visual_rows * 2 {
            return Ok(());
        }
        if frame.pixels_rgba.len() < w * h * 4 {
            return Ok(());
        }

        let full = frame.overlay.is_some() || self.screen.len() != cols * visual_rows || self.screen_cols != cols;
        if full {
            self.screen = vec![((0, 0, 0), (0, 0, 0)); cols * visual_rows];
            self.screen_cols = cols;
        }

        if frame.sync_updates {
            out.write_all(b"\x1b[?2026h")?;
        }
        out.write_all(b"\x1b[0m\x1b[?7l")?;
        if full {
            out.write_all(b"\x1b[2J")?;
        }
        self.last_fg = None;
        self.last_bg = None;

        for row in 0..visual_rows {
            // `None` until the cursor is known to sit right after the last cell written.
            let mut cursor_at: Option<usize> = None;
            for x in 0..cols {
                let top = rgb_at(frame.pixels_rgba, (row * 2 * w + x) * 4);
                let bot = rgb_at(frame.pixels_rgba, ((row * 2 + 1) * w + x) * 4);
                let slot = &mut self.screen[row * cols + x];
                if !full && *slot == (top, bot) {
                    continue;
                }
                *slot = (top, bot);

                if cursor_at != Some(x) {
                    write!(out, "\x1b[{};{}H", row + 1, x + 1)?;
                }
                if self.last_fg != Some(top) {
                    write!(out, "\x1b[38;2;{};{};{}m", top.0, top.1, top.2)?;
                    self.last_fg = Some(top);
                }
                if self.last_bg != Some(bot) {
                    write!(out, "\x1b[48;2;{};{};{}m", bot.0, bot.1, bot.2)?;
                    self.last_bg = Some(bot);
                }
                write!(out, "{HALF_BLOCK}")?;
                cursor_at = Some(x + 1);
            }
        }

        let mut hud = frame.hud.lines();
        for i in 0..frame.hud_rows as usize {
            write!(out, "\x1b[{};1H\x1b[0m\x1b[2K", visual_rows + i + 1)?;
            if let Some(line) = hud.next() {
                let clipped = line.chars().take(cols).collect::<String>();
                write!(out, "{clipped}")?;
            }
        }

        if let Some(text) = frame.overlay {
            draw_overlay_popup(out, frame.term_cols, frame.term_rows, text)?;
        }

        out.write_all(b"\x1b[?7h")?;
        if frame.sync_updates {
            out.write_all(b"\x1b[?2026l")?;
        }
        out.flush()?;
        Ok(())
    }
}
