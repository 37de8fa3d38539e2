mod halfblock;

pub use halfblock::HalfBlockRenderer;

use std::io::Write;

/// One terminal paint: the downsampled raster plus HUD and optional overlay.
pub struct Frame<'a> {
    pub term_cols: u16,
    pub term_rows: u16,
    pub visual_rows: u16,
    pub pixel_width: usize,
    pub pixel_height: usize,
    pub pixels_rgba: &'a [u8],
    pub hud: &'a str,
    pub hud_rows: u16,
    pub overlay: Option<&'a str>,
    pub sync_updates: bool,
}

impl Frame<'_> {
    /// Pixel size a renderer needs for this terminal area, per cell `(w, h)`.
    pub fn pixel_size(cols: u16, visual_rows: u16, per_cell: (usize, usize)) -> (usize, usize) {
        (cols as usize * per_cell.0, visual_rows as usize * per_cell.1)
    }
}

pub trait Renderer {
    fn name(&self) -> &'static str;
    /// Pixels per terminal cell as `(w, h)`.
    fn pixels_per_cell(&self) -> (usize, usize);
    fn render(&mut self, frame: &Frame<'_>, out: &mut dyn Write) -> anyhow::Result<()>;
    /// Forget any cached screen state (after a resize or overlay change).
    fn invalidate(&mut self) {}
}

/// Rows the HUD takes; never the whole screen.
pub fn hud_rows_for(term_rows: u16, show_hud: bool, hud: &str) -> u16 {
    if !show_hud {
        return 0;
    }
    let wanted = hud.lines().count() as u16;
    wanted.min(term_rows.saturating_sub(1))
}

/// Splits each line into `width`-character pieces.
pub fn wrap_lines(width: usize, lines: &[String]) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();
    for line in lines {
        if line.is_empty() {
            out.push(String::new());
            continue;
        }
        let chars = line.chars().collect::<Vec<_>>();
        for chunk in chars.chunks(width) {
            out.push(chunk.iter().collect());
        }
    }
    out
}

/// Centered box over a dimmed screen; the first line is the title.
pub fn draw_overlay_popup(
    out: &mut dyn Write,
    term_cols: u16,
    term_rows: u16,
    text: &str,
) -> anyhow::Result<()> {
    let cols = term_cols as usize;
    let rows = term_rows as usize;
    if text.trim().is_empty() || cols < 8 || rows < 4 {
        return Ok(());
    }

    let inner_max = cols.saturating_sub(6).max(1);
    let lines = wrap_lines(inner_max, &text.lines().map(str::to_string).collect::<Vec<_>>());
    let inner_w = lines
        .iter()
        .map(|l| l.chars().count())
        .max()
        .unwrap_or(1)
        .clamp(1, inner_max);
    let body_h = lines.len().min(rows.saturating_sub(3).max(1));
    let box_w = inner_w + 4;
    let box_h = body_h + 2;
    let left = (cols.saturating_sub(box_w)) / 2 + 1;
    let top = (rows.saturating_sub(box_h)) / 2 + 1;

    out.write_all(b"\x1b[0m\x1b[38;2;220;228;242m\x1b[48;2;2;4;10m")?;
    for row in 1..=rows {
        write!(out, "\x1b[{row};1H\x1b[2K")?;
    }

    let edge = format!("+{}+", "-".repeat(box_w - 2));
    out.write_all(b"\x1b[38;2;236;242;255m\x1b[48;2;10;14;24m")?;
    write!(out, "\x1b[{top};{left}H{edge}")?;
    for (i, line) in lines.iter().take(body_h).enumerate() {
        let row = top + 1 + i;
        let pad = inner_w - line.chars().count().min(inner_w);
        if i == 0 {
            write!(
                out,
                "\x1b[{row};{left}H| \x1b[1m\x1b[38;2;160;255;96m{line}\x1b[22m\x1b[38;2;236;242;255m{} |",
                " ".repeat(pad)
            )?;
        } else {
            write!(out, "\x1b[{row};{left}H| {line}{} |", " ".repeat(pad))?;
        }
    }
    write!(out, "\x1b[{};{left}H{edge}", top + box_h - 1)?;
    out.write_all(b"\x1b[0m")?;
    Ok(())
}
