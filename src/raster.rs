use crate::generator::{Bulb, BulbFilter, Mode};
use crate::pool::TrajectoryView;

pub type Rgb = (u8, u8, u8);

pub const BACKGROUND: Rgb = (0, 0, 0);
pub const OTHER: Rgb = (255, 255, 255);
pub const PLAYING: Rgb = (128, 255, 0);

/// Colour for a trajectory that is not currently sonified.
pub fn bulb_color(bulb: Bulb) -> Rgb {
    match bulb {
        Bulb::MainCardioid => (255, 128, 0),
        Bulb::Head => (204, 0, 0),
        Bulb::Hands => (128, 128, 255),
        Bulb::TopKnot => (255, 255, 0),
        Bulb::Other => OTHER,
    }
}

/// Fixed-size RGBA8 frame shared between the tick loop and its consumers.
#[derive(Clone)]
pub struct Raster {
    width: usize,
    height: usize,
    rgba: Vec<u8>,
}

impl Raster {
    pub fn new(width: usize, height: usize) -> Self {
        let mut r = Self {
            width,
            height,
            rgba: vec![0u8; width.saturating_mul(height).saturating_mul(4)],
        };
        r.clear(BACKGROUND);
        r
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    pub fn clear(&mut self, (r, g, b): Rgb) {
        for px in self.rgba.chunks_exact_mut(4) {
            px[0] = r;
            px[1] = g;
            px[2] = b;
            px[3] = 255;
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y * self.width + x) * 4;
        Some((self.rgba[i], self.rgba[i + 1], self.rgba[i + 2]))
    }

    /// Source-over blend of one pixel; out-of-bounds coordinates are ignored.
    pub fn blend(&mut self, x: i64, y: i64, (r, g, b): Rgb, alpha: f32) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return;
        }
        let a = alpha.clamp(0.0, 1.0);
        let i = (y as usize * self.width + x as usize) * 4;
        let mix = |dst: u8, src: u8| -> u8 {
            (dst as f32 + (src as f32 - dst as f32) * a).round().clamp(0.0, 255.0) as u8
        };
        self.rgba[i] = mix(self.rgba[i], r);
        self.rgba[i + 1] = mix(self.rgba[i + 1], g);
        self.rgba[i + 2] = mix(self.rgba[i + 2], b);
    }

    /// Bresenham line with the endpoint included.
    pub fn line(&mut self, (x0, y0): (i64, i64), (x1, y1): (i64, i64), color: Rgb, alpha: f32) {
        // Far off-screen segments are common at high zoom; skip them outright.
        let (w, h) = (self.width as i64, self.height as i64);
        if (x0 < 0 && x1 < 0) || (y0 < 0 && y1 < 0) || (x0 >= w && x1 >= w) || (y0 >= h && y1 >= h) {
            return;
        }
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);
        loop {
            self.blend(x, y, color, alpha);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }
}

/// How trails are laid out on the raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailStyle {
    /// Segments drawn behind each trajectory's cursor.
    pub segments: usize,
    /// Pixels per unit, as a fraction of the raster width.
    pub scale: f32,
    pub mirror: bool,
    pub mode: Mode,
    pub bulbs: BulbFilter,
}

impl Default for TrailStyle {
    fn default() -> Self {
        Self {
            segments: 20,
            scale: 0.5,
            mirror: true,
            mode: Mode::Escaping,
            bulbs: BulbFilter::ALL,
        }
    }
}

/// Clears `raster` and draws every visible trail.
pub fn rasterize<'a>(
    raster: &mut Raster,
    views: impl IntoIterator<Item = TrajectoryView<'a>>,
    style: &TrailStyle,
) {
    raster.clear(BACKGROUND);
    for v in views {
        if style.mode == Mode::Inclusion && !style.bulbs.enabled(v.bulb) {
            continue;
        }
        let color = if v.sonified { PLAYING } else { bulb_color(v.bulb) };
        draw_trail(raster, &v, style, color);
    }
}

/// Draws the tail ending at the cursor, fading towards the oldest point.
///
/// The real axis runs down the screen (head bulb at the top) and the
/// imaginary axis across; `x + 0.5` puts the neck of the set at the centre.
pub fn draw_trail(raster: &mut Raster, view: &TrajectoryView<'_>, style: &TrailStyle, color: Rgb) {
    let n_points = view.points.len();
    if n_points < 2 {
        return;
    }
    let max_points = style.segments + 1;
    let scale = style.scale as f64 * raster.width() as f64;
    let (cx, cy) = (raster.width() as f64 / 2.0, raster.height() as f64 / 2.0);
    let width = raster.width() as i64;

    let first = (view.cursor + 1).saturating_sub(style.segments);
    let last = (view.cursor + 2).min(n_points - 1);
    let mut prev: Option<(i64, i64)> = None;
    let mut drawn = 0usize;
    for p in view.points.get(first..last).unwrap_or(&[]) {
        let sx = (cx + p.y * scale) as i64;
        let sy = (cy + (p.x + 0.5) * scale) as i64;
        drawn += 1;
        if let Some(from) = prev {
            let alpha = (drawn - 1) as f32 / max_points as f32;
            raster.line(from, (sx, sy), color, alpha * 0.5);
            if style.mirror {
                raster.line((width - from.0, from.1), (width - sx, sy), color, alpha * 0.5);
            }
        }
        prev = Some((sx, sy));
    }
}

/// Box-filters `raster` down to `w`x`h` RGBA pixels for a smaller display.
pub fn downsample(raster: &Raster, w: usize, h: usize, out: &mut Vec<u8>) {
    out.clear();
    out.resize(w.saturating_mul(h).saturating_mul(4), 0);
    if w == 0 || h == 0 || raster.width() == 0 || raster.height() == 0 {
        return;
    }
    let src = raster.rgba();
    let (sw, sh) = (raster.width(), raster.height());
    for y in 0..h {
        let y0 = y * sh / h;
        let y1 = ((y + 1) * sh / h).max(y0 + 1).min(sh);
        for x in 0..w {
            let x0 = x * sw / w;
            let x1 = ((x + 1) * sw / w).max(x0 + 1).min(sw);
            let mut acc = [0u32; 3];
            let mut peak = [0u8; 3];
            for yy in y0..y1 {
                for xx in x0..x1 {
                    let i = (yy * sw + xx) * 4;
                    for c in 0..3 {
                        acc[c] += src[i + c] as u32;
                        peak[c] = peak[c].max(src[i + c]);
                    }
                }
            }
            let n = ((y1 - y0) * (x1 - x0)).max(1) as u32;
            let o = (y * w + x) * 4;
            for c in 0..3 {
                // Thin trails vanish under a plain average; lean towards the peak.
                let avg = (acc[c] / n) as u16;
                out[o + c] = ((avg + peak[c] as u16 * 3) / 4) as u8;
            }
            out[o + 3] = 255;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::{Point, TrajectoryId};

    fn view(points: &[Point], cursor: usize, sonified: bool) -> TrajectoryView<'_> {
        TrajectoryView {
            id: TrajectoryId(1),
            points,
            cursor,
            bulb: Bulb::Other,
            sonified,
        }
    }

    #[test]
    fn blend_ignores_out_of_bounds() {
        let mut r = Raster::new(4, 4);
        r.blend(-1, 0, OTHER, 1.0);
        r.blend(4, 4, OTHER, 1.0);
        assert_eq!(r.pixel(0, 0), Some(BACKGROUND));
    }

    #[test]
    fn full_alpha_line_hits_both_ends() {
        let mut r = Raster::new(8, 8);
        r.line((0, 0), (7, 3), OTHER, 1.0);
        assert_eq!(r.pixel(0, 0), Some(OTHER));
        assert_eq!(r.pixel(7, 3), Some(OTHER));
    }

    #[test]
    fn trail_near_cursor_is_drawn() {
        let pts = vec![Point::new(-0.5, 0.0), Point::new(-0.5, 0.1), Point::new(-0.5, 0.2)];
        let mut r = Raster::new(64, 64);
        let style = TrailStyle {
            segments: 4,
            scale: 0.5,
            mirror: false,
            ..TrailStyle::default()
        };
        rasterize(&mut r, [view(&pts, 1, true)], &style);
        // Point 1 maps to (32 + 0.1*32, 32).
        let (g_r, g_g, _) = r.pixel(35, 32).unwrap();
        assert!(g_g > g_r, "expected a green sonified trail");
    }

    #[test]
    fn inclusion_mode_skips_disabled_bulbs() {
        let pts = vec![Point::new(-0.5, 0.0), Point::new(-0.5, 0.2), Point::new(-0.5, 0.3)];
        let mut r = Raster::new(32, 32);
        let style = TrailStyle {
            mode: Mode::Inclusion,
            bulbs: BulbFilter::ALL.with(Bulb::Other, false),
            ..TrailStyle::default()
        };
        rasterize(&mut r, [view(&pts, 1, false)], &style);
        assert!(r.rgba().chunks_exact(4).all(|px| px[..3] == [0, 0, 0]));
    }

    #[test]
    fn downsample_keeps_bright_isolated_pixels_visible() {
        let mut r = Raster::new(4, 4);
        r.blend(1, 1, OTHER, 1.0);
        let mut out = Vec::new();
        downsample(&r, 2, 2, &mut out);
        assert_eq!(out.len(), 16);
        assert!(out[0] > 128);
        assert_eq!(out[4], 0);
    }
}
