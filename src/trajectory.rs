use crate::generator::{classify_bulb, iterate, Bulb};
use std::cell::OnceCell;
use std::fmt;
use std::sync::Arc;

/// Number of points sampled around the midpoint by [`Trajectory::guess_amplitude`].
const AMPLITUDE_SAMPLES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Self = Self { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Stable identity assigned by the generator when a trajectory is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrajectoryId(pub u64);

impl fmt::Display for TrajectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One orbit of `z <- z^2 + c`.
///
/// The point sequence is computed once at construction and never changes;
/// only the playback cursor moves. Points are shared behind an `Arc` so the
/// audio side can hold them without copying.
#[derive(Debug)]
pub struct Trajectory {
    id: TrajectoryId,
    cr: f64,
    ci: f64,
    z0: Point,
    max_iterations: usize,
    bailout_sq: f64,
    bulb: Bulb,
    points: Arc<[Point]>,
    cursor: usize,
    amplitude: OnceCell<f64>,
}

impl Trajectory {
    pub fn new(
        id: TrajectoryId,
        cr: f64,
        ci: f64,
        z0: Point,
        max_iterations: usize,
        bailout_sq: f64,
    ) -> Self {
        let points = iterate(cr, ci, z0.x, z0.y, max_iterations, bailout_sq);
        Self::from_parts(id, cr, ci, z0, max_iterations, bailout_sq, points)
    }

    /// Wraps an already iterated orbit; `points` must be what [`iterate`]
    /// returns for these parameters.
    pub(crate) fn from_parts(
        id: TrajectoryId,
        cr: f64,
        ci: f64,
        z0: Point,
        max_iterations: usize,
        bailout_sq: f64,
        points: Vec<Point>,
    ) -> Self {
        Self {
            id,
            cr,
            ci,
            z0,
            max_iterations,
            bailout_sq,
            bulb: classify_bulb(cr, ci),
            points: points.into(),
            cursor: 0,
            amplitude: OnceCell::new(),
        }
    }

    pub fn id(&self) -> TrajectoryId {
        self.id
    }

    pub fn cr(&self) -> f64 {
        self.cr
    }

    pub fn ci(&self) -> f64 {
        self.ci
    }

    pub fn z0(&self) -> Point {
        self.z0
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn bailout_sq(&self) -> f64 {
        self.bailout_sq
    }

    pub fn bulb(&self) -> Bulb {
        self.bulb
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn shared_points(&self) -> Arc<[Point]> {
        Arc::clone(&self.points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// True when the orbit left the bailout radius before `max_iterations`.
    pub fn escaped(&self) -> bool {
        self.len() < self.max_iterations
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves the cursor forward; clamped so it never passes the end.
    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.max(self.cursor).min(self.len());
    }

    pub fn advance(&mut self) {
        if self.cursor < self.len() {
            self.cursor += 1;
        }
    }

    pub fn finished(&self) -> bool {
        self.cursor >= self.len()
    }

    /// Visual/audible energy proxy: spread of x over a window of points at the
    /// middle of the orbit. Computed on first use and cached; the cursor does
    /// not influence it.
    pub fn guess_amplitude(&self) -> f64 {
        *self.amplitude.get_or_init(|| amplitude_of(&self.points))
    }
}

fn amplitude_of(points: &[Point]) -> f64 {
    if points.len() < AMPLITUDE_SAMPLES + 2 {
        return 0.0;
    }
    let start = points.len() / 2 - AMPLITUDE_SAMPLES / 2;
    let window = &points[start..start + AMPLITUDE_SAMPLES];
    let (lo, hi) = window
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.x), hi.max(p.x))
        });
    hi - lo
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::DEFAULT_BAILOUT_SQ;

    fn make(cr: f64, ci: f64, max: usize) -> Trajectory {
        Trajectory::new(TrajectoryId(1), cr, ci, Point::ORIGIN, max, DEFAULT_BAILOUT_SQ)
    }

    #[test]
    fn in_set_orbit_is_not_escaped() {
        let t = make(0.0, 0.0, 50);
        assert_eq!(t.len(), 50);
        assert!(!t.escaped());
        assert_eq!(t.bulb(), Bulb::MainCardioid);
    }

    #[test]
    fn cursor_stops_at_end() {
        let mut t = make(3.0, 0.0, 50);
        assert_eq!(t.len(), 1);
        t.advance();
        t.advance();
        assert_eq!(t.cursor(), 1);
        assert!(t.finished());
    }

    #[test]
    fn set_cursor_never_moves_backwards() {
        let mut t = make(0.0, 0.0, 20);
        t.set_cursor(8);
        t.set_cursor(3);
        assert_eq!(t.cursor(), 8);
        t.set_cursor(500);
        assert_eq!(t.cursor(), 20);
    }

    #[test]
    fn short_orbits_are_silent() {
        let t = make(3.0, 0.0, 50);
        assert_eq!(t.guess_amplitude(), 0.0);
    }

    #[test]
    fn amplitude_is_spread_of_middle_window() {
        let pts = (0..20).map(|i| Point::new(i as f64 * 0.1, 0.0)).collect::<Vec<_>>();
        // Window covers indices 5..15.
        let a = amplitude_of(&pts);
        assert!((a - 0.9).abs() < 1e-12, "got {a}");
    }

    #[test]
    fn amplitude_is_memoized_across_advances() {
        let mut t = make(-0.75, 0.1, 400);
        let first = t.guess_amplitude();
        for _ in 0..100 {
            t.advance();
        }
        assert_eq!(first.to_bits(), t.guess_amplitude().to_bits());
    }
}
