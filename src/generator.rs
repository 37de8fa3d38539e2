use crate::trajectory::{Point, Trajectory, TrajectoryId};

/// Squared escape radius used for every generated trajectory.
pub const DEFAULT_BAILOUT_SQ: f64 = 4.0;
/// Smallest bailout accepted by [`iterate`]; an orbit outside radius 2 always escapes.
pub const MIN_BAILOUT_SQ: f64 = 4.0;
/// Hard ceiling on `max_len` / iteration counts.
pub const ITERATION_CEILING: usize = 100_000;

/// Large period bulbs recognised without iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Bulb {
    Other = 0,
    MainCardioid = 1,
    Head = 2,
    Hands = 3,
    TopKnot = 4,
}

impl Bulb {
    pub const COUNT: usize = 5;

    pub const fn all() -> [Self; Self::COUNT] {
        [
            Self::Other,
            Self::MainCardioid,
            Self::Head,
            Self::Hands,
            Self::TopKnot,
        ]
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::all().into_iter().find(|b| b.id() == id)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Other => "Other",
            Self::MainCardioid => "Main Cardioid",
            Self::Head => "Head",
            Self::Hands => "Hands",
            Self::TopKnot => "Top Knot",
        }
    }
}

/// Which trajectories the pool wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Orbits that leave the bailout radius inside the iteration window.
    Escaping,
    /// Orbits presumed to stay bounded for the whole iteration budget.
    Inclusion,
}

impl Mode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Escaping => Self::Inclusion,
            Self::Inclusion => Self::Escaping,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Escaping => "Outside M-Set",
            Self::Inclusion => "Inside M-Set",
        }
    }
}

/// Set of enabled bulb filters, one bit per [`Bulb`] id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BulbFilter(u8);

impl BulbFilter {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0b1_1111);

    pub fn enabled(self, bulb: Bulb) -> bool {
        self.0 & (1 << bulb.id()) != 0
    }

    pub fn with(self, bulb: Bulb, on: bool) -> Self {
        if on {
            Self(self.0 | (1 << bulb.id()))
        } else {
            Self(self.0 & !(1 << bulb.id()))
        }
    }

    pub fn toggled(self, bulb: Bulb) -> Self {
        self.with(bulb, !self.enabled(bulb))
    }

    pub fn any(self) -> bool {
        self.0 & Self::ALL.0 != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl Default for BulbFilter {
    fn default() -> Self {
        Self::ALL
    }
}

/// Closed-form membership tests for the largest bulbs. No iteration.
pub fn classify_bulb(cr: f64, ci: f64) -> Bulb {
    let ci2 = ci * ci;
    if (cr + 1.0) * (cr + 1.0) + ci2 < 0.0625 {
        return Bulb::Head;
    }
    // Inclusive so the cusp at 1/4 and the neck at -3/4 (both bounded) count.
    let q = (cr - 0.25) * (cr - 0.25) + ci2;
    if q * (q + (cr - 0.25)) <= 0.25 * ci2 {
        return Bulb::MainCardioid;
    }
    if (cr + 1.309) * (cr + 1.309) + ci2 < 0.00345 {
        return Bulb::TopKnot;
    }
    let dr = (cr + 0.125) * (cr + 0.125);
    if dr + (ci - 0.744) * (ci - 0.744) < 0.0088 || dr + (ci + 0.744) * (ci + 0.744) < 0.0088 {
        return Bulb::Hands;
    }
    Bulb::Other
}

/// Runs `z <- z^2 + c` from `z0`, returning the visited points.
///
/// Stops as soon as a stored point lies outside the bailout radius, so an
/// escaping orbit is strictly shorter than `max_iterations`; a bounded one is
/// exactly `max_iterations` long. `bailout_sq` below 4 is raised to 4.
pub fn iterate(
    cr: f64,
    ci: f64,
    zr0: f64,
    zi0: f64,
    max_iterations: usize,
    bailout_sq: f64,
) -> Vec<Point> {
    let bailout_sq = bailout_sq.max(MIN_BAILOUT_SQ);
    let mut points = Vec::with_capacity(max_iterations.min(4096));
    let (mut zr, mut zi) = (zr0, zi0);
    for _ in 0..max_iterations {
        let r2 = zr * zr;
        let i2 = zi * zi;
        if r2 + i2 > bailout_sq {
            break;
        }
        zi = 2.0 * zr * zi + ci;
        zr = r2 - i2 + cr;
        points.push(Point::new(zr, zi));
    }
    points.shrink_to_fit();
    points
}

/// Rejection sampler for trajectories. Owns the only random stream in the
/// core so a fixed seed reproduces the exact sequence of trajectories.
pub struct Generator {
    rng: fastrand::Rng,
    next_id: u64,
    bailout_sq: f64,
}

impl Generator {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
            next_id: 1,
            bailout_sq: DEFAULT_BAILOUT_SQ,
        }
    }

    pub fn from_entropy() -> Self {
        Self::with_seed(fastrand::u64(..))
    }

    /// Samples random `c` until one satisfies the length window for `mode`.
    ///
    /// Escaping mode accepts `min_len <= len < max_len` and skips iterating any
    /// `c` inside a known bulb. Inclusion mode accepts `len == max_len` and
    /// spins without drawing anything useful while `bulbs` is empty.
    ///
    /// There is no retry limit: an unsatisfiable window (e.g. `min_len ==
    /// max_len` in escaping mode) never returns. Callers validate first.
    pub fn make_trajectory(
        &mut self,
        min_len: usize,
        max_len: usize,
        mode: Mode,
        bulbs: BulbFilter,
        random_start: bool,
    ) -> Trajectory {
        let mut attempts = 0u64;
        loop {
            attempts += 1;
            let cr = self.signed_unit() * 2.0;
            let ci = self.signed_unit() * 2.0;
            let bulb = classify_bulb(cr, ci);
            match mode {
                Mode::Escaping if bulb != Bulb::Other => continue,
                Mode::Inclusion if !bulbs.any() => continue,
                _ => {}
            }

            let points = iterate(cr, ci, 0.0, 0.0, max_len, self.bailout_sq);
            let len = points.len();
            let accepted = match mode {
                Mode::Escaping => min_len <= len && len < max_len,
                Mode::Inclusion => len == max_len,
            };
            if !accepted {
                continue;
            }

            let id = TrajectoryId(self.next_id);
            self.next_id += 1;
            let mut t = Trajectory::from_parts(id, cr, ci, Point::ORIGIN, max_len, self.bailout_sq, points);
            if random_start {
                let half = (len / 2).max(1);
                t.set_cursor(self.rng.usize(..half));
            }
            log::trace!(
                target: "generator",
                "accepted {} c=({cr:.6}, {ci:.6}) len={len} after {attempts} draws",
                t.id()
            );
            return t;
        }
    }

    fn signed_unit(&mut self) -> f64 {
        let magnitude = self.rng.f64();
        if self.rng.bool() { magnitude } else { -magnitude }
    }
}
