use crate::channels::ChannelTable;
use crate::generator::{Bulb, BulbFilter, Generator, Mode, ITERATION_CEILING};
use crate::trajectory::{Point, Trajectory, TrajectoryId};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Default sonification threshold for [`Trajectory::guess_amplitude`].
pub const DEFAULT_AUDIBILITY: f64 = 0.5;

/// Constraints the pool is steered by. Read fresh every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickParams {
    pub target: usize,
    pub min_len: usize,
    pub max_len: usize,
    pub mode: Mode,
    pub bulbs: BulbFilter,
    pub audio_target: usize,
    pub audibility: f64,
    pub random_start: bool,
}

impl Default for TickParams {
    fn default() -> Self {
        Self {
            target: 300,
            min_len: 10,
            max_len: 900,
            mode: Mode::Escaping,
            bulbs: BulbFilter::ALL,
            audio_target: 0,
            audibility: DEFAULT_AUDIBILITY,
            random_start: true,
        }
    }
}

impl TickParams {
    /// True when replenishing can terminate for these constraints.
    pub fn can_replenish(&self) -> bool {
        if self.min_len >= self.max_len {
            return false;
        }
        match self.mode {
            Mode::Escaping => true,
            Mode::Inclusion => self.bulbs.any(),
        }
    }

    /// Worst-case bytes of point storage a full pool could hold.
    pub fn estimated_bytes(&self) -> u128 {
        self.target as u128 * self.max_len as u128 * std::mem::size_of::<Point>() as u128
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    ResourceExhausted { requested_bytes: u128, budget_bytes: u128 },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted { requested_bytes, budget_bytes } => write!(
                f,
                "trajectory pool would need {} MiB (budget {} MiB)",
                requested_bytes >> 20,
                budget_bytes >> 20
            ),
        }
    }
}

impl std::error::Error for PoolError {}

/// Counters describing what one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub reset: bool,
    pub finished: usize,
    pub out_of_window: usize,
    pub filtered: usize,
    pub audio_evicted: usize,
    pub overflow_evicted: usize,
    pub generated: usize,
    pub admitted: usize,
    pub promoted: bool,
    pub swapped: bool,
}

/// What the rasterizer needs to draw one trajectory.
#[derive(Debug, Clone, Copy)]
pub struct TrajectoryView<'a> {
    pub id: TrajectoryId,
    pub points: &'a [Point],
    pub cursor: usize,
    pub bulb: Bulb,
    pub sonified: bool,
}

/// A sonified trajectory as handed to the audio side.
#[derive(Debug, Clone)]
pub struct Voice {
    pub id: TrajectoryId,
    pub points: Arc<[Point]>,
    pub amplitude: f64,
}

/// Keeps a target-sized, constraint-satisfying working set of trajectories and
/// decides which of them hold an audio channel.
pub struct PoolManager {
    generator: Generator,
    pool: VecDeque<Trajectory>,
    channels: ChannelTable,
    last_mode: Option<Mode>,
    budget_bytes: u128,
}

impl PoolManager {
    pub fn new(generator: Generator, budget_bytes: u128) -> Self {
        Self {
            generator,
            pool: VecDeque::new(),
            channels: ChannelTable::new(),
            last_mode: None,
            budget_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn trajectories(&self) -> impl Iterator<Item = &Trajectory> {
        self.pool.iter()
    }

    pub fn is_sonified(&self, id: TrajectoryId) -> bool {
        self.channels.contains(id)
    }

    pub fn views(&self) -> impl Iterator<Item = TrajectoryView<'_>> {
        self.pool.iter().map(|t| TrajectoryView {
            id: t.id(),
            points: t.points(),
            cursor: t.cursor(),
            bulb: t.bulb(),
            sonified: self.channels.contains(t.id()),
        })
    }

    /// Admitted channels in allocation order, with their point sequences.
    pub fn voices(&self) -> Vec<Voice> {
        self.channels
            .iter()
            .filter_map(|c| {
                let t = self.pool.iter().find(|t| t.id() == c.id)?;
                Some(Voice {
                    id: c.id,
                    points: t.shared_points(),
                    amplitude: c.amplitude,
                })
            })
            .collect()
    }

    /// Checks the constraints against the memory budget without touching the pool.
    pub fn validate(&self, params: &TickParams) -> Result<(), PoolError> {
        let requested_bytes = params.estimated_bytes();
        if requested_bytes > self.budget_bytes {
            return Err(PoolError::ResourceExhausted {
                requested_bytes,
                budget_bytes: self.budget_bytes,
            });
        }
        Ok(())
    }

    /// One step of the animation: advance, evict, replenish, allocate audio.
    ///
    /// A tick that sees the mode flip clears the pool and the channel table
    /// and returns straight away; refilling starts on the following tick.
    pub fn tick(&mut self, params: &TickParams) -> Result<TickReport, PoolError> {
        self.validate(params)?;
        let mut report = TickReport::default();

        let mode_changed = self.last_mode.is_some_and(|m| m != params.mode);
        self.last_mode = Some(params.mode);
        if mode_changed {
            log::debug!(target: "pool", "mode changed to {:?}; dropping {} trajectories", params.mode, self.pool.len());
            self.pool.clear();
            self.channels.clear();
            report.reset = true;
            return Ok(report);
        }

        for t in &mut self.pool {
            t.advance();
        }

        let mut doomed = HashSet::<TrajectoryId>::new();
        for t in &self.pool {
            if t.finished() {
                report.finished += 1;
                doomed.insert(t.id());
            } else if t.len() < params.min_len || t.len() > params.max_len {
                report.out_of_window += 1;
                doomed.insert(t.id());
            } else if params.mode == Mode::Inclusion && !params.bulbs.enabled(t.bulb()) {
                report.filtered += 1;
                doomed.insert(t.id());
            }
        }

        while self.channels.len() > params.audio_target {
            let Some(id) = self.channels.remove_oldest() else {
                break;
            };
            report.audio_evicted += 1;
            doomed.insert(id);
        }

        if !doomed.is_empty() {
            for id in &doomed {
                self.channels.remove(*id);
            }
            self.pool.retain(|t| !doomed.contains(&t.id()));
        }

        while self.pool.len() > params.target {
            let Some(oldest) = self.pool.pop_front() else {
                break;
            };
            self.channels.remove(oldest.id());
            report.overflow_evicted += 1;
        }

        self.replenish(params, &mut report);
        self.allocate_audio(params, &mut report);

        log::trace!(target: "pool", "{report:?}");
        Ok(report)
    }

    fn replenish(&mut self, params: &TickParams, report: &mut TickReport) {
        if self.pool.len() >= params.target {
            return;
        }
        if !params.can_replenish() {
            log::debug!(
                target: "pool",
                "replenish skipped: window [{}, {}) mode {:?} bulbs {:#07b}",
                params.min_len,
                params.max_len,
                params.mode,
                params.bulbs.bits()
            );
            return;
        }
        let max_len = params.max_len.min(ITERATION_CEILING);
        while self.pool.len() < params.target {
            let t = self.generator.make_trajectory(
                params.min_len,
                max_len,
                params.mode,
                params.bulbs,
                params.random_start,
            );
            self.pool.push_back(t);
            report.generated += 1;
        }
    }

    fn allocate_audio(&mut self, params: &TickParams, report: &mut TickReport) {
        let target = params.audio_target;

        for t in &self.pool {
            if self.channels.len() >= target {
                break;
            }
            let amp = t.guess_amplitude();
            if amp > params.audibility && !self.channels.contains(t.id()) {
                self.channels.add(t.id(), amp);
                report.admitted += 1;
            }
        }

        // One opportunistic promotion per tick: add while there is headroom,
        // otherwise swap out the quietest channel for a louder trajectory.
        let mut loudest: Option<(TrajectoryId, f64)> = None;
        for t in &self.pool {
            if self.channels.contains(t.id()) {
                continue;
            }
            let amp = t.guess_amplitude();
            if loudest.is_none_or(|(_, best)| amp > best) {
                loudest = Some((t.id(), amp));
            }
        }
        let Some((id, amp)) = loudest else {
            return;
        };

        if self.channels.len() < target {
            self.channels.add(id, amp);
            report.promoted = true;
            return;
        }

        let Some(quietest) = self.channels.find_quietest() else {
            return;
        };
        if self.channels.amplitude(quietest).is_some_and(|q| amp > q) {
            self.channels.replace_quietest(quietest, id, amp);
            report.swapped = true;
        }
    }
}
