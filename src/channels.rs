use crate::trajectory::TrajectoryId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Channel {
    pub id: TrajectoryId,
    pub amplitude: f64,
}

/// Bounded key -> amplitude table for sonified trajectories.
///
/// Entries keep insertion order so the oldest can be dropped first. The table
/// does not enforce a capacity and does not know whether its keys are still
/// alive; the pool manager owns both rules.
#[derive(Debug, Clone, Default)]
pub struct ChannelTable {
    entries: Vec<Channel>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `id`, or overwrites its amplitude in place if already present.
    pub fn add(&mut self, id: TrajectoryId, amplitude: f64) {
        match self.entries.iter_mut().find(|c| c.id == id) {
            Some(existing) => existing.amplitude = amplitude,
            None => self.entries.push(Channel { id, amplitude }),
        }
    }

    pub fn remove(&mut self, id: TrajectoryId) -> bool {
        match self.position(id) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: TrajectoryId) -> bool {
        self.position(id).is_some()
    }

    pub fn amplitude(&self, id: TrajectoryId) -> Option<f64> {
        self.entries.iter().find(|c| c.id == id).map(|c| c.amplitude)
    }

    /// Lowest-amplitude entry; the earlier entry wins ties. `None` when empty.
    pub fn find_quietest(&self) -> Option<TrajectoryId> {
        let mut best: Option<&Channel> = None;
        for c in &self.entries {
            if best.is_none_or(|b| c.amplitude < b.amplitude) {
                best = Some(c);
            }
        }
        best.map(|c| c.id)
    }

    /// Swaps `old` out for `new` in one step.
    pub fn replace_quietest(&mut self, old: TrajectoryId, new: TrajectoryId, amplitude: f64) {
        self.remove(old);
        self.add(new, amplitude);
    }

    pub fn remove_oldest(&mut self) -> Option<TrajectoryId> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries.remove(0).id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.entries.iter()
    }

    fn position(&self, id: TrajectoryId) -> Option<usize> {
        self.entries.iter().position(|c| c.id == id)
    }
}
