use serde::Serialize;
use std::collections::VecDeque;

/// One committed-offset sample for a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub offset: i64,
    pub timestamp_ms: i64,
    /// Lag against the high-water mark known when the sample was recorded.
    pub lag: i64,
}

impl Observation {
    /// High-water mark in effect when this sample was recorded.
    pub const fn high_water_mark(&self) -> i64 {
        self.offset + self.lag
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Appended,
    /// Newest sample replaced because the new one arrived within `min_distance`.
    Replaced,
    /// Timestamp not newer than the newest sample; nothing stored.
    OutOfOrder,
}

/// Fixed-capacity window of observations, oldest first.
///
/// Timestamps are strictly increasing and `len() <= capacity()` at all times.
#[derive(Debug, Clone)]
pub struct RingHistory {
    capacity: usize,
    entries: VecDeque<Observation>,
}

impl RingHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, observation: Observation, min_distance_ms: i64) -> PushOutcome {
        if let Some(newest) = self.entries.back_mut() {
            if observation.timestamp_ms <= newest.timestamp_ms {
                return PushOutcome::OutOfOrder;
            }
            // a backwards move is always kept so the window still shows the rewind
            if observation.offset >= newest.offset
                && observation.timestamp_ms.saturating_sub(newest.timestamp_ms) < min_distance_ms
            {
                *newest = observation;
                return PushOutcome::Replaced;
            }
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(observation);
        PushOutcome::Appended
    }

    pub fn latest(&self) -> Option<&Observation> {
        self.entries.back()
    }

    pub fn oldest(&self) -> Option<&Observation> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.entries.iter()
    }

    /// True when any sample has a lower offset than its predecessor.
    pub fn has_rewind(&self) -> bool {
        self.entries
            .iter()
            .zip(self.entries.iter().skip(1))
            .any(|(earlier, later)| later.offset < earlier.offset)
    }
}
