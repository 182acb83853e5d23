//! State history buffer.
//!
//! Bounded window of the most recent tick states. Tick ids inside the window
//! are contiguous, so lookup by id is an offset from the oldest retained tick.

use std::collections::VecDeque;

use crate::{
    error::{Result, RollbackError},
    tick::{TickId, TickState},
};

/// Retention window of tick states, oldest first.
#[derive(Debug, Clone)]
pub struct History<P, I> {
    states: VecDeque<TickState<P, I>>,
    capacity: usize,
}

impl<P, I> History<P, I> {
    /// Creates a window holding only `genesis`.
    pub fn new(genesis: TickState<P, I>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RollbackError::InvalidConfig(
                "history capacity must be at least 1".into(),
            ));
        }
        let mut states = VecDeque::with_capacity(capacity.min(4096));
        states.push_back(genesis);
        Ok(Self { states, capacity })
    }

    /// Appends `state`, then evicts from the front until within capacity.
    pub fn append(&mut self, state: TickState<P, I>) -> Result<()> {
        let expected = self.latest().tick.next();
        if state.tick != expected {
            return Err(RollbackError::HistoryShape(format!(
                "appended tick {} but expected {}",
                state.tick, expected
            )));
        }
        self.states.push_back(state);
        while self.states.len() > self.capacity {
            self.states.pop_front();
        }
        Ok(())
    }

    /// State at `tick`, `None` if evicted or not yet produced.
    pub fn at(&self, tick: TickId) -> Option<&TickState<P, I>> {
        self.index_of(tick).and_then(|i| self.states.get(i))
    }

    /// Window index of `tick`.
    pub fn index_of(&self, tick: TickId) -> Option<usize> {
        tick.offset_from(self.oldest_tick())
            .filter(|&i| i < self.states.len())
    }

    pub fn get(&self, index: usize) -> Option<&TickState<P, I>> {
        self.states.get(index)
    }

    pub fn latest(&self) -> &TickState<P, I> {
        // Never empty: constructed with genesis, eviction keeps `capacity >= 1`.
        &self.states[self.states.len() - 1]
    }

    pub(crate) fn latest_mut(&mut self) -> &mut TickState<P, I> {
        let last = self.states.len() - 1;
        &mut self.states[last]
    }

    pub fn oldest_tick(&self) -> TickId {
        self.states[0].tick
    }

    pub fn latest_tick(&self) -> TickId {
        self.latest().tick
    }

    /// Overwrites the suffix starting at `index` with `replacement`.
    ///
    /// The replacement must cover exactly the existing suffix and keep its tick
    /// ids; the window length never changes.
    pub fn replace_from(&mut self, index: usize, replacement: Vec<TickState<P, I>>) -> Result<()> {
        let suffix = self.states.len().checked_sub(index).ok_or_else(|| {
            RollbackError::HistoryShape(format!(
                "replace index {index} beyond window of {}",
                self.states.len()
            ))
        })?;
        if replacement.len() != suffix {
            return Err(RollbackError::HistoryShape(format!(
                "replacement of {} states for a suffix of {suffix}",
                replacement.len()
            )));
        }
        for (slot, new) in self.states.range(index..).zip(&replacement) {
            if slot.tick != new.tick {
                return Err(RollbackError::HistoryShape(format!(
                    "replacement tick {} lands on tick {}",
                    new.tick, slot.tick
                )));
            }
        }
        self.states.truncate(index);
        self.states.extend(replacement);
        Ok(())
    }

    /// Replaces the whole window. `states` must be non-empty and contiguous;
    /// only the newest `capacity` are kept.
    pub fn reset(&mut self, states: Vec<TickState<P, I>>) -> Result<()> {
        if states.is_empty() {
            return Err(RollbackError::InvalidSnapshot("no states".into()));
        }
        if let Some(pair) = states.windows(2).find(|w| w[1].tick != w[0].tick.next()) {
            return Err(RollbackError::InvalidSnapshot(format!(
                "tick {} followed by tick {}",
                pair[0].tick, pair[1].tick
            )));
        }
        let skip = states.len().saturating_sub(self.capacity);
        self.states = states.into_iter().skip(skip).collect();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// A window always holds at least one state.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &TickState<P, I>> {
        self.states.iter()
    }
}

impl<P: Clone, I: Clone> History<P, I> {
    /// Copies the window out, oldest first. Payloads are shared, not cloned.
    pub fn to_vec(&self) -> Vec<TickState<P, I>> {
        self.states.iter().cloned().collect()
    }
}
