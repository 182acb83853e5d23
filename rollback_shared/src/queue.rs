//! Pending input queue.
//!
//! Holds corrections until the loop driver drains them once per callback.
//! Keyed by `(target, participant)`, which gives last-writer-wins coalescing
//! and ascending target order for free.

use std::collections::BTreeMap;

use crate::tick::{Correction, ParticipantId, TickId};

/// Buffered corrections awaiting reconciliation.
#[derive(Debug, Clone)]
pub struct PendingQueue<I> {
    entries: BTreeMap<(TickId, ParticipantId), Correction<I>>,
}

impl<I> Default for PendingQueue<I> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<I> PendingQueue<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `correction`, replacing any entry for the same participant and
    /// target tick. Returns the replaced entry.
    pub fn enqueue(&mut self, correction: Correction<I>) -> Option<Correction<I>> {
        let key = (correction.target, correction.participant.clone());
        self.entries.insert(key, correction)
    }

    /// Removes and returns every entry with `target <= current`, ascending by
    /// target. Later targets stay queued.
    pub fn drain(&mut self, current: TickId) -> Vec<Correction<I>> {
        let later = match current.0.checked_add(1) {
            Some(next) => self
                .entries
                .split_off(&(TickId(next), ParticipantId(String::new()))),
            None => BTreeMap::new(),
        };
        let ready = std::mem::replace(&mut self.entries, later);
        ready.into_values().collect()
    }

    /// Removes and returns every entry targeting a tick before `oldest`.
    pub fn take_stale(&mut self, oldest: TickId) -> Vec<Correction<I>> {
        let keep = self
            .entries
            .split_off(&(oldest, ParticipantId(String::new())));
        let stale = std::mem::replace(&mut self.entries, keep);
        stale.into_values().collect()
    }

    /// Highest queued target, if any.
    pub fn max_target(&self) -> Option<TickId> {
        self.entries.keys().next_back().map(|(t, _)| *t)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
