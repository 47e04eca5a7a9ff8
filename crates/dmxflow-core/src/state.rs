//! Per-universe receive state
//!
//! One [`UniverseState`] exists per universe that has seen traffic. It is a
//! single-writer resource: callers serialise access (the receiver engine
//! keeps each one behind its own lock).

use std::collections::BTreeMap;
use std::time::Instant;

use crate::source::{EvictionTimer, SourceRecord};
use crate::universe::{DmxFrame, SourceId, Universe};

/// Active senders and the merged output of one universe
#[derive(Debug)]
pub struct UniverseState {
    universe: Universe,
    reference_frame: DmxFrame,
    // Ordered so merge tie-breaks do not depend on hash iteration
    sources: BTreeMap<SourceId, SourceRecord>,
    last_packet: Option<Instant>,
}

impl UniverseState {
    /// Fresh state with a blacked-out reference frame and no senders
    pub fn new(universe: Universe) -> Self {
        Self {
            universe,
            reference_frame: DmxFrame::blackout(),
            sources: BTreeMap::new(),
            last_packet: None,
        }
    }

    /// The universe this state belongs to
    pub fn universe(&self) -> Universe {
        self.universe
    }

    /// Current merged frame
    pub fn reference_frame(&self) -> &DmxFrame {
        &self.reference_frame
    }

    /// Active senders, ordered by source id
    pub fn sources(&self) -> &BTreeMap<SourceId, SourceRecord> {
        &self.sources
    }

    pub(crate) fn sources_mut(&mut self) -> &mut BTreeMap<SourceId, SourceRecord> {
        &mut self.sources
    }

    /// When the last packet for this universe arrived
    pub fn last_packet(&self) -> Option<Instant> {
        self.last_packet
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_packet = Some(now);
    }

    /// Swap in a newly merged frame, returning whether any channel changed
    pub(crate) fn replace_frame(&mut self, frame: DmxFrame) -> bool {
        let changed = frame != self.reference_frame;
        self.reference_frame = frame;
        changed
    }

    /// Attach an eviction timer to a sender.
    ///
    /// Returns `false` (and drops, thereby cancelling, the timer) when the
    /// sender is gone or has been refreshed since the timer's generation.
    /// Any previously armed timer is cancelled.
    pub fn arm_timer(&mut self, source_id: &SourceId, timer: EvictionTimer) -> bool {
        match self.sources.get_mut(source_id) {
            Some(record) if record.generation == timer.generation() => {
                record.eviction = Some(timer);
                true
            }
            _ => false,
        }
    }

    /// Cancel every pending eviction timer without touching the senders
    pub fn cancel_timers(&mut self) -> usize {
        self.sources
            .values_mut()
            .filter_map(|record| record.eviction.take())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_blackout() {
        let state = UniverseState::new(Universe::new(3).unwrap());
        assert_eq!(state.universe().get(), 3);
        assert_eq!(state.reference_frame(), &DmxFrame::blackout());
        assert!(state.sources().is_empty());
        assert!(state.last_packet().is_none());
    }

    #[test]
    fn test_replace_frame_reports_change() {
        let mut state = UniverseState::new(Universe::new(1).unwrap());
        assert!(!state.replace_frame(DmxFrame::blackout()));
        assert!(state.replace_frame(DmxFrame::from_slice(&[1])));
        assert!(!state.replace_frame(DmxFrame::from_slice(&[1])));
    }
}
