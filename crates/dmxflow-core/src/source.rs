//! Per-sender liveness tracking
//!
//! Neither sACN nor Art-Net has a reliable teardown message, so silence is
//! the disconnect signal: every sender owns an eviction timer that is re-armed
//! on each packet. A timer only evicts if the record still carries the
//! generation the timer was armed with, so an eviction racing a refresh is a
//! no-op.

use serde::{Serialize, Serializer};
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;

use crate::frame::{DecodedFrame, MAX_PRIORITY};
use crate::state::UniverseState;
use crate::universe::{DmxFrame, Protocol, SourceId, Universe};

/// Default sender timeout
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_millis(2500);

/// Sequence numbers this far behind the last one count as late (E1.31 6.7.2)
const SEQUENCE_WINDOW: i8 = -20;

/// Scoped eviction timer owned by a [`SourceRecord`].
///
/// Dropping the timer cancels the scheduled eviction.
#[derive(Debug)]
pub struct EvictionTimer {
    generation: u64,
    handle: Option<AbortHandle>,
}

impl EvictionTimer {
    /// Wrap a scheduled eviction task armed for `generation`
    pub fn new(generation: u64, handle: AbortHandle) -> Self {
        Self {
            generation,
            handle: Some(handle),
        }
    }

    /// Generation of the record when this timer was armed
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Release the timer without cancelling the task (used by the task itself)
    pub fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for EvictionTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// One active sender on one universe
#[derive(Debug)]
pub struct SourceRecord {
    pub source_id: SourceId,
    pub protocol: Protocol,
    pub source_name: Option<String>,
    /// 0-200
    pub priority: u8,
    pub payload: DmxFrame,
    pub last_seen: Instant,
    /// Bumped on every refresh; eviction only fires for the current generation
    pub generation: u64,
    pub sequence: Option<u8>,
    /// Last packet was flagged as preview data
    pub preview: bool,
    pub(crate) eviction: Option<EvictionTimer>,
}

impl SourceRecord {
    fn from_frame(frame: DecodedFrame, now: Instant, generation: u64) -> Self {
        Self {
            source_id: frame.source_id,
            protocol: frame.protocol,
            source_name: frame.source_name,
            priority: frame.priority.min(MAX_PRIORITY),
            payload: frame.channels,
            last_seen: now,
            generation,
            sequence: frame.sequence,
            preview: frame.options.preview,
            eviction: None,
        }
    }
}

/// Why a sender was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// No packet within the timeout
    Timeout,
    /// The sender announced it is stopping
    StreamTerminated,
}

/// Sender lifecycle events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceEvent {
    Connected {
        universe: Universe,
        #[serde(serialize_with = "serialize_display")]
        source_id: SourceId,
        protocol: Protocol,
        source_name: Option<String>,
    },
    Disconnected {
        universe: Universe,
        #[serde(serialize_with = "serialize_display")]
        source_id: SourceId,
        reason: DisconnectReason,
    },
}

fn serialize_display<S: Serializer>(id: &SourceId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}

/// Result of admitting a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub event: Option<SourceEvent>,
    /// Generation to arm the eviction timer with; `None` if the sender is gone
    pub generation: Option<u64>,
    /// The frame's sequence number was behind the sender's last one
    pub out_of_order: bool,
}

/// Tracks active senders per universe and decides when they disconnect
#[derive(Debug, Clone, Copy)]
pub struct SourceTracker {
    timeout: Duration,
}

impl Default for SourceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_TIMEOUT)
    }
}

impl SourceTracker {
    /// Create a tracker with the given sender timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Sender timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a packet from a sender.
    ///
    /// Creates the sender's record on first sight (emitting `Connected`) or
    /// refreshes it. Late frames are flagged but still applied.
    pub fn admit(&self, state: &mut UniverseState, frame: DecodedFrame, now: Instant) -> Admission {
        debug_assert_eq!(frame.universe, state.universe());
        state.touch(now);

        let universe = state.universe();
        let source_id = frame.source_id;
        let terminated = frame.options.stream_terminated;

        let (event, out_of_order, generation) = match state.sources_mut().get_mut(&source_id) {
            Some(record) => {
                let out_of_order = match (record.sequence, frame.sequence) {
                    (Some(last), Some(next)) => sequence_out_of_order(last, next),
                    _ => false,
                };
                record.generation += 1;
                record.priority = frame.priority.min(MAX_PRIORITY);
                record.payload = frame.channels;
                record.last_seen = now;
                record.sequence = frame.sequence;
                record.preview = frame.options.preview;
                if frame.source_name.is_some() {
                    record.source_name = frame.source_name;
                }
                (None, out_of_order, record.generation)
            }
            None => {
                let event = SourceEvent::Connected {
                    universe,
                    source_id,
                    protocol: frame.protocol,
                    source_name: frame.source_name.clone(),
                };
                tracing::info!(
                    "{} source {} connected on universe {}",
                    frame.protocol,
                    source_id,
                    universe
                );
                let record = SourceRecord::from_frame(frame, now, 0);
                state.sources_mut().insert(source_id, record);
                (Some(event), false, 0)
            }
        };

        if out_of_order {
            tracing::debug!(
                "Packet out of order from {} on universe {}",
                source_id,
                universe
            );
        }

        if terminated {
            // Connected (if any) is superseded; the sender is already gone
            let had_event = event.is_some();
            let disconnected = self.remove(state, &source_id, DisconnectReason::StreamTerminated);
            return Admission {
                event: if had_event { None } else { disconnected },
                generation: None,
                out_of_order,
            };
        }

        Admission {
            event,
            generation: Some(generation),
            out_of_order,
        }
    }

    /// Evict a sender whose timer fired.
    ///
    /// Does nothing unless the record still has the generation the timer was
    /// armed with.
    pub fn expire(
        &self,
        state: &mut UniverseState,
        source_id: &SourceId,
        armed_generation: u64,
    ) -> Option<SourceEvent> {
        let current = state.sources().get(source_id)?.generation;
        if current != armed_generation {
            return None;
        }
        if let Some(timer) = state
            .sources_mut()
            .get_mut(source_id)
            .and_then(|record| record.eviction.take())
        {
            timer.disarm();
        }
        self.remove(state, source_id, DisconnectReason::Timeout)
    }

    fn remove(
        &self,
        state: &mut UniverseState,
        source_id: &SourceId,
        reason: DisconnectReason,
    ) -> Option<SourceEvent> {
        state.sources_mut().remove(source_id)?;
        tracing::info!(
            "Source {} disconnected from universe {} ({:?})",
            source_id,
            state.universe(),
            reason
        );
        Some(SourceEvent::Disconnected {
            universe: state.universe(),
            source_id: *source_id,
            reason,
        })
    }
}

/// E1.31 sequence check: a frame is late if it trails the last one by fewer
/// than 20 steps (modulo 256). Equal numbers also count as late.
pub fn sequence_out_of_order(last: u8, next: u8) -> bool {
    let diff = next.wrapping_sub(last) as i8;
    diff <= 0 && diff > SEQUENCE_WINDOW
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameOptions;

    fn universe() -> Universe {
        Universe::new(1).unwrap()
    }

    fn frame(cid: u8, priority: u8, sequence: u8) -> DecodedFrame {
        DecodedFrame {
            protocol: Protocol::Sacn,
            universe: universe(),
            source_id: SourceId::Cid([cid; 16]),
            priority,
            sequence: Some(sequence),
            channels: DmxFrame::from_slice(&[cid]),
            source_name: Some(format!("console {}", cid)),
            options: FrameOptions::default(),
        }
    }

    #[test]
    fn test_sequence_window() {
        assert!(!sequence_out_of_order(10, 11));
        assert!(sequence_out_of_order(10, 10));
        assert!(sequence_out_of_order(10, 9));
        assert!(!sequence_out_of_order(10, 200));
        // Wrap-around is in order
        assert!(!sequence_out_of_order(255, 0));
        assert!(sequence_out_of_order(0, 250));
    }

    #[test]
    fn test_connect_then_refresh() {
        let tracker = SourceTracker::default();
        let mut state = UniverseState::new(universe());
        let t0 = Instant::now();

        let first = tracker.admit(&mut state, frame(1, 100, 0), t0);
        assert!(matches!(first.event, Some(SourceEvent::Connected { .. })));
        assert_eq!(first.generation, Some(0));

        let second = tracker.admit(&mut state, frame(1, 120, 1), t0 + Duration::from_millis(20));
        assert_eq!(second.event, None);
        assert_eq!(second.generation, Some(1));
        assert!(!second.out_of_order);

        let record = &state.sources()[&SourceId::Cid([1; 16])];
        assert_eq!(record.priority, 120);
        assert_eq!(record.last_seen, t0 + Duration::from_millis(20));
        assert_eq!(state.sources().len(), 1);
    }

    #[test]
    fn test_late_frame_is_flagged_and_applied() {
        let tracker = SourceTracker::default();
        let mut state = UniverseState::new(universe());
        let now = Instant::now();

        tracker.admit(&mut state, frame(1, 100, 5), now);
        let mut late = frame(1, 100, 4);
        late.channels = DmxFrame::from_slice(&[77]);
        let admission = tracker.admit(&mut state, late, now);

        assert!(admission.out_of_order);
        assert_eq!(
            state.sources()[&SourceId::Cid([1; 16])].payload.channel(1),
            Some(77)
        );
    }

    #[test]
    fn test_priority_is_clamped() {
        let tracker = SourceTracker::default();
        let mut state = UniverseState::new(universe());
        tracker.admit(&mut state, frame(1, 255, 0), Instant::now());
        assert_eq!(state.sources()[&SourceId::Cid([1; 16])].priority, 200);
    }

    #[test]
    fn test_expire_respects_generation() {
        let tracker = SourceTracker::default();
        let mut state = UniverseState::new(universe());
        let now = Instant::now();
        let id = SourceId::Cid([1; 16]);

        tracker.admit(&mut state, frame(1, 100, 0), now);
        tracker.admit(&mut state, frame(1, 100, 1), now);

        // Timer armed for the first packet lost the race against the refresh
        assert_eq!(tracker.expire(&mut state, &id, 0), None);
        assert_eq!(state.sources().len(), 1);

        let event = tracker.expire(&mut state, &id, 1);
        assert!(matches!(
            event,
            Some(SourceEvent::Disconnected {
                reason: DisconnectReason::Timeout,
                ..
            })
        ));
        assert!(state.sources().is_empty());

        // Second firing finds nothing
        assert_eq!(tracker.expire(&mut state, &id, 1), None);
    }

    #[test]
    fn test_stream_terminated_removes_immediately() {
        let tracker = SourceTracker::default();
        let mut state = UniverseState::new(universe());
        let now = Instant::now();

        tracker.admit(&mut state, frame(1, 100, 0), now);
        let mut last = frame(1, 100, 1);
        last.options.stream_terminated = true;
        let admission = tracker.admit(&mut state, last, now);

        assert_eq!(admission.generation, None);
        assert!(matches!(
            admission.event,
            Some(SourceEvent::Disconnected {
                reason: DisconnectReason::StreamTerminated,
                ..
            })
        ));
        assert!(state.sources().is_empty());
    }

    #[test]
    fn test_preview_flag_follows_latest_packet() {
        let tracker = SourceTracker::default();
        let mut state = UniverseState::new(universe());
        let now = Instant::now();
        let id = SourceId::Cid([1; 16]);

        let mut preview = frame(1, 100, 0);
        preview.options.preview = true;
        tracker.admit(&mut state, preview, now);
        assert!(state.sources()[&id].preview);

        tracker.admit(&mut state, frame(1, 100, 1), now);
        assert!(!state.sources()[&id].preview);
    }

    #[test]
    fn test_event_serialization() {
        let event = SourceEvent::Disconnected {
            universe: universe(),
            source_id: SourceId::Cid([0; 16]),
            reason: DisconnectReason::Timeout,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"state\":\"disconnected\""));
        assert!(json.contains("\"reason\":\"timeout\""));
    }
}
