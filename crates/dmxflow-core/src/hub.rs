//! Per-fixture fan-out of merged frames
//!
//! After every merge that changed a universe, the hub slices the new frame
//! into each patched fixture's window and keeps only the fixtures whose
//! slice differs from what was last published. The result is one batched
//! [`ChangeSet`] per universe update.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::patch::PatchRegistry;
use crate::source::SourceEvent;
use crate::universe::{DmxFrame, Universe};

/// Channel values for one fixture
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixtureSlice {
    pub fixture_id: String,
    pub channel_slice: Vec<u8>,
}

/// All fixtures of a universe whose values changed in one update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub universe: Universe,
    pub fixtures: Vec<FixtureSlice>,
}

impl ChangeSet {
    /// Check if no fixture changed
    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }
}

/// Receive status reported by the heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    /// Some universe received a packet within the timeout
    Connected,
    /// Nothing heard within the timeout
    Waiting,
}

/// Messages published to downstream consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    Update(ChangeSet),
    Heartbeat { heartbeat: HeartbeatStatus },
    Sender { event: SourceEvent },
}

/// Remembers the last published slice of every fixture
#[derive(Debug, Default)]
pub struct DistributionHub {
    published: HashMap<String, Vec<u8>>,
}

impl DistributionHub {
    /// Create a hub with nothing published yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the change-set for a new merged frame of `universe`.
    ///
    /// Fixtures never published before are always included. The returned
    /// set may be empty; callers should not publish empty sets.
    pub fn on_frame_changed(
        &mut self,
        universe: Universe,
        frame: &DmxFrame,
        registry: &PatchRegistry,
    ) -> ChangeSet {
        let mut fixtures = Vec::new();

        for entry in registry.entries_for_universe(universe) {
            let slice = frame.window(entry.start_address, entry.footprint);
            if self
                .published
                .get(&entry.fixture_id)
                .is_some_and(|last| last.as_slice() == slice)
            {
                continue;
            }
            self.published
                .insert(entry.fixture_id.clone(), slice.to_vec());
            fixtures.push(FixtureSlice {
                fixture_id: entry.fixture_id,
                channel_slice: slice.to_vec(),
            });
        }

        ChangeSet { universe, fixtures }
    }

    /// Forget a fixture's last slice so it is republished if patched again
    pub fn forget(&mut self, fixture_id: &str) {
        self.published.remove(fixture_id);
    }

    /// Last slice published for a fixture
    pub fn last_published(&self, fixture_id: &str) -> Option<&[u8]> {
        self.published.get(fixture_id).map(Vec::as_slice)
    }

    /// Heartbeat status from the last packet time of each universe
    pub fn heartbeat(
        last_packets: impl IntoIterator<Item = Option<Instant>>,
        now: Instant,
        timeout: Duration,
    ) -> HeartbeatStatus {
        let alive = last_packets
            .into_iter()
            .flatten()
            .any(|at| now.saturating_duration_since(at) < timeout);
        if alive {
            HeartbeatStatus::Connected
        } else {
            HeartbeatStatus::Waiting
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchEntry;

    fn universe() -> Universe {
        Universe::new(1).unwrap()
    }

    fn registry() -> PatchRegistry {
        PatchRegistry::from_entries([
            PatchEntry::new("f1", "RGB", universe(), 1, 3),
            PatchEntry::new("f2", "Dimmer", universe(), 10, 1),
        ])
        .unwrap()
    }

    #[test]
    fn test_first_frame_publishes_every_fixture() {
        let mut hub = DistributionHub::new();
        let frame = DmxFrame::from_slice(&[255, 128]);
        let set = hub.on_frame_changed(universe(), &frame, &registry());

        assert_eq!(set.fixtures.len(), 2);
        assert_eq!(set.fixtures[0].fixture_id, "f1");
        assert_eq!(set.fixtures[0].channel_slice, vec![255, 128, 0]);
        assert_eq!(set.fixtures[1].channel_slice, vec![0]);
    }

    #[test]
    fn test_identical_frame_yields_empty_set() {
        let mut hub = DistributionHub::new();
        let registry = registry();
        let frame = DmxFrame::from_slice(&[1, 2, 3]);

        hub.on_frame_changed(universe(), &frame, &registry);
        let set = hub.on_frame_changed(universe(), &frame, &registry);
        assert!(set.is_empty());
    }

    #[test]
    fn test_only_changed_fixtures_included() {
        let mut hub = DistributionHub::new();
        let registry = registry();
        let mut frame = DmxFrame::blackout();
        hub.on_frame_changed(universe(), &frame, &registry);

        frame.set_channel(10, 42);
        // Channel 20 is unpatched and must not produce anything
        frame.set_channel(20, 1);
        let set = hub.on_frame_changed(universe(), &frame, &registry);

        assert_eq!(
            set.fixtures,
            vec![FixtureSlice {
                fixture_id: "f2".to_string(),
                channel_slice: vec![42],
            }]
        );
        assert_eq!(hub.last_published("f2"), Some(&[42u8][..]));
    }

    #[test]
    fn test_forget_republishes() {
        let mut hub = DistributionHub::new();
        let registry = registry();
        let frame = DmxFrame::blackout();
        hub.on_frame_changed(universe(), &frame, &registry);

        hub.forget("f1");
        let set = hub.on_frame_changed(universe(), &frame, &registry);
        assert_eq!(set.fixtures.len(), 1);
        assert_eq!(set.fixtures[0].fixture_id, "f1");
    }

    #[test]
    fn test_heartbeat_status() {
        let now = Instant::now();
        let timeout = Duration::from_millis(2500);

        assert_eq!(
            DistributionHub::heartbeat([None], now, timeout),
            HeartbeatStatus::Waiting
        );
        assert_eq!(
            DistributionHub::heartbeat([Some(now - Duration::from_secs(3)), Some(now)], now, timeout),
            HeartbeatStatus::Connected
        );
        assert_eq!(
            DistributionHub::heartbeat([Some(now - timeout)], now, timeout),
            HeartbeatStatus::Waiting
        );
    }

    #[test]
    fn test_message_serialization() {
        let msg = HubMessage::Update(ChangeSet {
            universe: universe(),
            fixtures: vec![FixtureSlice {
                fixture_id: "f1".to_string(),
                channel_slice: vec![255, 128, 0],
            }],
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"update","universe":1,"fixtures":[{"fixture_id":"f1","channel_slice":[255,128,0]}]}"#
        );

        let beat = HubMessage::Heartbeat {
            heartbeat: HeartbeatStatus::Waiting,
        };
        assert_eq!(
            serde_json::to_string(&beat).unwrap(),
            r#"{"type":"heartbeat","heartbeat":"waiting"}"#
        );
    }
}
