use dmxflow_core::{
    DecodedFrame, DmxFrame, FrameOptions, MergeEngine, MergeStrategy, Protocol, SourceId,
    SourceTracker, Universe, UniverseState, ZeroSourcePolicy,
};
use proptest::prelude::*;
use std::time::{Duration, Instant};

fn admit_all(state: &mut UniverseState, senders: &[(u8, Vec<u8>)]) {
    let tracker = SourceTracker::default();
    let start = Instant::now();
    for (i, (priority, channels)) in senders.iter().enumerate() {
        tracker.admit(
            state,
            DecodedFrame {
                protocol: Protocol::Sacn,
                universe: state.universe(),
                source_id: SourceId::Cid([i as u8; 16]),
                priority: *priority,
                sequence: None,
                channels: DmxFrame::from_slice(channels),
                source_name: None,
                options: FrameOptions::default(),
            },
            start + Duration::from_millis(i as u64),
        );
    }
}

fn sender() -> impl Strategy<Value = (u8, Vec<u8>)> {
    (0u8..=200, prop::collection::vec(any::<u8>(), 0..=512))
}

proptest! {
    #[test]
    fn htp_is_channelwise_max_of_top_priority(senders in prop::collection::vec(sender(), 1..6)) {
        let mut state = UniverseState::new(Universe::new(1).unwrap());
        admit_all(&mut state, &senders);
        MergeEngine::default().recompute(&mut state);

        let top = senders.iter().map(|(p, _)| *p).max().unwrap();
        for ch in 1..=512u16 {
            let expected = senders
                .iter()
                .filter(|(p, _)| *p == top)
                .map(|(_, c)| DmxFrame::from_slice(c).channel(ch).unwrap())
                .max()
                .unwrap();
            prop_assert_eq!(state.reference_frame().channel(ch), Some(expected));
        }
    }

    #[test]
    fn ltp_output_is_one_senders_payload(senders in prop::collection::vec(sender(), 1..6)) {
        let mut state = UniverseState::new(Universe::new(1).unwrap());
        admit_all(&mut state, &senders);
        MergeEngine::new(MergeStrategy::Ltp, ZeroSourcePolicy::HoldLast).recompute(&mut state);

        // Senders are admitted in order, so the last one at top priority is the latest
        let top = senders.iter().map(|(p, _)| *p).max().unwrap();
        let (_, latest) = senders.iter().rev().find(|(p, _)| *p == top).unwrap();
        prop_assert_eq!(state.reference_frame(), &DmxFrame::from_slice(latest));
    }
}
