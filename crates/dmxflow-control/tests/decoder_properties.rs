use dmxflow_control::dmx::{ArtDmxPacket, ArtNetDecoder, SacnDecoder, SacnPacket};
use dmxflow_control::FrameDecoder;
use proptest::prelude::*;
use std::net::SocketAddr;

fn peer() -> SocketAddr {
    "10.0.0.9:5568".parse().unwrap()
}

proptest! {
    #[test]
    fn test_arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..700)) {
        let _ = SacnDecoder.decode(&bytes, peer());
        let _ = ArtNetDecoder.decode(&bytes, peer());
    }

    #[test]
    fn test_sacn_payload_is_bytes_126_to_638(
        universe in 1u16..=63999,
        channels in proptest::collection::vec(any::<u8>(), 512),
        priority in 0u8..=200,
    ) {
        let mut packet = SacnPacket::new(universe, [5; 16]).with_priority(priority);
        packet.channels.copy_from_slice(&channels);
        let bytes = packet.encode();

        let frame = SacnDecoder.decode(&bytes, peer()).unwrap();
        prop_assert_eq!(frame.universe.get(), universe);
        prop_assert_eq!(frame.priority, priority);
        prop_assert_eq!(frame.channels.as_slice(), &bytes[126..638]);
    }

    #[test]
    fn test_artnet_frame_is_padded_prefix(
        port_address in 0u16..0x8000,
        data in proptest::collection::vec(any::<u8>(), 0..600),
    ) {
        let bytes = ArtDmxPacket::new(port_address).with_data(&data).encode();
        let frame = ArtNetDecoder.decode(&bytes, peer()).unwrap();

        prop_assert_eq!(frame.universe.get(), port_address + 1);
        let kept = data.len().min(512);
        prop_assert_eq!(&frame.channels.as_slice()[..kept], &data[..kept]);
        prop_assert!(frame.channels.as_slice()[kept..].iter().all(|v| *v == 0));
    }
}
