//! sACN (E1.31) protocol implementation
//!
//! sACN (Streaming ACN) carries DMX512 over IP multicast. A data packet is
//! three nested PDUs (root, framing, DMP) with every field at a fixed offset,
//! so the decoder reads straight from the datagram without a cursor.

use std::net::{Ipv4Addr, SocketAddr};

use dmxflow_core::{
    DecodedFrame, DmxFrame, FrameOptions, Protocol, SourceId, Universe, CHANNELS_PER_UNIVERSE,
    MAX_PRIORITY,
};

use super::FrameDecoder;
use crate::error::DecodeError;

/// Default sACN port
pub const SACN_PORT: u16 = 5568;

/// Full data packet carrying 512 channels
pub const SACN_PACKET_LEN: usize = 638;

/// ACN packet identifier
const ACN_PACKET_IDENTIFIER: [u8; 12] = *b"ASC-E1.17\0\0\0";

const VECTOR_ROOT_E131_DATA: u32 = 0x0000_0004;
const VECTOR_E131_DATA_PACKET: u32 = 0x0000_0002;
const VECTOR_DMP_SET_PROPERTY: u8 = 0x02;

const OPTION_PREVIEW: u8 = 0x80;
const OPTION_STREAM_TERMINATED: u8 = 0x40;

// Field offsets within a data packet
const OFFSET_PREAMBLE: usize = 0;
const OFFSET_POSTAMBLE: usize = 2;
const OFFSET_IDENTIFIER: usize = 4;
const OFFSET_ROOT_VECTOR: usize = 18;
const OFFSET_CID: usize = 22;
const OFFSET_FRAMING_VECTOR: usize = 40;
const OFFSET_SOURCE_NAME: usize = 44;
const OFFSET_PRIORITY: usize = 108;
const OFFSET_SEQUENCE: usize = 111;
const OFFSET_OPTIONS: usize = 112;
const OFFSET_UNIVERSE: usize = 113;
const OFFSET_DMP_VECTOR: usize = 117;
const OFFSET_START_CODE: usize = 125;
const OFFSET_DMX: usize = 126;

const SOURCE_NAME_LEN: usize = 64;

/// Multicast group for a universe: 239.255.{hi}.{lo}
pub fn multicast_group(universe: Universe) -> Ipv4Addr {
    let [hi, lo] = universe.get().to_be_bytes();
    Ipv4Addr::new(239, 255, hi, lo)
}

/// Stateless decoder for E1.31 data packets
#[derive(Debug, Clone, Copy, Default)]
pub struct SacnDecoder;

impl SacnDecoder {
    /// Decode an E1.31 data packet
    pub fn decode_packet(&self, packet: &[u8]) -> Result<DecodedFrame, DecodeError> {
        if packet.len() < SACN_PACKET_LEN {
            return Err(DecodeError::ShortPacket {
                len: packet.len(),
                needed: SACN_PACKET_LEN,
            });
        }

        if read_u16(packet, OFFSET_PREAMBLE) != 0x0010
            || read_u16(packet, OFFSET_POSTAMBLE) != 0x0000
            || packet[OFFSET_IDENTIFIER..OFFSET_IDENTIFIER + 12] != ACN_PACKET_IDENTIFIER
        {
            return Err(DecodeError::BadHeader(Protocol::Sacn));
        }

        let root_vector = read_u32(packet, OFFSET_ROOT_VECTOR);
        if root_vector != VECTOR_ROOT_E131_DATA {
            return Err(DecodeError::UnsupportedVector {
                layer: "root",
                vector: root_vector,
            });
        }

        let framing_vector = read_u32(packet, OFFSET_FRAMING_VECTOR);
        if framing_vector != VECTOR_E131_DATA_PACKET {
            return Err(DecodeError::UnsupportedVector {
                layer: "framing",
                vector: framing_vector,
            });
        }

        let dmp_vector = packet[OFFSET_DMP_VECTOR];
        if dmp_vector != VECTOR_DMP_SET_PROPERTY {
            return Err(DecodeError::UnsupportedVector {
                layer: "DMP",
                vector: dmp_vector as u32,
            });
        }

        let start_code = packet[OFFSET_START_CODE];
        if start_code != 0x00 {
            return Err(DecodeError::UnsupportedStartCode(start_code));
        }

        let universe = Universe::new(read_u16(packet, OFFSET_UNIVERSE))?;

        let mut cid = [0u8; 16];
        cid.copy_from_slice(&packet[OFFSET_CID..OFFSET_CID + 16]);

        let options = packet[OFFSET_OPTIONS];

        Ok(DecodedFrame {
            protocol: Protocol::Sacn,
            universe,
            source_id: SourceId::Cid(cid),
            priority: packet[OFFSET_PRIORITY].min(MAX_PRIORITY),
            sequence: Some(packet[OFFSET_SEQUENCE]),
            channels: DmxFrame::from_slice(
                &packet[OFFSET_DMX..OFFSET_DMX + CHANNELS_PER_UNIVERSE],
            ),
            source_name: parse_source_name(
                &packet[OFFSET_SOURCE_NAME..OFFSET_SOURCE_NAME + SOURCE_NAME_LEN],
            ),
            options: FrameOptions {
                preview: options & OPTION_PREVIEW != 0,
                stream_terminated: options & OPTION_STREAM_TERMINATED != 0,
            },
        })
    }
}

impl FrameDecoder for SacnDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::Sacn
    }

    fn decode(&self, datagram: &[u8], _peer: SocketAddr) -> Result<DecodedFrame, DecodeError> {
        self.decode_packet(datagram)
    }
}

fn read_u16(packet: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([packet[offset], packet[offset + 1]])
}

fn read_u32(packet: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        packet[offset],
        packet[offset + 1],
        packet[offset + 2],
        packet[offset + 3],
    ])
}

fn parse_source_name(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let name = String::from_utf8_lossy(&bytes[..end]);
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// An E1.31 data packet, for feeding receivers in tests and tools
#[derive(Debug, Clone)]
pub struct SacnPacket {
    pub cid: [u8; 16],
    pub source_name: String,
    pub priority: u8,
    pub sequence: u8,
    pub options: u8,
    pub universe: u16,
    pub channels: [u8; 512],
}

impl SacnPacket {
    /// A packet at default priority (100) with all channels at zero
    pub fn new(universe: u16, cid: [u8; 16]) -> Self {
        Self {
            cid,
            source_name: "DMXFlow".to_string(),
            priority: 100,
            sequence: 0,
            options: 0,
            universe,
            channels: [0; 512],
        }
    }

    /// Set a 1-based channel
    pub fn with_channel(mut self, channel: u16, value: u8) -> Self {
        if let Some(index) = (channel as usize).checked_sub(1) {
            if index < 512 {
                self.channels[index] = value;
            }
        }
        self
    }

    /// Set the priority (0-200)
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set the sequence number
    pub fn with_sequence(mut self, sequence: u8) -> Self {
        self.sequence = sequence;
        self
    }

    /// Mark as the sender's final packet
    pub fn terminated(mut self) -> Self {
        self.options |= OPTION_STREAM_TERMINATED;
        self
    }

    /// Serialise to the 638-byte wire format
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = vec![0u8; SACN_PACKET_LEN];

        // Root Layer
        let mut offset = 0;

        // Preamble Size (16-bit)
        packet[offset..offset + 2].copy_from_slice(&0x0010u16.to_be_bytes());
        offset += 2;

        // Post-amble Size (16-bit)
        packet[offset..offset + 2].copy_from_slice(&0x0000u16.to_be_bytes());
        offset += 2;

        // ACN Packet Identifier (12 bytes)
        packet[offset..offset + 12].copy_from_slice(&ACN_PACKET_IDENTIFIER);
        offset += 12;

        // Flags and Length (16-bit): 0x7000 | (638 - 16)
        let root_length = SACN_PACKET_LEN - 16;
        packet[offset..offset + 2].copy_from_slice(&(0x7000u16 | root_length as u16).to_be_bytes());
        offset += 2;

        packet[offset..offset + 4].copy_from_slice(&VECTOR_ROOT_E131_DATA.to_be_bytes());
        offset += 4;

        packet[offset..offset + 16].copy_from_slice(&self.cid);
        offset += 16;

        // Framing Layer
        let framing_length = SACN_PACKET_LEN - 38;
        packet[offset..offset + 2]
            .copy_from_slice(&(0x7000u16 | framing_length as u16).to_be_bytes());
        offset += 2;

        packet[offset..offset + 4].copy_from_slice(&VECTOR_E131_DATA_PACKET.to_be_bytes());
        offset += 4;

        // Source Name (64 bytes, null-terminated)
        let source_bytes = self.source_name.as_bytes();
        let copy_len = source_bytes.len().min(SOURCE_NAME_LEN - 1);
        packet[offset..offset + copy_len].copy_from_slice(&source_bytes[..copy_len]);
        offset += SOURCE_NAME_LEN;

        packet[offset] = self.priority;
        offset += 1;

        // Synchronization Address - 0 for no sync
        offset += 2;

        packet[offset] = self.sequence;
        offset += 1;

        packet[offset] = self.options;
        offset += 1;

        packet[offset..offset + 2].copy_from_slice(&self.universe.to_be_bytes());
        offset += 2;

        // DMP Layer
        let dmp_length = SACN_PACKET_LEN - 115;
        packet[offset..offset + 2].copy_from_slice(&(0x7000u16 | dmp_length as u16).to_be_bytes());
        offset += 2;

        packet[offset] = VECTOR_DMP_SET_PROPERTY;
        offset += 1;

        // Address Type & Data Type
        packet[offset] = 0xa1;
        offset += 1;

        // First Property Address
        offset += 2;

        // Address Increment
        packet[offset..offset + 2].copy_from_slice(&0x0001u16.to_be_bytes());
        offset += 2;

        // Property value count: start code + 512 channels
        packet[offset..offset + 2].copy_from_slice(&513u16.to_be_bytes());
        offset += 2;

        // DMX Start Code
        packet[offset] = 0x00;
        offset += 1;

        packet[offset..offset + 512].copy_from_slice(&self.channels);

        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "192.168.1.20:5568".parse().unwrap()
    }

    #[test]
    fn test_multicast_group() {
        assert_eq!(
            multicast_group(Universe::new(1).unwrap()),
            Ipv4Addr::new(239, 255, 0, 1)
        );
        assert_eq!(
            multicast_group(Universe::new(0x1234).unwrap()),
            Ipv4Addr::new(239, 255, 0x12, 0x34)
        );
    }

    #[test]
    fn test_packet_layout_offsets() {
        let packet = SacnPacket::new(7, [9; 16])
            .with_priority(150)
            .with_sequence(42)
            .with_channel(1, 255)
            .encode();

        assert_eq!(packet.len(), SACN_PACKET_LEN);
        assert_eq!(&packet[4..16], b"ASC-E1.17\0\0\0");
        assert_eq!(packet[OFFSET_PRIORITY], 150);
        assert_eq!(packet[OFFSET_SEQUENCE], 42);
        assert_eq!(&packet[OFFSET_UNIVERSE..OFFSET_UNIVERSE + 2], &[0, 7]);
        assert_eq!(packet[OFFSET_START_CODE], 0x00);
        assert_eq!(packet[OFFSET_DMX], 255);
    }

    #[test]
    fn test_decode_full_packet() {
        let packet = SacnPacket::new(1, [0xab; 16])
            .with_channel(1, 255)
            .with_channel(2, 128)
            .with_channel(512, 7)
            .with_sequence(3)
            .encode();

        let frame = SacnDecoder.decode(&packet, peer()).unwrap();
        assert_eq!(frame.protocol, Protocol::Sacn);
        assert_eq!(frame.universe.get(), 1);
        assert_eq!(frame.source_id, SourceId::Cid([0xab; 16]));
        assert_eq!(frame.priority, 100);
        assert_eq!(frame.sequence, Some(3));
        assert_eq!(frame.source_name.as_deref(), Some("DMXFlow"));
        assert_eq!(frame.channels.as_slice(), &packet[126..638]);
        assert_eq!(frame.channels.channel(512), Some(7));
        assert_eq!(frame.options, FrameOptions::default());
    }

    #[test]
    fn test_short_packet() {
        let packet = SacnPacket::new(1, [1; 16]).encode();
        assert_eq!(
            SacnDecoder.decode(&packet[..637], peer()),
            Err(DecodeError::ShortPacket {
                len: 637,
                needed: 638
            })
        );
        assert!(matches!(
            SacnDecoder.decode(&[], peer()),
            Err(DecodeError::ShortPacket { .. })
        ));
    }

    #[test]
    fn test_bad_identifier() {
        let mut packet = SacnPacket::new(1, [1; 16]).encode();
        packet[4] = b'X';
        assert_eq!(
            SacnDecoder.decode(&packet, peer()),
            Err(DecodeError::BadHeader(Protocol::Sacn))
        );
    }

    #[test]
    fn test_non_data_vectors_rejected() {
        let mut sync = SacnPacket::new(1, [1; 16]).encode();
        sync[OFFSET_ROOT_VECTOR + 3] = 0x08;
        assert!(matches!(
            SacnDecoder.decode(&sync, peer()),
            Err(DecodeError::UnsupportedVector { layer: "root", .. })
        ));

        let mut discovery = SacnPacket::new(1, [1; 16]).encode();
        discovery[OFFSET_FRAMING_VECTOR + 3] = 0x01;
        assert!(matches!(
            SacnDecoder.decode(&discovery, peer()),
            Err(DecodeError::UnsupportedVector {
                layer: "framing",
                ..
            })
        ));
    }

    #[test]
    fn test_alternate_start_code_rejected() {
        let mut packet = SacnPacket::new(1, [1; 16]).encode();
        packet[OFFSET_START_CODE] = 0xdd;
        assert_eq!(
            SacnDecoder.decode(&packet, peer()),
            Err(DecodeError::UnsupportedStartCode(0xdd))
        );
    }

    #[test]
    fn test_universe_out_of_range() {
        let packet = SacnPacket::new(0, [1; 16]).encode();
        assert_eq!(
            SacnDecoder.decode(&packet, peer()),
            Err(DecodeError::InvalidUniverse(0))
        );
        let packet = SacnPacket::new(64000, [1; 16]).encode();
        assert_eq!(
            SacnDecoder.decode(&packet, peer()),
            Err(DecodeError::InvalidUniverse(64000))
        );
    }

    #[test]
    fn test_options_and_priority_clamp() {
        let mut packet = SacnPacket::new(1, [1; 16]).with_priority(250).terminated();
        packet.options |= OPTION_PREVIEW;
        let frame = SacnDecoder.decode(&packet.encode(), peer()).unwrap();
        assert_eq!(frame.priority, 200);
        assert!(frame.options.preview);
        assert!(frame.options.stream_terminated);
    }

    #[test]
    fn test_empty_source_name() {
        let mut packet = SacnPacket::new(1, [1; 16]);
        packet.source_name.clear();
        let frame = SacnDecoder.decode(&packet.encode(), peer()).unwrap();
        assert_eq!(frame.source_name, None);
    }
}
