//! Art-Net protocol implementation (ArtDmx)
//!
//! Art-Net is a UDP-based protocol for transmitting DMX512 over Ethernet.
//! Only OpDmx packets are decoded; polls and other opcodes are dropped.

use std::net::SocketAddr;

use dmxflow_core::{DecodedFrame, DmxFrame, FrameOptions, Protocol, SourceId, Universe};

use super::FrameDecoder;
use crate::error::DecodeError;

/// Default Art-Net port
pub const ARTNET_PORT: u16 = 6454;

/// Priority given to every Art-Net frame, which carries none on the wire
pub const ARTNET_DEFAULT_PRIORITY: u8 = 100;

const ARTNET_ID: &[u8; 8] = b"Art-Net\0";
const OP_DMX: u16 = 0x5000;
const HEADER_LEN: usize = 18;

/// Stateless decoder for ArtDmx packets
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtNetDecoder;

impl ArtNetDecoder {
    /// Decode an ArtDmx packet. Art-Net has no sender id, so the peer address
    /// identifies the source.
    pub fn decode_packet(
        &self,
        packet: &[u8],
        peer: SocketAddr,
    ) -> Result<DecodedFrame, DecodeError> {
        if packet.len() < HEADER_LEN {
            return Err(DecodeError::ShortPacket {
                len: packet.len(),
                needed: HEADER_LEN,
            });
        }

        if &packet[0..8] != ARTNET_ID {
            return Err(DecodeError::BadHeader(Protocol::ArtNet));
        }

        // OpCode is little-endian
        let opcode = u16::from_le_bytes([packet[8], packet[9]]);
        if opcode != OP_DMX {
            return Err(DecodeError::UnsupportedOpcode(opcode));
        }

        // Sequence 0 means the sender does not sequence
        let sequence = match packet[12] {
            0 => None,
            n => Some(n),
        };

        // Port-Address is little-endian, 15 bits
        let port_address = u16::from_le_bytes([packet[14], packet[15]]);
        let universe = Universe::from_artnet(port_address)?;

        // Length is big-endian
        let length = u16::from_be_bytes([packet[16], packet[17]]) as usize;
        let needed = HEADER_LEN + length;
        if packet.len() < needed {
            return Err(DecodeError::ShortPacket {
                len: packet.len(),
                needed,
            });
        }

        Ok(DecodedFrame {
            protocol: Protocol::ArtNet,
            universe,
            source_id: SourceId::Address(peer),
            priority: ARTNET_DEFAULT_PRIORITY,
            sequence,
            // Padded with zeros below 512, truncated above
            channels: DmxFrame::from_slice(&packet[HEADER_LEN..needed]),
            source_name: None,
            options: FrameOptions::default(),
        })
    }
}

impl FrameDecoder for ArtNetDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::ArtNet
    }

    fn decode(&self, datagram: &[u8], peer: SocketAddr) -> Result<DecodedFrame, DecodeError> {
        self.decode_packet(datagram, peer)
    }
}

/// An ArtDmx packet, for feeding receivers in tests and tools
#[derive(Debug, Clone)]
pub struct ArtDmxPacket {
    /// 0-based Port-Address as sent on the wire
    pub port_address: u16,
    pub sequence: u8,
    pub data: Vec<u8>,
}

impl ArtDmxPacket {
    /// A full 512-channel packet with sequencing disabled
    pub fn new(port_address: u16) -> Self {
        Self {
            port_address,
            sequence: 0,
            data: vec![0; 512],
        }
    }

    /// Replace the channel data (any length)
    pub fn with_data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    /// Set the sequence number
    pub fn with_sequence(mut self, sequence: u8) -> Self {
        self.sequence = sequence;
        self
    }

    /// Serialise to the wire format
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = vec![0u8; HEADER_LEN + self.data.len()];

        packet[0..8].copy_from_slice(ARTNET_ID);

        // OpCode: OpDmx (0x5000)
        packet[8..10].copy_from_slice(&OP_DMX.to_le_bytes());

        // Protocol version (14)
        packet[10..12].copy_from_slice(&14u16.to_be_bytes());

        packet[12] = self.sequence;

        // Physical (0)
        packet[13] = 0;

        packet[14..16].copy_from_slice(&self.port_address.to_le_bytes());
        packet[16..18].copy_from_slice(&(self.data.len() as u16).to_be_bytes());
        packet[HEADER_LEN..].copy_from_slice(&self.data);

        packet
    }
}
