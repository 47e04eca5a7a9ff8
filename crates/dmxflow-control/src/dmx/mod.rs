//! DMX-over-IP decoding
//!
//! This module turns raw UDP datagrams into [`DecodedFrame`]s.
//!
//! ## sACN (E1.31)
//!
//! - IP multicast on 239.255.{hi}.{lo}:5568, one group per universe
//! - Universes 1-63999
//! - Carries a sender CID, priority (0-200) and sequence number
//!
//! ## Art-Net
//!
//! - UDP broadcast or unicast on port 6454, all universes share the port
//! - 15-bit Port-Address, 0-based on the wire
//! - No priority field; frames are assigned [`ARTNET_DEFAULT_PRIORITY`]
//!
//! ## Example Usage
//!
//! ```rust
//! use dmxflow_control::dmx::{decoder_for, SacnPacket};
//! use dmxflow_core::Protocol;
//!
//! let datagram = SacnPacket::new(1, [7; 16]).with_channel(1, 255).encode();
//! let decoder = decoder_for(Protocol::Sacn);
//! let frame = decoder
//!     .decode(&datagram, "10.0.0.5:5568".parse().unwrap())
//!     .unwrap();
//! assert_eq!(frame.channels.channel(1), Some(255));
//! ```

pub mod artnet;
pub mod sacn;

use std::net::SocketAddr;

use dmxflow_core::{DecodedFrame, Protocol};

use crate::error::DecodeError;

pub use artnet::{ArtDmxPacket, ArtNetDecoder, ARTNET_DEFAULT_PRIORITY, ARTNET_PORT};
pub use sacn::{multicast_group, SacnDecoder, SacnPacket, SACN_PACKET_LEN, SACN_PORT};

/// Turns one datagram into a frame. Implementations are stateless.
pub trait FrameDecoder: Send + Sync {
    /// Protocol handled by this decoder
    fn protocol(&self) -> Protocol;

    /// Decode a datagram received from `peer`
    fn decode(&self, datagram: &[u8], peer: SocketAddr) -> Result<DecodedFrame, DecodeError>;
}

/// Decoder for a protocol
pub fn decoder_for(protocol: Protocol) -> Box<dyn FrameDecoder> {
    match protocol {
        Protocol::Sacn => Box::new(SacnDecoder),
        Protocol::ArtNet => Box::new(ArtNetDecoder),
    }
}

/// Default UDP port for a protocol
pub fn default_port(protocol: Protocol) -> u16 {
    match protocol {
        Protocol::Sacn => SACN_PORT,
        Protocol::ArtNet => ARTNET_PORT,
    }
}
