//! Error types for the receive pipeline
use std::net::SocketAddr;
use thiserror::Error;

use dmxflow_core::{CoreError, PatchError, Protocol};

/// Why a datagram was not turned into a frame.
///
/// All of these are routine on a shared network: the packet is dropped and
/// counted, nothing more.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Datagram shorter than the protocol minimum, or the declared length
    /// runs past the end of the buffer
    #[error("short packet: {len} bytes, need {needed}")]
    ShortPacket { len: usize, needed: usize },

    /// Protocol identifier or fixed header fields do not match
    #[error("bad {0} header")]
    BadHeader(Protocol),

    /// Art-Net packet that is not OpDmx
    #[error("unsupported Art-Net opcode 0x{0:04x}")]
    UnsupportedOpcode(u16),

    /// sACN packet that is not a DMX data packet (sync, discovery, ...)
    #[error("unsupported sACN {layer} vector 0x{vector:x}")]
    UnsupportedVector { layer: &'static str, vector: u32 },

    /// Alternate DMX start code (per-address priority, RDM, ...)
    #[error("unsupported DMX start code 0x{0:02x}")]
    UnsupportedStartCode(u8),

    /// Universe outside 1-63999 after normalisation
    #[error("invalid universe {0}")]
    InvalidUniverse(u16),
}

impl From<CoreError> for DecodeError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidUniverse(n) => DecodeError::InvalidUniverse(n),
        }
    }
}

/// Control system errors
#[derive(Error, Debug)]
pub enum ControlError {
    /// A listener could not bind its socket or join its multicast group
    #[error("{protocol} listener on {addr} failed: {source}")]
    SocketBind {
        protocol: Protocol,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Patch rejected
    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    /// HTTP API error
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;
