//! Universe addressing and the 512-channel frame type
//!
//! sACN numbers universes 1-63999. Art-Net uses 0-based Port-Addresses on
//! the wire; the decoders translate those into this 1-based range before
//! anything reaches the shared data model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::{CoreError, Result};

/// Number of channels in a DMX-512 universe
pub const CHANNELS_PER_UNIVERSE: usize = 512;

/// Lowest valid universe number
pub const MIN_UNIVERSE: u16 = 1;

/// Highest valid universe number (E1.31 limit)
pub const MAX_UNIVERSE: u16 = 63999;

/// A validated universe number (1-63999)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Universe(u16);

impl Universe {
    /// Universe 1
    pub const FIRST: Universe = Universe(MIN_UNIVERSE);

    /// Create a universe, rejecting numbers outside 1-63999
    pub fn new(number: u16) -> Result<Self> {
        if !(MIN_UNIVERSE..=MAX_UNIVERSE).contains(&number) {
            return Err(CoreError::InvalidUniverse(number));
        }
        Ok(Self(number))
    }

    /// Translate a 0-based Art-Net Port-Address into a universe.
    ///
    /// Port-Address 0 becomes universe 1. Only the low 15 bits of the wire
    /// field carry the address.
    pub fn from_artnet(port_address: u16) -> Result<Self> {
        let port_address = port_address & 0x7FFF;
        Self::new(port_address + 1)
    }

    /// The universe number
    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for Universe {
    type Error = CoreError;

    fn try_from(value: u16) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Universe> for u16 {
    fn from(universe: Universe) -> Self {
        universe.0
    }
}

impl fmt::Display for Universe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 512 DMX channel values, index 0 is channel 1
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DmxFrame([u8; CHANNELS_PER_UNIVERSE]);

impl DmxFrame {
    /// A frame with every channel at zero
    pub const fn blackout() -> Self {
        Self([0; CHANNELS_PER_UNIVERSE])
    }

    /// Build a frame from up to 512 values; missing channels stay at zero
    /// and anything past channel 512 is ignored.
    pub fn from_slice(values: &[u8]) -> Self {
        let mut frame = Self::blackout();
        let len = values.len().min(CHANNELS_PER_UNIVERSE);
        frame.0[..len].copy_from_slice(&values[..len]);
        frame
    }

    /// Value of a 1-based channel, `None` outside 1-512
    pub fn channel(&self, channel: u16) -> Option<u8> {
        let index = (channel as usize).checked_sub(1)?;
        self.0.get(index).copied()
    }

    /// Set a 1-based channel. Out-of-range channels are ignored.
    pub fn set_channel(&mut self, channel: u16, value: u8) {
        if let Some(index) = (channel as usize).checked_sub(1) {
            if let Some(slot) = self.0.get_mut(index) {
                *slot = value;
            }
        }
    }

    /// Contiguous window of `footprint` channels starting at 1-based `start`
    pub fn window(&self, start: u16, footprint: u16) -> &[u8] {
        let begin = (start as usize).saturating_sub(1).min(CHANNELS_PER_UNIVERSE);
        let end = (begin + footprint as usize).min(CHANNELS_PER_UNIVERSE);
        &self.0[begin..end]
    }

    /// All 512 values
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Mutable view over all 512 values
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl Default for DmxFrame {
    fn default() -> Self {
        Self::blackout()
    }
}

impl From<[u8; CHANNELS_PER_UNIVERSE]> for DmxFrame {
    fn from(values: [u8; CHANNELS_PER_UNIVERSE]) -> Self {
        Self(values)
    }
}

impl fmt::Debug for DmxFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only the asserted channels, a full dump is unreadable
        let active: Vec<(usize, u8)> = self
            .0
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 0)
            .map(|(i, v)| (i + 1, *v))
            .collect();
        f.debug_struct("DmxFrame").field("active", &active).finish()
    }
}

/// Wire protocol a frame arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Sacn,
    ArtNet,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sacn => write!(f, "sACN"),
            Self::ArtNet => write!(f, "Art-Net"),
        }
    }
}

/// Identity of a sender within a universe.
///
/// sACN senders carry a 128-bit component identifier. Art-Net has no such
/// field, so the sender's socket address stands in for it. The ordering is
/// total, which keeps merge tie-breaks deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceId {
    Cid([u8; 16]),
    Address(SocketAddr),
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cid(cid) => write!(f, "{}", hex::encode(cid)),
            Self::Address(addr) => write!(f, "{}", addr),
        }
    }
}
