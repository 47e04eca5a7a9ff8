//! Decoded protocol frames
//!
//! A [`DecodedFrame`] is what either wire decoder hands to the source
//! tracker: one sender's view of one universe at one point in time.

use crate::universe::{DmxFrame, Protocol, SourceId, Universe};

/// Highest priority a sender may claim (E1.31)
pub const MAX_PRIORITY: u8 = 200;

/// Per-packet option flags. Only sACN sets these; Art-Net frames use the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameOptions {
    /// Data intended for visualisers only
    pub preview: bool,
    /// The sender is going away and this is its last packet
    pub stream_terminated: bool,
}

/// A validated DMX data frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub protocol: Protocol,
    pub universe: Universe,
    pub source_id: SourceId,
    /// 0-200, higher wins
    pub priority: u8,
    /// Sender sequence number; `None` when the sender disabled sequencing
    pub sequence: Option<u8>,
    pub channels: DmxFrame,
    pub source_name: Option<String>,
    pub options: FrameOptions,
}
