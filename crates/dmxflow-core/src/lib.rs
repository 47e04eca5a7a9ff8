//! DMXFlow Core - Receive-side Data Model
//!
//! This crate contains everything that does not touch a socket:
//! - Universe addressing and the 512-channel frame type
//! - Sender tracking with timeout-based disconnect detection
//! - HTP/LTP merging of concurrent senders
//! - The fixture patch registry
//! - Per-fixture change detection for downstream publishing

use thiserror::Error;

pub mod frame;
pub mod hub;
pub mod logging;
pub mod merge;
pub mod patch;
pub mod source;
pub mod state;
pub mod universe;

// --- Re-exports grouped by category ---

// Data model
pub use frame::{DecodedFrame, FrameOptions, MAX_PRIORITY};
pub use universe::{
    DmxFrame, Protocol, SourceId, Universe, CHANNELS_PER_UNIVERSE, MAX_UNIVERSE, MIN_UNIVERSE,
};

// Senders & merging
pub use merge::{MergeEngine, MergeStrategy, ZeroSourcePolicy};
pub use source::{
    sequence_out_of_order, Admission, DisconnectReason, EvictionTimer, SourceEvent, SourceRecord,
    SourceTracker, DEFAULT_SOURCE_TIMEOUT,
};
pub use state::UniverseState;

// Patch & distribution
pub use hub::{ChangeSet, DistributionHub, FixtureSlice, HeartbeatStatus, HubMessage};
pub use patch::{PatchEntry, PatchError, PatchRegistry};

// Logging
pub use logging::LogConfig;

/// Core error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Universe number outside 1-63999
    #[error("Invalid universe: {0} (must be 1-63999)")]
    InvalidUniverse(u16),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
