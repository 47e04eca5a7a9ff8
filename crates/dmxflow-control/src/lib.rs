//! DMXFlow Control - Network Side of the Receiver
//!
//! This crate connects the data model in `dmxflow-core` to the network:
//! - **DMX**: sACN (E1.31) and Art-Net packet decoding
//! - **Listeners**: UDP sockets, multicast membership, universe filtering
//! - **Engine**: the owned runtime that merges, diffs and publishes
//! - **Web API**: REST status/patch endpoints and a WebSocket feed
//!
//! ## Feature Flags
//!
//! - `http-api`: Enable web API (requires `axum`, `tower-http`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dmxflow_control::{listener_plan, EngineConfig, ReceiverEngine};
//! use dmxflow_core::{PatchEntry, PatchRegistry, Protocol, Universe};
//! use std::net::Ipv4Addr;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let universe = Universe::new(1)?;
//! let patch = PatchRegistry::from_entries([PatchEntry::new("f1", "RGB", universe, 1, 3)])?;
//! let engine = ReceiverEngine::new(EngineConfig::default(), patch);
//!
//! let mut updates = engine.subscribe();
//! engine.start(listener_plan(&[Protocol::Sacn], &[universe], Ipv4Addr::UNSPECIFIED));
//! while let Ok(message) = updates.recv().await {
//!     println!("{}", serde_json::to_string(&message)?);
//! }
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]

/// Error types
pub mod error;

/// sACN and Art-Net decoding
pub mod dmx;

/// Receiver runtime
pub mod engine;

/// UDP listeners
pub mod listener;

#[cfg(feature = "http-api")]
/// Web API server
pub mod web;

// Re-exports
pub use dmx::{decoder_for, ArtNetDecoder, FrameDecoder, SacnDecoder};
pub use engine::{
    EngineConfig, EngineStats, ListenerCoverage, ReceiverEngine, SourceSummary, UniverseSummary,
};
pub use error::{ControlError, DecodeError, Result};
pub use listener::{listener_plan, ListenerConfig, UniverseFilter, UniverseListener};

#[cfg(feature = "http-api")]
pub use web::{WebServer, WebServerConfig};
