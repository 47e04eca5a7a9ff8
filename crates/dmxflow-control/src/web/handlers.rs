//! HTTP request and response bodies

use serde::{Deserialize, Serialize};

use dmxflow_core::{HeartbeatStatus, PatchEntry};

use crate::engine::{EngineStats, ListenerCoverage};

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Receiver status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub heartbeat: HeartbeatStatus,
    pub active_universes: usize,
    pub active_sources: usize,
    pub patched_fixtures: usize,
    pub listening: Vec<ListenerCoverage>,
    pub stats: EngineStats,
}

/// Body of `POST /api/patch`
pub type PatchRequest = PatchEntry;
