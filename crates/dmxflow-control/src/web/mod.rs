//! Web API
//!
//! - `GET /api/status`, `GET /api/universes`
//! - `GET|POST /api/patch`, `DELETE /api/patch/:fixture_id`
//! - `GET /ws`: live stream of receiver messages as JSON

pub mod handlers;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{AppState, WebServer, WebServerConfig};
