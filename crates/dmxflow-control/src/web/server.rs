//! Axum HTTP server

use axum::http::{header, HeaderValue, Method};
use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    Router,
};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::engine::ReceiverEngine;
use crate::{error::ControlError, Result};

use super::routes::build_router;
use super::websocket::ws_handler;

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    pub engine: ReceiverEngine,
    pub started: Instant,
}

/// Web server configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WebServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub allowed_origins: Vec<String>,
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // Bind to localhost unless configured otherwise
            host: "127.0.0.1".to_string(),
            port: 3000,
            enable_cors: true,
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl WebServerConfig {
    /// Create a new web server config
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Set the host address
    pub fn with_host(mut self, host: String) -> Self {
        self.host = host;
        self
    }

    /// Set CORS enabled/disabled
    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    /// Set allowed origins for CORS
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Socket address to listen on
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ControlError::HttpError(format!("Invalid address: {}", e)))
    }
}

/// REST API and WebSocket front end for a running receiver
pub struct WebServer {
    config: WebServerConfig,
    engine: ReceiverEngine,
}

impl WebServer {
    /// Create a new web server
    pub fn new(config: WebServerConfig, engine: ReceiverEngine) -> Self {
        Self { config, engine }
    }

    /// Build the application router
    pub fn router(&self) -> Result<Router> {
        let state = AppState {
            engine: self.engine.clone(),
            started: Instant::now(),
        };

        let app = build_router()
            .route("/ws", axum::routing::get(ws_handler))
            .layer(middleware::from_fn(security_headers))
            .with_state(state);

        if !self.config.enable_cors {
            return Ok(app);
        }

        let cors_layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE]);

        if self.config.allowed_origins.iter().any(|o| o == "*")
            || self.config.allowed_origins.is_empty()
        {
            return Ok(app.layer(cors_layer.allow_origin(Any)));
        }

        let origins: Result<Vec<HeaderValue>> = self
            .config
            .allowed_origins
            .iter()
            .map(|o| {
                o.parse::<HeaderValue>()
                    .map_err(|e| ControlError::HttpError(format!("Invalid origin header: {}", e)))
            })
            .collect();

        Ok(app.layer(cors_layer.allow_origin(origins?)))
    }

    /// Serve until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = self.config.socket_addr()?;
        let app = self.router()?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ControlError::HttpError(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!("Web server listening on {}", addr);

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .map_err(|e| ControlError::HttpError(format!("Server error: {}", e)))?;

        tracing::info!("Web server stopped");
        Ok(())
    }

    /// Spawn the server in a background task
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(self.run(shutdown))
    }
}

/// Security headers middleware
async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    // Prevent MIME sniffing
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    // Prevent clickjacking
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));

    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use dmxflow_core::PatchRegistry;
    use tower::ServiceExt;

    use crate::engine::EngineConfig;

    fn engine() -> ReceiverEngine {
        ReceiverEngine::new(EngineConfig::default(), PatchRegistry::new())
    }

    #[test]
    fn test_web_server_config() {
        let config = WebServerConfig::new(8080)
            .with_host("0.0.0.0".to_string())
            .with_cors(false)
            .with_allowed_origins(vec!["http://localhost:3000".to_string()]);

        assert_eq!(config.socket_addr().unwrap(), "0.0.0.0:8080".parse().unwrap());
        assert!(!config.enable_cors);
        assert_eq!(
            config.allowed_origins,
            vec!["http://localhost:3000".to_string()]
        );
    }

    #[test]
    fn test_invalid_host() {
        let config = WebServerConfig::default().with_host("not a host".to_string());
        assert!(matches!(
            config.socket_addr(),
            Err(ControlError::HttpError(_))
        ));
    }

    #[test]
    fn test_invalid_origin_rejected() {
        let config = WebServerConfig::default().with_allowed_origins(vec!["\n".to_string()]);
        assert!(WebServer::new(config, engine()).router().is_err());
    }

    #[tokio::test]
    async fn test_status_route_with_security_headers() {
        let app = WebServer::new(WebServerConfig::default(), engine())
            .router()
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers
                .get("X-Content-Type-Options")
                .and_then(|h| h.to_str().ok()),
            Some("nosniff")
        );
        assert_eq!(
            headers.get("X-Frame-Options").and_then(|h| h.to_str().ok()),
            Some("DENY")
        );
        assert_eq!(
            headers.get("Referrer-Policy").and_then(|h| h.to_str().ok()),
            Some("no-referrer")
        );
    }
}
