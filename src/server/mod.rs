//! HTTP API server
//!
//! - `GET /health` liveness probe
//! - `GET /status` package and content schema version
//! - `POST /login` exchange credentials for a session token
//! - `GET /session` the user behind a bearer token
//!
//! The server is started by the producer of [`Signal::WebReady`], which only
//! binds once storage is connected and the schema is usable:
//!
//! ```rust,ignore
//! use zcms::server::{register_web, ServerConfig};
//!
//! register_web(&readiness, ServerConfig::new().with_port(3000), false)?;
//! let addr = readiness.wait_for::<SocketAddr>(Signal::WebReady).await?;
//! ```

pub mod auth;
pub mod error;

pub use error::ApiError;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::bootstrap::BootPath;
use crate::database::{DocumentStore, StorageHandle};
use crate::migration::{describe, VersionMarker};
use crate::readiness::{Readiness, ReadinessError, Signal};

// =============================================================================
// Server Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub address: String,

    /// Port to listen on; 0 picks a free port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Get the full bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

// =============================================================================
// Router
// =============================================================================

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/login", post(auth::login_handler))
        .route("/session", get(auth::session_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub schema: String,
}

async fn status_handler(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let schema = VersionMarker::new(state.store.clone())
        .read()
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;
    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        schema: describe(schema),
    }))
}

// =============================================================================
// Server Startup
// =============================================================================

/// Register the producer of [`Signal::WebReady`]
///
/// The producer waits for storage and for the schema signal of the detected
/// boot path, binds the listener, spawns the server and settles with the bound
/// address.
pub fn register_web(
    readiness: &Readiness,
    config: ServerConfig,
    force_init: bool,
) -> Result<(), ReadinessError> {
    readiness.register(Signal::WebReady, move |ready| async move {
        let storage = ready
            .wait_for::<StorageHandle>(Signal::StorageReady)
            .await?;
        let path = BootPath::detect(storage.is_fresh(), force_init);
        ready.wait(path.signal()).await?;

        let bind_address = config.bind_address();
        let listener = tokio::net::TcpListener::bind(&bind_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", bind_address, e))?;
        let addr = listener.local_addr()?;

        let app = create_router(AppState {
            store: storage.store(),
        });
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Web server stopped: {}", e);
            }
        });

        info!("Web server listening on {}", addr);
        Ok::<SocketAddr, anyhow::Error>(addr)
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{issue_token, SecretStore, TokenLifetime};
    use crate::bootstrap::{AdminAccount, Installer};
    use crate::database::{MetaRepository, SqliteStore, META_DB_VERSION};
    use crate::migration::standard_migrations;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn installed_store() -> Arc<dyn DocumentStore> {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        standard_migrations().run(store.clone()).await.unwrap();
        Installer::new(AdminAccount {
            email: "admin@example.org".to_string(),
            password: "hunter2".to_string(),
        })
        .install(store.clone())
        .await
        .unwrap();
        store
    }

    fn router(store: &Arc<dyn DocumentStore>) -> Router {
        create_router(AppState {
            store: store.clone(),
        })
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn login_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn session_request(token: &str) -> Request<Body> {
        Request::builder()
            .uri("/session")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_server_config_builder() {
        let config = ServerConfig::new().with_address("0.0.0.0").with_port(9000);
        assert_eq!(config.bind_address(), "0.0.0.0:9000");
        assert_eq!(ServerConfig::default().port, 3000);
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let store = installed_store().await;

        let response = router(&store)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(&store)
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["schema"], "0.0.2");
    }

    #[tokio::test]
    async fn test_login_by_slug_and_email() {
        let store = installed_store().await;

        for login in ["admin", "admin@example.org"] {
            let response = router(&store)
                .oneshot(login_request(json!({"login": login, "pass": "hunter2"})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["user"]["slug"], "admin");
            assert!(body["user"].get("pass").is_none());
            assert!(body["token"].as_str().is_some());
        }
    }

    #[tokio::test]
    async fn test_login_rejections_are_forbidden() {
        let store = installed_store().await;

        let response = router(&store)
            .oneshot(login_request(json!({"login": "admin", "pass": "wrong"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = router(&store)
            .oneshot(login_request(json!({"login": "nobody", "pass": "hunter2"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_malformed_login_is_bad_request() {
        let store = installed_store().await;

        let response = router(&store)
            .oneshot(login_request(
                json!({"login": "admin", "pass": "hunter2", "expires": "1y"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], 400);

        let response = router(&store)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{\"login\": "))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_session_round_trip_and_rotation() {
        let store = installed_store().await;

        let response = router(&store)
            .oneshot(login_request(
                json!({"login": "admin", "pass": "hunter2", "expires": "1m"}),
            ))
            .await
            .unwrap();
        let token = json_body(response).await["token"]
            .as_str()
            .unwrap()
            .to_string();

        let response = router(&store).oneshot(session_request(&token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["email"], "admin@example.org");

        SecretStore::new(store.clone()).rotate().await.unwrap();

        let response = router(&store).oneshot(session_request(&token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_session_requires_known_user() {
        let store = installed_store().await;

        let response = router(&store)
            .oneshot(Request::builder().uri("/session").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let secret = SecretStore::new(store.clone()).require().await.unwrap();
        let token = issue_token(&secret, "deleted-user", TokenLifetime::OneDay).unwrap();
        let response = router(&store).oneshot(session_request(&token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_register_web_waits_for_schema() {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        MetaRepository::new(store.clone())
            .set_value(META_DB_VERSION, "0.0.2")
            .await
            .unwrap();
        let handle = StorageHandle::from_store(store, ":memory:".into()).await.unwrap();

        let readiness = Readiness::new();
        readiness
            .register(Signal::StorageReady, move |_| async move { Ok(handle) })
            .unwrap();
        register_web(&readiness, ServerConfig::new().with_port(0), false).unwrap();

        tokio::task::yield_now().await;
        assert!(!readiness.is_completed(Signal::WebReady));

        readiness
            .register(Signal::MigrationDone, |_| async { Ok(()) })
            .unwrap();
        let addr = readiness
            .wait_for::<SocketAddr>(Signal::WebReady)
            .await
            .unwrap();
        assert_ne!(addr.port(), 0);
        tokio::net::TcpStream::connect(*addr).await.unwrap();
    }
}
