use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use super::api::{self, AppState};
use super::db::{DbHandle, LessonDb};
use super::ws;
use crate::generate::ModelService;
use crate::pipeline::PipelineSettings;

/// Configuration for the lesson server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Bind on all interfaces and allow any origin, for a separately served frontend.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3141,
            db_path: PathBuf::from(".lessonforge/lessons.db"),
            dev_mode: false,
        }
    }
}

/// Build the full application router: JSON API plus the event socket.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let app = api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Start the lesson server and run until Ctrl+C. In-flight runs are cancelled on shutdown.
pub async fn start_server(
    config: ServerConfig,
    model: Arc<dyn ModelService>,
    settings: PipelineSettings,
) -> Result<()> {
    let db = LessonDb::new(&config.db_path).context("Failed to initialize lesson database")?;
    let (ws_tx, _rx) = broadcast::channel::<String>(256);
    let cancel = CancellationToken::new();

    let state = Arc::new(AppState {
        db: DbHandle::new(db),
        model,
        settings,
        ws_tx,
        cancel: cancel.clone(),
    });
    let app = build_router(state, config.dev_mode);

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, db = %config.db_path.display(), "Server listening");
    println!("lessonforge running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .context("Server error")?;

    tracing::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    struct OfflineModel;

    #[async_trait]
    impl ModelService for OfflineModel {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Err(anyhow::anyhow!("offline"))
        }
    }

    fn test_router(dev_mode: bool) -> Router {
        let (ws_tx, _) = broadcast::channel(16);
        let state = Arc::new(AppState {
            db: DbHandle::new(LessonDb::new_in_memory().unwrap()),
            model: Arc::new(OfflineModel),
            settings: PipelineSettings::default(),
            ws_tx,
            cancel: CancellationToken::new(),
        });
        build_router(state, dev_mode)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = test_router(false).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_routes_mounted() {
        let req = Request::builder()
            .uri("/api/lessons")
            .body(Body::empty())
            .unwrap();
        let resp = test_router(false).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = test_router(false).oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn test_dev_mode_allows_cross_origin() {
        let req = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = test_router(true).oneshot(req).await.unwrap();
        assert!(
            resp.headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let req = Request::builder()
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        let resp = test_router(false).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3141);
        assert_eq!(config.db_path, PathBuf::from(".lessonforge/lessons.db"));
        assert!(!config.dev_mode);
    }
}
