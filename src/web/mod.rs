//! HTTP app served by `lampctl serve`
//!
//! This is the server process the supervisor manages by default. It exposes:
//!
//! - `GET /health` - liveness check, answers `OK`
//! - `GET /` - a small HTML index
//! - `GET /api/messages` - JSON array of the `messages` table
//!
//! The app shuts down gracefully on SIGTERM or Ctrl-C so the supervisor's
//! graceful stop works without escalation.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::database::{DatabaseConn, Message, MessageRepository, OpenMode};
use crate::error::LampError;

// =============================================================================
// Configuration and state
// =============================================================================

/// Web app configuration
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Address to listen on, `host:port`
    pub bind_address: String,

    /// Database whose messages are served
    pub database: PathBuf,
}

impl WebConfig {
    pub fn new(bind_address: impl Into<String>, database: impl Into<PathBuf>) -> Self {
        Self {
            bind_address: bind_address.into(),
            database: database.into(),
        }
    }
}

/// Shared app state
#[derive(Clone)]
pub struct AppState {
    pub database: Arc<PathBuf>,
}

// =============================================================================
// Router
// =============================================================================

/// Create the Axum router for the web app
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/messages", get(messages_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> &'static str {
    "OK"
}

async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        concat!(
            "<!doctype html>\n",
            "<html><head><title>lampctl</title></head><body>\n",
            "<h1>lampctl</h1>\n",
            "<p>Serving <code>{}</code></p>\n",
            "<ul><li><a href=\"/api/messages\">/api/messages</a></li>",
            "<li><a href=\"/health\">/health</a></li></ul>\n",
            "</body></html>\n"
        ),
        html_escape(&state.database.display().to_string())
    ))
}

async fn messages_handler(State(state): State<AppState>) -> Response {
    let path = Arc::clone(&state.database);
    let result = tokio::task::spawn_blocking(move || load_messages(&path)).await;

    match result {
        Ok(Ok(messages)) => Json(messages).into_response(),
        Ok(Err(e)) => {
            tracing::warn!("Failed to load messages: {}", e);
            let status = match e {
                LampError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(json!({"error": e.kind(), "message": e.to_string()})),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Message loader panicked: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn load_messages(path: &std::path::Path) -> crate::Result<Vec<Message>> {
    let db = DatabaseConn::open(path, OpenMode::ReadOnly)?;
    MessageRepository::new(&db.conn).list()
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// =============================================================================
// Server Startup
// =============================================================================

/// Run the web app until SIGTERM or Ctrl-C
pub async fn start_server(config: WebConfig) -> anyhow::Result<()> {
    let state = AppState {
        database: Arc::new(config.database.clone()),
    };
    let app = create_router(state);

    tracing::info!(
        "Serving {} on {}",
        config.database.display(),
        config.bind_address
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Web app stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Unable to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown requested");
}

// =============================================================================
// Tests
// =============================================================================
