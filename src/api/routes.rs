//! Router assembly and shared handler state.
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::pipeline::DesignPipeline;
use crate::storage::MEDIA_URL_PREFIX;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub struct AppState {
    pub pipeline: DesignPipeline,
}

/// Build the application router. `frontend_dir` is served at `/` only when
/// it exists; API routes always take precedence.
pub fn router(state: Arc<AppState>, frontend_dir: Option<PathBuf>) -> Router {
    let media = ServeDir::new(state.pipeline.store().root());

    let mut app: Router<Arc<AppState>> = Router::new()
        .route("/api/generate-design", post(handlers::generate_design))
        .route("/api/tones", get(handlers::tones))
        .route("/health", get(handlers::health))
        .nest_service(MEDIA_URL_PREFIX, media);

    match frontend_dir {
        Some(dir) if dir.is_dir() => {
            tracing::info!("Serving frontend from {}", dir.display());
            app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
        }
        Some(dir) => tracing::info!("Frontend directory not found at {}; serving API only.", dir.display()),
        None => {}
    }

    app.layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
