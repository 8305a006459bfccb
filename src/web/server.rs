use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::config::WebConfig;

use super::api::{
    advance_session, export_session, get_guidelines, get_image, get_session, health_check,
    list_batches, reset_session, retreat_session, start_session, submit_session, AppState,
};

/// Build the application router over the given state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/guidelines", get(get_guidelines))
        .route("/api/sessions", post(start_session))
        .route("/api/sessions/:user_id", get(get_session))
        .route("/api/sessions/:user_id/advance", post(advance_session))
        .route("/api/sessions/:user_id/retreat", post(retreat_session))
        .route("/api/sessions/:user_id/submit", post(submit_session))
        .route("/api/sessions/:user_id/reset", post(reset_session))
        .route("/api/sessions/:user_id/export", get(export_session))
        .route("/api/images/:image_id", get(get_image))
        .route("/api/batches", get(list_batches))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until the shutdown channel flips to true
pub async fn run_server(
    state: AppState,
    web_config: WebConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&web_config.listen).await?;
    tracing::info!("Web server listening on {}", web_config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await?;

    Ok(())
}
