//! HTTP surface: the OCR endpoints, document storage, the Xero connection
//! flow, manual sync, and the Xero webhook receiver.

pub mod error;
pub mod routes;
pub mod state;

use crate::error::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use routes::{
    download_document_handler, health_handler, process_handler, upload_document_handler,
    xero_callback_handler, xero_connect_handler, xero_status_handler, xero_sync_handler,
    xero_webhook_handler,
};
use state::SharedState;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Room for multipart framing on top of the largest accepted file.
const FORM_OVERHEAD: usize = 64 * 1024;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(60 * 60));

    // bodies a little over the limit still reach the handlers, which answer
    // with a proper "File too large" error
    let body_limit = state.processor.limits().max_image_size * 2 + FORM_OVERHEAD;

    Router::new()
        .route("/health", get(health_handler))
        .route("/process", post(process_handler))
        .route("/documents", post(upload_document_handler))
        .route("/documents/{*key}", get(download_document_handler))
        .route("/xero/connect", get(xero_connect_handler))
        .route("/xero/callback", get(xero_callback_handler))
        .route("/xero/status", get(xero_status_handler))
        .route("/xero/sync", post(xero_sync_handler))
        .route("/webhooks/xero", post(xero_webhook_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Serves until Ctrl-C or SIGTERM, then drains in-flight requests.
pub async fn serve(listener: TcpListener, state: SharedState) -> Result<()> {
    let address = listener.local_addr()?;
    info!("Server running on {address}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
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
}
