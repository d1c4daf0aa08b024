//! HTTP surface for the research team

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use dash_team::ResearchDriver;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub fn router(driver: ResearchDriver) -> Router {
    Router::new()
        .route("/api/research", post(research))
        .with_state(driver)
}

async fn research(State(driver): State<ResearchDriver>, body: Bytes) -> Response {
    let body: Value = serde_json::from_slice(&body).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Request body is not JSON, using default question");
        json!({})
    });

    // Cancels in-flight tool calls if the client goes away
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match driver.respond(&body, cancel).await {
        Ok(answer) => Json(answer).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Error processing request" })),
        )
            .into_response(),
    }
}

/// Serve until ctrl-c
pub async fn serve(bind: &str, driver: ResearchDriver) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "Listening");
    axum::serve(listener, router(driver))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
            }
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
