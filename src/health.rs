use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tracing::info;

async fn ok() -> &'static str {
    "OK"
}

/// Liveness routes for platform health checks. Shares nothing with the
/// message pipeline.
pub fn router() -> Router {
    Router::new().route("/", get(ok)).route("/health", get(ok))
}

pub async fn serve(listen: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind health endpoint to {}", listen))?;
    info!("Health endpoint listening on http://{}", listen);

    axum::serve(listener, router())
        .await
        .context("Health server error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_routes_answer_ok() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router()).await.unwrap() });

        for path in ["/", "/health"] {
            let response = reqwest::get(format!("http://{}{}", addr, path)).await.unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::OK);
            assert_eq!(response.text().await.unwrap(), "OK");
        }

        let missing = reqwest::get(format!("http://{}/nope", addr)).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
