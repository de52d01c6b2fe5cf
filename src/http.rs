//! HTTP server exposing `/metrics` for Prometheus scraping. `port = 0`
//! disables it entirely.

use axum::{Router, routing::get};
use std::net::SocketAddr;

async fn metrics_handler() -> String {
    crate::metrics::gather()
}

pub async fn run(port: u16) {
    if port == 0 {
        tracing::info!("metrics HTTP server disabled (metrics.port = 0)");
        return;
    }

    let app = Router::new().route("/metrics", get(metrics_handler));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "metrics HTTP server listening");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, %addr, "failed to bind metrics HTTP server");
            return;
        }
    };

    if let Err(error) = axum::serve(listener, app).await {
        tracing::error!(%error, "metrics HTTP server error");
    }
}
