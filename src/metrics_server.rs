//! HTTP server exposing the Prometheus metrics.
//!
//! Runs on its own task so a scrape can never interfere with the
//! supervisor. Serves only the configured metrics path.

use std::net::SocketAddr;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::metrics;

pub struct MetricsServer;

impl MetricsServer {
    /// Starts the server on `0.0.0.0:port`, serving metrics at `path`.
    ///
    /// Returns the handle of the server task; the server runs until the
    /// process exits.
    pub fn start(port: u16, path: String) -> JoinHandle<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tokio::spawn(async move {
            let app = Router::new().route(&path, get(metrics_handler));

            info!(port, %path, "metrics server starting");

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!(error = %err, port, "failed to bind metrics server");
                    return;
                }
            };

            if let Err(err) = axum::serve(listener, app).await {
                error!(error = %err, "metrics server error");
            }
        })
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics::gather(),
    )
}
