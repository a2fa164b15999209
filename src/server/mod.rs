//! HTTP Surface
//!
//! Two listeners: the API on `listen_addr` and Prometheus exposition on
//! `metrics_addr`. Both stop accepting when the shutdown token fires;
//! connections already in flight are left to finish on their own tasks.

mod client_ip;
mod routes;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::metrics::ServiceMetrics;

pub use client_ip::client_identity;
pub use routes::{handle, ApiResponse, AppState};

// =============================================================================
// API Server
// =============================================================================

/// Serve the API until `shutdown` fires
pub async fn run_api_server(
    addr: &str,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = bind(addr, "API").await?;

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("API server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Http(format!("API server accept error: {}", e)))?,
        };

        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let state = Arc::clone(&state);
                async move { Ok::<_, Infallible>(handle(state, req, peer).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%peer, "API connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

/// Serve `/metrics` until `shutdown` fires
pub async fn run_metrics_server(
    addr: &str,
    metrics: Arc<ServiceMetrics>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = bind(addr, "Metrics").await?;

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Metrics server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Http(format!("Metrics server accept error: {}", e)))?,
        };

        let io = TokioIo::new(stream);
        let metrics = Arc::clone(&metrics);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let metrics = Arc::clone(&metrics);
                async move { Ok::<_, Infallible>(metrics_response(&metrics, req.uri().path())) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}

fn metrics_response(metrics: &ServiceMetrics, path: &str) -> Response<Full<Bytes>> {
    let (status, content_type, body) = match path {
        "/metrics" => match metrics.encode() {
            Ok(buffer) => (StatusCode::OK, metrics.content_type(), Bytes::from(buffer)),
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain".to_string(),
                    Bytes::from_static(b"metrics unavailable"),
                )
            }
        },
        _ => (
            StatusCode::NOT_FOUND,
            "text/plain".to_string(),
            Bytes::from_static(b"not found"),
        ),
    };

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    if let Ok(value) = header::HeaderValue::from_str(&content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

async fn bind(addr: &str, name: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {} server address {}: {}", name, addr, e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind {} server: {}", name, e)))?;

    info!("{} server listening on {}", name, addr);
    Ok(listener)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ItemKind;
    use assert_matches::assert_matches;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record_stored(ItemKind::Text);

        let response = metrics_response(&metrics, "/metrics");
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("clipdrop_items_stored_total"));

        let response = metrics_response(&metrics, "/other");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        assert_matches!(bind("not-an-addr", "API").await, Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_metrics_server_stops_on_shutdown() {
        let metrics = Arc::new(ServiceMetrics::new().unwrap());
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(run_metrics_server(
            "127.0.0.1:0",
            metrics,
            shutdown.clone(),
        ));

        shutdown.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
