//! Scrape endpoint plus health and readiness routes.
//!
//! `GET <path>` renders the sink, `/health` answers as long as the process
//! serves requests, and `/ready` turns 200 once a BMS sample has been
//! recorded.

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::metrics::{CONTENT_TYPE, SharedMetrics};

/// Build the router serving `metrics_path`, `/health` and `/ready`.
///
/// `metrics_path` must be a literal route other than the status paths;
/// `ExporterConfig::validate` enforces that.
pub fn create_router(metrics: SharedMetrics, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(scrape))
        .route("/health", get(|| async { "ok\n" }))
        .route("/ready", get(ready))
        .layer(CorsLayer::permissive())
        .with_state(metrics)
}

async fn scrape(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], metrics.render())
}

async fn ready(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.latest() {
        Some(sample) => (
            StatusCode::OK,
            format!("ready, last current {} mA\n", sample.current_ma),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "waiting for the first BMS sample\n".to_string(),
        ),
    }
}

/// Scrape server bound to a pre-opened listener.
pub struct HttpServer {
    router: Router,
    metrics_path: String,
}

impl HttpServer {
    pub fn new(metrics: SharedMetrics, metrics_path: String) -> Self {
        Self {
            router: create_router(metrics, &metrics_path),
            metrics_path,
        }
    }

    /// Serve until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!(
            addr = %listener.local_addr()?,
            path = %self.metrics_path,
            "Serving BMS metrics"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSink;
    use axum::body::Body;
    use axum::http::Request;
    use bms_common::decode;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn get_text(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn sink_with_sample() -> SharedMetrics {
        let metrics = Arc::new(MetricsSink::new());
        metrics.record(&decode(&[3300, 3310, 3295, 3298, 65436, 25, 26]));
        metrics
    }

    #[tokio::test]
    async fn test_scrape_renders_recorded_sample() {
        let router = create_router(sink_with_sample(), "/metrics");

        let response = router
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("application/openmetrics-text"));

        let (status, body) = get_text(router, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("bms_current_ma -100"), "{}", body);
        assert!(body.contains(r#"bms_cell_voltage_mv{cell_index="2"} 3310"#));
        assert!(body.ends_with("# EOF\n"));
    }

    #[tokio::test]
    async fn test_health_answers_without_sample() {
        let metrics = Arc::new(MetricsSink::new());

        let (status, body) = get_text(create_router(metrics, "/metrics"), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok\n");
    }

    #[tokio::test]
    async fn test_ready_follows_first_sample() {
        let metrics = Arc::new(MetricsSink::new());
        let router = create_router(metrics.clone(), "/metrics");

        let (status, _) = get_text(router.clone(), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        metrics.record(&decode(&[3300, 3310, 3295, 3298, 150, 25, 26]));

        let (status, body) = get_text(router, "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("150 mA"));
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = create_router(sink_with_sample(), "/bms/metrics");

        let (status, body) = get_text(router.clone(), "/bms/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("bms_temperature_c"));

        let (status, _) = get_text(router, "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = HttpServer::new(Arc::new(MetricsSink::new()), "/metrics".to_string());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(server.run(listener, shutdown_rx));
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
