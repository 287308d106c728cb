//! HTTP server for Prometheus metrics export
//!
//! Endpoints:
//! - `/metrics`: Prometheus text format
//! - `/health`: liveness, always `OK` while the process serves requests
//! - `/status`: per-tenant connection status as JSON, when a status
//!   provider is attached

use super::MetricsRegistry;
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Produces the JSON document served at `/status`
pub type StatusProvider = Arc<dyn Fn() -> serde_json::Value + Send + Sync>;

/// Configuration for metrics HTTP server
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:9090")
    pub listen_addr: SocketAddr,
    /// Path to serve metrics (default: "/metrics")
    pub metrics_path: String,
}

impl MetricsServerConfig {
    pub fn from_addr(addr: &str) -> Result<Self> {
        let listen_addr = addr
            .parse()
            .with_context(|| format!("Invalid metrics address '{}'", addr))?;
        Ok(Self {
            listen_addr,
            ..Self::default()
        })
    }
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
            metrics_path: "/metrics".to_string(),
        }
    }
}

#[derive(Clone)]
struct Routes {
    registry: Arc<MetricsRegistry>,
    metrics_path: String,
    status: Option<StatusProvider>,
}

/// HTTP server for Prometheus metrics
pub struct MetricsServer {
    config: MetricsServerConfig,
    routes: Routes,
}

impl MetricsServer {
    /// Create a new metrics server
    pub fn new(config: MetricsServerConfig, registry: Arc<MetricsRegistry>) -> Self {
        let routes = Routes {
            registry,
            metrics_path: config.metrics_path.clone(),
            status: None,
        };
        Self { config, routes }
    }

    /// Serve `/status` from `provider`
    pub fn with_status(mut self, provider: StatusProvider) -> Self {
        self.routes.status = Some(provider);
        self
    }

    /// Accept connections until `shutdown` is cancelled
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .context("Failed to bind metrics server")?;

        info!(
            "Metrics server listening on http://{}{}",
            self.config.listen_addr, self.config.metrics_path
        );

        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let routes = self.routes.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let routes = routes.clone();
                    async move { Ok::<_, Infallible>(routes.handle(&req)) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Connection error from {}: {}", remote_addr, err);
                }
            });
        }

        info!("Metrics server stopped");
        Ok(())
    }

    /// Render the metrics page without going through HTTP
    pub fn render_metrics(&self) -> Result<String> {
        encode_metrics(&self.routes.registry)
    }
}

impl Routes {
    fn handle<B>(&self, req: &Request<B>) -> Response<Full<Bytes>> {
        debug!("Metrics request: {} {}", req.method(), req.uri().path());
        self.route(req.uri().path())
    }

    fn route(&self, path: &str) -> Response<Full<Bytes>> {
        match path {
            "/health" | "/healthz" => text(StatusCode::OK, "OK".to_string()),
            "/status" => match &self.status {
                Some(provider) => {
                    let mut response = text(StatusCode::OK, provider().to_string());
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                    response
                }
                None => text(StatusCode::NOT_FOUND, "Not Found".to_string()),
            },
            "/" => text(
                StatusCode::OK,
                format!(
                    "Warden Connection Controller\n\nEndpoints:\n  {} - Prometheus metrics\n  /health - Liveness\n  /status - Tenant status\n",
                    self.metrics_path
                ),
            ),
            p if p == self.metrics_path => match encode_metrics(&self.registry) {
                Ok(body) => {
                    let mut response = text(StatusCode::OK, body);
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; version=0.0.4"),
                    );
                    response
                }
                Err(e) => {
                    error!("Failed to encode metrics: {}", e);
                    text(StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e))
                }
            },
            _ => {
                warn!("Unknown metrics endpoint requested: {}", path);
                text(StatusCode::NOT_FOUND, "Not Found".to_string())
            }
        }
    }
}

fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Encode metrics to Prometheus text format
fn encode_metrics(registry: &MetricsRegistry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.registry().gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;

    String::from_utf8(buffer).context("Invalid UTF-8 in metrics")
}
