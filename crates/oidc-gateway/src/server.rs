use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::StatusCode,
    middleware,
    routing::{any, get},
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    cache::DocumentCache,
    config::AppConfig,
    document::Document,
    error::StartupError,
    gateway::{Gateway, GatewaySettings},
    handlers::{self, AppState},
    middleware as app_middleware,
    upstream::{DocumentSource, UpstreamClient},
};

pub struct GatewayServer {
    addr: SocketAddr,
    app: Router,
    shutdown_timeout: Duration,
}

pub fn build_app(state: AppState, cfg: &AppConfig) -> Router {
    Router::new()
        // Published documents; the method gate lives in the gateway
        .route(
            Document::OpenIdConfiguration.path(),
            any(handlers::openid_configuration),
        )
        .route(Document::Jwks.path(), any(handlers::jwks))
        // Probes
        .route(
            "/healthz",
            get(handlers::healthz).fallback(handlers::method_not_allowed),
        )
        .route(
            "/readyz",
            get(handlers::readyz).fallback(handlers::method_not_allowed),
        )
        .fallback(handlers::not_found)
        .with_state(state)
        // Middleware stack (order: request id -> trace -> timeout)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            cfg.request_timeout(),
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::debug!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
}

/// Builds the gateway from configuration.
///
/// The upstream client is created from `config.upstream` unless a source was
/// supplied with [`ServerBuilder::with_source`].
pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    source: Option<Arc<dyn DocumentSource>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            source: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Creates the shared gateway without binding anything.
    ///
    /// # Errors
    ///
    /// Fails if the upstream credentials cannot be loaded.
    pub fn build_gateway(&self) -> Result<Arc<Gateway>, StartupError> {
        let source = match &self.source {
            Some(source) => source.clone(),
            None => Arc::new(UpstreamClient::new(&self.config.upstream)?),
        };
        let cache = DocumentCache::new(self.config.cache.ttl());
        let settings = GatewaySettings {
            pretty_print: self.config.response.pretty_print,
            client_max_age: self.config.cache.client_max_age(),
        };
        Ok(Arc::new(Gateway::new(cache, source, settings)))
    }

    /// # Errors
    ///
    /// Fails if the upstream credentials cannot be loaded.
    pub fn build(self) -> Result<GatewayServer, StartupError> {
        let gateway = self.build_gateway()?;
        let app = build_app(AppState::new(gateway), &self.config);

        Ok(GatewayServer {
            addr: self.addr,
            app,
            shutdown_timeout: self.config.shutdown_timeout(),
        })
    }
}

impl GatewayServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);

        let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
        let serve = axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let _ = signalled_tx.send(());
            })
            .into_future();

        let shutdown_timeout = self.shutdown_timeout;
        let deadline = async move {
            if signalled_rx.await.is_ok() {
                tokio::time::sleep(shutdown_timeout).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            result = serve => {
                result?;
                tracing::info!("graceful shutdown completed");
            }
            _ = deadline => {
                tracing::warn!(
                    timeout_secs = shutdown_timeout.as_secs(),
                    "graceful shutdown timed out, dropping open connections"
                );
            }
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
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
    tracing::info!("shutdown signal received");
}
