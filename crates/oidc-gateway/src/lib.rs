//! Caching gateway for a Kubernetes cluster's OIDC discovery document and JWKS.
//!
//! The gateway fetches the two documents from the API server with the pod's
//! service-account credentials, caches them for a configurable TTL, and keeps
//! serving the last good copy while the API server is unreachable.

pub mod cache;
pub mod clock;
pub mod config;
pub mod document;
pub mod error;
pub mod format;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod upstream;

pub use cache::{CacheEntry, DocumentCache, compute_etag};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, CacheConfig, ResponseConfig, ServerConfig, UpstreamConfig};
pub use document::Document;
pub use error::{FormatError, PopulateError, StartupError, UpstreamError};
pub use format::format_document;
pub use gateway::{DocumentResponse, Gateway, GatewaySettings};
pub use handlers::AppState;
pub use observability::init_tracing;
pub use server::{GatewayServer, ServerBuilder, build_app};
pub use upstream::{DocumentSource, MAX_RESPONSE_SIZE, UpstreamClient};
