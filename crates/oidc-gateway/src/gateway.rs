//! Request-serving pipeline.
//!
//! [`Gateway`] ties the cache, the upstream source, and the formatter to the
//! HTTP semantics of a document request:
//!
//! ```text
//! GET doc ─▶ fresh entry? ──yes──▶ 200 (cached)
//!               │ no
//!               ▼
//!          fetch upstream ──ok──▶ format ──ok──▶ store ─▶ 200
//!               │ err                 │ parse err ─┐   │ serialize err ─▶ 500
//!               ▼                     ▼            │
//!          stale entry? ◀──────────────────────────┘
//!             │ yes ─▶ 200 (stale)   │ no ─▶ 502
//! ```
//!
//! Stale entries are served without any marker: the documents are public and
//! an outdated key set is more useful to clients than an outage.
//!
//! Refreshes of the same document are serialized by a per-document slot. A
//! request that queued behind another refresh takes that refresh's outcome
//! (the new entry, or the stale one after a failure) instead of fetching
//! again, so a burst of misses costs a single upstream call and no request
//! waits on more than one fetch it did not start. The cache lock itself is
//! never held while the upstream request is in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use axum::body::Body;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;

use crate::cache::{CacheEntry, DocumentCache};
use crate::document::Document;
use crate::error::{FormatError, PopulateError};
use crate::format::format_document;
use crate::upstream::DocumentSource;

/// Serving options.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Re-indent upstream JSON before caching.
    pub pretty_print: bool,
    /// `max-age` advertised to clients.
    pub client_max_age: Duration,
}

/// Outward representation of a document request.
#[derive(Debug, Clone)]
pub enum DocumentResponse {
    /// 200 with the document body.
    Ok { entry: CacheEntry, max_age: Duration },
    /// 304 for a matching `If-None-Match`.
    NotModified { etag: String, max_age: Duration },
    /// 405, anything but GET.
    MethodNotAllowed,
    /// 502, upstream fault and nothing cached.
    BadGateway,
    /// 500, the gateway failed to re-serialize a parsed document.
    InternalError,
}

impl DocumentResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            DocumentResponse::Ok { .. } => StatusCode::OK,
            DocumentResponse::NotModified { .. } => StatusCode::NOT_MODIFIED,
            DocumentResponse::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            DocumentResponse::BadGateway => StatusCode::BAD_GATEWAY,
            DocumentResponse::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// How a document was resolved.
enum Resolved {
    Fresh(CacheEntry),
    Fetched(CacheEntry),
    Stale(CacheEntry),
    Unavailable,
    Internal,
}

/// Serializes refreshes of one document.
#[derive(Default)]
struct RefreshSlot {
    lock: Mutex<()>,
    /// Bumped after every refresh attempt that ran to completion.
    completed: AtomicU64,
}

/// The serving orchestrator.
pub struct Gateway {
    cache: DocumentCache,
    source: Arc<dyn DocumentSource>,
    settings: GatewaySettings,
    refresh_slots: [RefreshSlot; 2],
}

impl Gateway {
    pub fn new(
        cache: DocumentCache,
        source: Arc<dyn DocumentSource>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            cache,
            source,
            settings,
            refresh_slots: Default::default(),
        }
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Serves one document request.
    ///
    /// `if_none_match` is the raw `If-None-Match` request header, if any.
    pub async fn serve(
        &self,
        method: &Method,
        doc: Document,
        if_none_match: Option<&str>,
    ) -> DocumentResponse {
        if method != Method::GET {
            tracing::info!(document = %doc, method = %method, status = 405, "method not allowed");
            return DocumentResponse::MethodNotAllowed;
        }

        let started = Instant::now();
        let resolved = self.resolve(doc).await;

        let (response, cache_hit, stale) = match resolved {
            Resolved::Fresh(entry) => (self.success(entry, if_none_match), true, false),
            Resolved::Fetched(entry) => (self.success(entry, if_none_match), false, false),
            Resolved::Stale(entry) => (self.success(entry, if_none_match), false, true),
            Resolved::Unavailable => (DocumentResponse::BadGateway, false, false),
            Resolved::Internal => (DocumentResponse::InternalError, false, false),
        };

        tracing::info!(
            document = %doc,
            status = response.status().as_u16(),
            cache_hit,
            stale,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "document request"
        );

        response
    }

    /// Refreshes every document from the upstream, ignoring fresh entries.
    ///
    /// Backs the liveness and readiness probes: success proves the upstream is
    /// reachable right now, not that something was cached earlier.
    ///
    /// # Errors
    ///
    /// Returns the first document that could not be fetched or formatted.
    pub async fn populate(&self) -> Result<(), PopulateError> {
        for doc in Document::ALL {
            let slot = &self.refresh_slots[doc.index()];
            let _guard = slot.lock.lock().await;
            self.refresh_in(slot, doc).await?;
        }
        Ok(())
    }

    /// Runs [`populate`](Self::populate) on its own task.
    ///
    /// Dropping the returned future does not cancel the fetches, so a probe
    /// that gives up early still leaves the cache warmed.
    ///
    /// # Errors
    ///
    /// As [`populate`](Self::populate), plus [`PopulateError::Task`] if the
    /// task panicked.
    pub async fn populate_detached(self: &Arc<Self>) -> Result<(), PopulateError> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move { gateway.populate().await }).await?
    }

    async fn resolve(&self, doc: Document) -> Resolved {
        if let Some(entry) = self.cache.get(doc) {
            return Resolved::Fresh(entry);
        }

        let slot = &self.refresh_slots[doc.index()];
        let seen = slot.completed.load(Ordering::Acquire);
        let _guard = slot.lock.lock().await;

        // A refresh finished while we waited: share its outcome.
        if slot.completed.load(Ordering::Acquire) != seen {
            return match self.cache.get(doc) {
                Some(entry) => Resolved::Fresh(entry),
                None => self.fallback(doc),
            };
        }

        match self.refresh_in(slot, doc).await {
            Ok(entry) => Resolved::Fetched(entry),
            Err(PopulateError::Format {
                source: source @ FormatError::Serialize(_),
                ..
            }) => {
                tracing::error!(document = %doc, error = %source, "failed to serialize document");
                Resolved::Internal
            }
            Err(err) => {
                tracing::warn!(document = %doc, error = %err, "refresh failed");
                self.fallback(doc)
            }
        }
    }

    /// Stale entry or 502 once a refresh has failed.
    fn fallback(&self, doc: Document) -> Resolved {
        match self.cache.get_stale(doc) {
            Some(entry) => {
                tracing::warn!(document = %doc, "serving stale document");
                Resolved::Stale(entry)
            }
            None => {
                tracing::warn!(document = %doc, "no cached document to fall back on");
                Resolved::Unavailable
            }
        }
    }

    /// Refreshes `doc` while holding its slot lock, recording the attempt.
    async fn refresh_in(
        &self,
        slot: &RefreshSlot,
        doc: Document,
    ) -> Result<CacheEntry, PopulateError> {
        let result = self.refresh(doc).await;
        slot.completed.fetch_add(1, Ordering::Release);
        result
    }

    /// Fetches, formats, and stores one document.
    async fn refresh(&self, doc: Document) -> Result<CacheEntry, PopulateError> {
        let started = Instant::now();
        let fetched = self.source.fetch(doc.path()).await;
        let upstream_ms = started.elapsed().as_millis() as u64;

        let raw = fetched.map_err(|source| {
            tracing::warn!(
                document = %doc,
                kind = source.kind(),
                error = &source as &(dyn std::error::Error + 'static),
                upstream_ms,
                "upstream fetch failed"
            );
            PopulateError::Fetch {
                document: doc,
                source,
            }
        })?;

        let body = format_document(raw, self.settings.pretty_print).map_err(|source| {
            if let FormatError::Parse(ref e) = source {
                tracing::warn!(document = %doc, error = %e, "upstream sent malformed JSON");
            }
            PopulateError::Format {
                document: doc,
                source,
            }
        })?;

        tracing::debug!(document = %doc, upstream_ms, bytes = body.len(), "upstream fetch");
        Ok(self.cache.set(doc, body))
    }

    fn success(&self, entry: CacheEntry, if_none_match: Option<&str>) -> DocumentResponse {
        let max_age = self.settings.client_max_age;
        if if_none_match.is_some_and(|header| etag_matches(header, &entry.etag)) {
            return DocumentResponse::NotModified {
                etag: entry.etag,
                max_age,
            };
        }
        DocumentResponse::Ok { entry, max_age }
    }
}

/// Weak comparison of an `If-None-Match` header against an entity tag.
fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    let etag = etag.trim_start_matches("W/");
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
}

fn cache_headers(response: &mut Response, etag: &str, max_age: Duration) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("max-age={}", max_age.as_secs())) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    if let Ok(value) = HeaderValue::from_str(etag) {
        headers.insert(header::ETAG, value);
    }
    let expires = httpdate::fmt_http_date(SystemTime::now() + max_age);
    if let Ok(value) = HeaderValue::from_str(&expires) {
        headers.insert(header::EXPIRES, value);
    }
}

impl IntoResponse for DocumentResponse {
    fn into_response(self) -> Response {
        match self {
            DocumentResponse::Ok { entry, max_age } => {
                let mut response = (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/json")],
                    Body::from(entry.body),
                )
                    .into_response();
                cache_headers(&mut response, &entry.etag, max_age);
                response
            }
            DocumentResponse::NotModified { etag, max_age } => {
                let mut response = StatusCode::NOT_MODIFIED.into_response();
                cache_headers(&mut response, &etag, max_age);
                response
            }
            DocumentResponse::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                [(header::ALLOW, "GET")],
                "Method Not Allowed",
            )
                .into_response(),
            DocumentResponse::BadGateway => (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response(),
            DocumentResponse::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}
