//! In-memory document cache with TTL and stale lookup.
//!
//! Each [`Document`] has at most one entry. Entries are replaced on every
//! successful upstream fetch and are never evicted: expiry is checked lazily
//! on read, and an expired entry stays available through
//! [`DocumentCache::get_stale`] so the gateway can keep serving it while the
//! upstream is down.
//!
//! A single `RwLock` guards the map. With two keys there is nothing to gain
//! from finer-grained locking. The lock is only held for the map operation
//! itself, never across an upstream request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::clock::{Clock, SystemClock};
use crate::document::Document;

/// A cached, already-formatted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Response body exactly as served.
    pub body: Bytes,
    /// Quoted strong entity tag derived from `body`.
    pub etag: String,
    /// Instant after which the entry is stale.
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Returns `true` once `now` is past `expires_at`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Computes the entity tag for a body: the quoted hex SHA-256 digest.
///
/// Identical bytes always produce the identical tag, so a refetch of an
/// unchanged document does not invalidate downstream caches.
pub fn compute_etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{}\"", hex::encode(digest))
}

/// TTL cache for the served documents.
pub struct DocumentCache {
    entries: RwLock<HashMap<Document, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl DocumentCache {
    /// Creates a cache that expires entries `ttl` after they are stored.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Creates a cache driven by the given clock.
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(Document::ALL.len())),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the entry for `doc` if one exists and has not expired.
    pub fn get(&self, doc: Document) -> Option<CacheEntry> {
        let now = self.clock.now();
        let entries = self.entries.read();
        match entries.get(&doc) {
            Some(entry) if !entry.is_expired(now) => {
                tracing::trace!(document = %doc, "cache hit");
                Some(entry.clone())
            }
            Some(_) => {
                tracing::trace!(document = %doc, "cache entry expired");
                None
            }
            None => None,
        }
    }

    /// Returns the entry for `doc` regardless of its age.
    pub fn get_stale(&self, doc: Document) -> Option<CacheEntry> {
        self.entries.read().get(&doc).cloned()
    }

    /// Stores `body` for `doc`, replacing any previous entry.
    ///
    /// Returns the stored entry so callers can respond without a second lookup.
    pub fn set(&self, doc: Document, body: Bytes) -> CacheEntry {
        let entry = CacheEntry {
            etag: compute_etag(&body),
            body,
            expires_at: self.clock.now() + self.ttl,
        };
        self.entries.write().insert(doc, entry.clone());
        tracing::debug!(document = %doc, etag = %entry.etag, ttl_secs = self.ttl.as_secs(), "cache set");
        entry
    }

    /// Number of documents currently held, fresh or stale.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
