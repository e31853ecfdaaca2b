//! Lookup/cache layer — resolves a command's subject against the upstream
//! substance database.
//!
//! # Architecture
//!
//! [`SubjectSource`] is an enum over concrete upstream backends (enum
//! dispatch — no `dyn` trait objects, no `async-trait` dependency). The
//! [`SubjectCache`](cache::SubjectCache) sits in front of whichever backend
//! is configured and bounds external calls with a TTL + LRU policy and
//! per-key request coalescing.
//!
//! The cache is generic over the small [`Fetch`] trait rather than the enum
//! so tests can inject counting/failing stubs without touching real
//! backends.

pub mod cache;
pub mod pnwiki;
pub mod bundled;

pub use cache::SubjectCache;

use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;

// ── Errors ───────────────────────────────────────────────────────────────────

/// Failure modes of a single upstream fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The upstream is authoritative and has no record for this key.
    #[error("no upstream record for key")]
    NotFound,

    /// Transport or protocol failure — the key's status is unknown.
    #[error("upstream fetch failed: {0}")]
    Upstream(String),
}

/// Failure modes surfaced by [`SubjectCache::resolve`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("subject not found")]
    NotFound,

    /// Fetch failed and no stale entry was available as a fallback.
    #[error("upstream unavailable: {0}")]
    Upstream(String),
}

// ── Subject record ───────────────────────────────────────────────────────────

/// One resolved subject, as cached. Mutated only by refresh; shared as
/// `Arc<SubjectRecord>` between the cache, render jobs and replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectRecord {
    /// Case-normalized lookup key — unique within the cache.
    pub key: String,
    /// Canonical display name as reported upstream.
    pub name: String,
    /// Upstream article URL, when known.
    pub url: Option<String>,
    pub chemical_classes: Vec<String>,
    pub psychoactive_classes: Vec<String>,
    /// Short free-text summary lines (effects, notes).
    pub summary: Vec<String>,
    /// Raw schematic bitmap bytes (PNG from the wiki thumbnailer), if the
    /// subject's page carries one.
    pub schematic: Option<Vec<u8>>,
    pub last_fetched: DateTime<Utc>,
}

/// Case-normalize a lookup key: trim and lowercase.
///
/// Every cache access goes through this so `"aspirin"` and `"ASPIRIN"`
/// share one entry and one in-flight fetch.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

// ── Fetch seam ───────────────────────────────────────────────────────────────

/// The single operation the cache needs from an upstream backend.
///
/// `key` is already normalized when the cache calls this.
pub trait Fetch: Send + Sync + 'static {
    fn fetch(&self, key: &str) -> impl Future<Output = Result<SubjectRecord, FetchError>> + Send;
}

// ── SubjectSource ────────────────────────────────────────────────────────────

/// All available upstream backends.
///
/// Adding a backend = new module + new variant + new `fetch` arm.
#[derive(Debug, Clone)]
pub enum SubjectSource {
    /// PsychonautWiki GraphQL + MediaWiki page images.
    PnWiki(pnwiki::PnWikiProvider),
    /// Built-in offline table — development fallback, no network.
    Bundled(bundled::BundledProvider),
}

impl Fetch for SubjectSource {
    async fn fetch(&self, key: &str) -> Result<SubjectRecord, FetchError> {
        match self {
            SubjectSource::PnWiki(p) => p.fetch(key).await,
            SubjectSource::Bundled(p) => p.fetch(key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(normalize_key("  ASPIRIN "), "aspirin");
        assert_eq!(normalize_key("2C-B"), "2c-b");
        assert_eq!(normalize_key("aspirin"), "aspirin");
    }

    #[test]
    fn fetch_and_lookup_errors_display() {
        assert!(FetchError::Upstream("timeout".into()).to_string().contains("timeout"));
        assert_eq!(LookupError::NotFound.to_string(), "subject not found");
    }
}
