//! In-memory subject cache — TTL + LRU bounded, with per-key request
//! coalescing.
//!
//! # Coalescing
//!
//! The first resolver of a missing/stale key becomes the leader: it installs
//! a per-key [`broadcast`] sender in the in-flight registry and spawns the
//! single upstream fetch. Every later resolver for the same key subscribes
//! to that sender instead of issuing its own fetch. The result is broadcast
//! exactly once and the registry entry removed.
//!
//! A fetch whose waiters have all gone away still runs to completion and
//! populates the cache — an abandoned fetch never poisons the entry.
//!
//! # Locking
//!
//! One mutex guards the entry map and the in-flight registry together. It is
//! only ever held for map operations — never across an `.await` — so
//! resolvers for distinct keys proceed concurrently.
//!
//! # Staleness
//!
//! An expired entry is kept in the map until LRU capacity pushes it out.
//! When a refresh fails with a transport error and a stale entry exists, the
//! stale record is served as a degraded fallback (logged, not surfaced to
//! the user). A `NotFound` from upstream is authoritative and removes the
//! entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Fetch, FetchError, LookupError, SubjectRecord, normalize_key};

// ── SubjectCache ─────────────────────────────────────────────────────────────

/// Shared cache handle. Clones are cheap and refer to the same state.
#[derive(Debug)]
pub struct SubjectCache<F: Fetch> {
    shared: Arc<Shared<F>>,
}

impl<F: Fetch> Clone for SubjectCache<F> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

#[derive(Debug)]
struct Shared<F> {
    provider: F,
    capacity: usize,
    ttl: Duration,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// key → broadcast sender for the single in-flight fetch of that key.
    inflight: HashMap<String, broadcast::Sender<Result<Arc<SubjectRecord>, LookupError>>>,
    /// Monotonic access counter backing the LRU order.
    tick: u64,
}

#[derive(Debug)]
struct Entry {
    record: Arc<SubjectRecord>,
    expires_at: Instant,
    last_used: u64,
}

/// What `resolve` decided to do while holding the lock.
/// (A fresh hit returns early and never builds a plan.)
enum Plan {
    Wait(broadcast::Receiver<Result<Arc<SubjectRecord>, LookupError>>),
    Lead(broadcast::Receiver<Result<Arc<SubjectRecord>, LookupError>>),
}

impl<F: Fetch> SubjectCache<F> {
    pub fn new(provider: F, capacity: usize, ttl: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                capacity: capacity.max(1),
                ttl,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Resolve `key` to a subject record.
    ///
    /// Cache hit within TTL → returned synchronously with no upstream call.
    /// Miss or stale → at most one upstream fetch runs per key; concurrent
    /// resolvers await its broadcast result.
    pub async fn resolve(&self, key: &str) -> Result<Arc<SubjectRecord>, LookupError> {
        let key = normalize_key(key);

        let plan = {
            let mut state = lock(&self.shared.state);
            state.tick += 1;
            let tick = state.tick;

            if let Some(entry) = state.entries.get_mut(&key) {
                if Instant::now() < entry.expires_at {
                    entry.last_used = tick;
                    return Ok(entry.record.clone());
                }
            }

            match state.inflight.get(&key) {
                Some(tx) => Plan::Wait(tx.subscribe()),
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    state.inflight.insert(key.clone(), tx);
                    Plan::Lead(rx)
                }
            }
        };

        let mut rx = match plan {
            Plan::Wait(rx) => {
                debug!(key, "joining in-flight fetch");
                rx
            }
            Plan::Lead(rx) => {
                self.spawn_fetch(key.clone());
                rx
            }
        };

        match rx.recv().await {
            Ok(result) => result,
            // Sender dropped without broadcasting — fetch task panicked.
            Err(_) => Err(LookupError::Upstream("fetch task aborted".into())),
        }
    }

    /// Number of cached entries (fresh and stale). Stable under concurrent use
    /// only in quiesced tests.
    pub fn len(&self) -> usize {
        lock(&self.shared.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the single upstream fetch for `key` on its own task, then publish
    /// the outcome to the cache and to every coalesced waiter.
    fn spawn_fetch(&self, key: String) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            debug!(key, "fetching upstream");
            let fetched = shared.provider.fetch(&key).await;

            let mut state = lock(&shared.state);
            let outcome = match fetched {
                Ok(record) => {
                    let record = Arc::new(record);
                    state.tick += 1;
                    let tick = state.tick;
                    state.entries.insert(
                        key.clone(),
                        Entry {
                            record: record.clone(),
                            expires_at: Instant::now() + shared.ttl,
                            last_used: tick,
                        },
                    );
                    evict_over_capacity(&mut state, shared.capacity);
                    Ok(record)
                }
                Err(FetchError::NotFound) => {
                    // Upstream is authoritative: a stale entry for a key it no
                    // longer knows must not linger.
                    state.entries.remove(&key);
                    Err(LookupError::NotFound)
                }
                Err(FetchError::Upstream(msg)) => {
                    if state.entries.contains_key(&key) {
                        warn!(key, error = %msg, "refresh failed, serving stale entry");
                        state.tick += 1;
                        let tick = state.tick;
                        let entry = state.entries.get_mut(&key).expect("checked above");
                        entry.last_used = tick;
                        Ok(entry.record.clone())
                    } else {
                        Err(LookupError::Upstream(msg))
                    }
                }
            };

            if let Some(tx) = state.inflight.remove(&key) {
                // All waiters may have disconnected; a failed send is fine —
                // the cache entry above is already in place.
                let _ = tx.send(outcome);
            }
        });
    }
}

/// Evict least-recently-used entries until the map fits `capacity`.
/// In-flight keys are not in `entries` and are never evicted here.
fn evict_over_capacity(state: &mut State, capacity: usize) {
    while state.entries.len() > capacity {
        let Some(victim) = state
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone())
        else {
            break;
        };
        debug!(key = %victim, "evicting least-recently-used entry");
        state.entries.remove(&victim);
    }
}

/// Lock helper that recovers from poisoning — a panicked fetch task must not
/// take the whole cache down with it.
fn lock(m: &Mutex<State>) -> MutexGuard<'_, State> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── stub provider ────────────────────────────────────────────────────────

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Mode {
        Ok,
        NotFound,
        Fail,
        /// Sleep before answering — lets tests overlap resolvers.
        Slow(Duration),
    }

    struct StubProvider {
        calls: AtomicUsize,
        mode: Mutex<Mode>,
    }

    impl StubProvider {
        fn new(mode: Mode) -> Self {
            Self { calls: AtomicUsize::new(0), mode: Mutex::new(mode) }
        }

        fn set_mode(&self, mode: Mode) {
            *self.mode.lock().unwrap() = mode;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn record(key: &str) -> SubjectRecord {
            SubjectRecord {
                key: key.to_string(),
                name: key.to_uppercase(),
                url: None,
                chemical_classes: vec!["TestClass".into()],
                psychoactive_classes: Vec::new(),
                summary: Vec::new(),
                schematic: None,
                last_fetched: Utc::now(),
            }
        }
    }

    impl Fetch for Arc<StubProvider> {
        async fn fetch(&self, key: &str) -> Result<SubjectRecord, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mode = *self.mode.lock().unwrap();
            match mode {
                Mode::Ok => Ok(StubProvider::record(key)),
                Mode::NotFound => Err(FetchError::NotFound),
                Mode::Fail => Err(FetchError::Upstream("stub failure".into())),
                Mode::Slow(d) => {
                    tokio::time::sleep(d).await;
                    Ok(StubProvider::record(key))
                }
            }
        }
    }

    fn cache_with(
        mode: Mode,
        capacity: usize,
        ttl: Duration,
    ) -> (Arc<StubProvider>, SubjectCache<Arc<StubProvider>>) {
        let provider = Arc::new(StubProvider::new(mode));
        let cache = SubjectCache::new(provider.clone(), capacity, ttl);
        (provider, cache)
    }

    // ── tests ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn miss_fetches_then_hit_is_free() {
        let (provider, cache) = cache_with(Mode::Ok, 8, Duration::from_secs(60));

        let first = cache.resolve("aspirin").await.unwrap();
        assert_eq!(first.name, "ASPIRIN");
        assert_eq!(provider.calls(), 1);

        let second = cache.resolve("aspirin").await.unwrap();
        assert_eq!(provider.calls(), 1, "hit within TTL must not call upstream");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn keys_are_case_normalized() {
        let (provider, cache) = cache_with(Mode::Ok, 8, Duration::from_secs(60));

        cache.resolve("aspirin").await.unwrap();
        cache.resolve("ASPIRIN").await.unwrap();
        cache.resolve("  Aspirin ").await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_resolves_coalesce_into_one_fetch() {
        let (provider, cache) =
            cache_with(Mode::Slow(Duration::from_millis(50)), 8, Duration::from_secs(60));

        let (a, b) = tokio::join!(cache.resolve("lsd"), cache.resolve("lsd"));
        assert_eq!(a.unwrap().name, "LSD");
        assert_eq!(b.unwrap().name, "LSD");
        assert_eq!(provider.calls(), 1, "coalesced resolvers must share one fetch");
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_fetch_independently() {
        let (provider, cache) =
            cache_with(Mode::Slow(Duration::from_millis(50)), 8, Duration::from_secs(60));

        let (a, b) = tokio::join!(cache.resolve("lsd"), cache.resolve("mdma"));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_triggers_refresh() {
        let (provider, cache) = cache_with(Mode::Ok, 8, Duration::from_secs(10));

        cache.resolve("caffeine").await.unwrap();
        assert_eq!(provider.calls(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;

        cache.resolve("caffeine").await.unwrap();
        assert_eq!(provider.calls(), 2, "stale entry must not be served without a refresh attempt");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_served_when_refresh_fails() {
        let (provider, cache) = cache_with(Mode::Ok, 8, Duration::from_secs(10));

        let fresh = cache.resolve("caffeine").await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        provider.set_mode(Mode::Fail);

        let degraded = cache.resolve("caffeine").await.unwrap();
        assert_eq!(provider.calls(), 2);
        assert!(Arc::ptr_eq(&fresh, &degraded), "fallback must be the stale record");
    }

    #[tokio::test]
    async fn failure_without_stale_surfaces_upstream_error() {
        let (provider, cache) = cache_with(Mode::Fail, 8, Duration::from_secs(60));

        let err = cache.resolve("caffeine").await.unwrap_err();
        assert!(matches!(err, LookupError::Upstream(_)));
        assert_eq!(provider.calls(), 1);
        assert!(cache.is_empty(), "failed fetch must not populate the cache");
    }

    #[tokio::test]
    async fn not_found_is_surfaced_and_not_cached() {
        let (_provider, cache) = cache_with(Mode::NotFound, 8, Duration::from_secs(60));

        assert_eq!(cache.resolve("bogus").await.unwrap_err(), LookupError::NotFound);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_not_found_removes_stale_entry() {
        let (provider, cache) = cache_with(Mode::Ok, 8, Duration::from_secs(10));

        cache.resolve("delisted").await.unwrap();
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        provider.set_mode(Mode::NotFound);

        assert_eq!(cache.resolve("delisted").await.unwrap_err(), LookupError::NotFound);
        assert!(cache.is_empty(), "authoritative not-found must drop the stale entry");
    }

    #[tokio::test]
    async fn lru_evicts_least_recently_used_beyond_capacity() {
        let (provider, cache) = cache_with(Mode::Ok, 2, Duration::from_secs(60));

        cache.resolve("a").await.unwrap();
        cache.resolve("b").await.unwrap();
        // Touch "a" so "b" becomes the LRU victim.
        cache.resolve("a").await.unwrap();
        cache.resolve("c").await.unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(provider.calls(), 3);

        // "a" survived, "b" was evicted.
        cache.resolve("a").await.unwrap();
        assert_eq!(provider.calls(), 3);
        cache.resolve("b").await.unwrap();
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_fetch_still_populates_cache() {
        let (provider, cache) =
            cache_with(Mode::Slow(Duration::from_millis(50)), 8, Duration::from_secs(60));

        // Start a resolve and drop it before the fetch completes.
        {
            let fut = cache.resolve("lsd");
            tokio::pin!(fut);
            let poll = futures_poll_once(fut.as_mut()).await;
            assert!(poll.is_none(), "fetch should still be in flight");
        } // future dropped here — its waiter disconnects

        // Let the background fetch finish.
        tokio::time::sleep(Duration::from_millis(60)).await;

        cache.resolve("lsd").await.unwrap();
        assert_eq!(provider.calls(), 1, "completed orphan fetch must serve later resolvers");
    }

    /// Poll a future exactly once; `None` if it is pending.
    async fn futures_poll_once<F: Future + Unpin>(f: F) -> Option<F::Output> {
        use std::pin::Pin;
        use std::task::{Context, Poll};

        struct Once<F>(Option<F>);
        impl<F: Future + Unpin> Future for Once<F> {
            type Output = Option<F::Output>;
            fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
                let inner = self.0.as_mut().expect("polled after completion");
                match Pin::new(inner).poll(cx) {
                    Poll::Ready(v) => Poll::Ready(Some(v)),
                    Poll::Pending => Poll::Ready(None),
                }
            }
        }
        Once(Some(f)).await
    }
}
