//! Caching layer in front of a [`TrackResolver`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::{PlaylistEntry, ResolutionError, Resolved, Track, TrackResolver};
use crate::cache::TtlCache;
use crate::retry::RetryPolicy;
use crate::state::Config;

/// Memoizes resolver results and bounds concurrent resolver calls.
///
/// - Results are cached for the configured TTL under `"{query}_{expand}"`.
/// - Concurrent identical requests share a single upstream resolution.
/// - At most `resolver_concurrency` upstream calls run at once.
/// - Playlist entries are retried per the playlist-entry policy; they are not cached.
pub struct CachedResolver {
    inner: Arc<dyn TrackResolver>,
    cache: Mutex<TtlCache<String, Resolved>>,
    in_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    permits: Semaphore,
    entry_policy: RetryPolicy,
}

impl CachedResolver {
    pub fn new(inner: Arc<dyn TrackResolver>, config: &Config) -> Self {
        Self {
            inner,
            cache: Mutex::new(TtlCache::new(config.cache_capacity, config.cache_ttl())),
            in_flight: DashMap::new(),
            permits: Semaphore::new(config.resolver_concurrency.max(1)),
            entry_policy: config.playlist_entry_policy(),
        }
    }

    /// Cache key for a query and expansion flag.
    pub fn cache_key(query: &str, expand_playlist: bool) -> String {
        format!("{}_{}", query, expand_playlist)
    }

    /// Drops expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let removed = self.cache.lock().sweep();
        if removed > 0 {
            log::debug!("[Cache] Swept {} expired resolution(s)", removed);
        }
        removed
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
        log::info!("[Cache] Cleared resolution cache");
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    async fn resolve_upstream(
        &self,
        query: &str,
        expand_playlist: bool,
    ) -> Result<Resolved, ResolutionError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ResolutionError::Unavailable("resolver pool closed".into()))?;
        self.inner.resolve(query, expand_playlist).await
    }
}

#[async_trait]
impl TrackResolver for CachedResolver {
    async fn resolve(
        &self,
        query: &str,
        expand_playlist: bool,
    ) -> Result<Resolved, ResolutionError> {
        let key = Self::cache_key(query, expand_playlist);
        if let Some(hit) = self.cache.lock().get(&key) {
            log::debug!("[Cache] Hit for {}", key);
            return Ok(hit);
        }

        let gate = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = gate.lock().await;

        // A concurrent request for the same key may have finished while we waited.
        let cached = self.cache.lock().get(&key);
        let result = match cached {
            Some(hit) => Ok(hit),
            None => {
                let result = self.resolve_upstream(query, expand_playlist).await;
                if let Ok(resolved) = &result {
                    self.cache.lock().set(key.clone(), resolved.clone());
                }
                result
            }
        };

        drop(guard);
        // Only the map and this call hold the gate: nobody else is waiting on it.
        self.in_flight
            .remove_if(&key, |_, gate| Arc::strong_count(gate) <= 2);

        result
    }

    async fn resolve_entry(&self, entry: &PlaylistEntry) -> Result<Track, ResolutionError> {
        let inner = &self.inner;
        let permits = &self.permits;

        self.entry_policy
            .run_while(
                "playlist entry resolution",
                |_| async move {
                    let _permit = permits
                        .acquire()
                        .await
                        .map_err(|_| ResolutionError::Unavailable("resolver pool closed".into()))?;
                    inner.resolve_entry(entry).await
                },
                ResolutionError::is_transient,
            )
            .await
            .map_err(|exhausted| exhausted.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Resolver that counts calls and can be slowed down or made to fail.
    struct CountingResolver {
        calls: AtomicUsize,
        entry_calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
        entry_failures: usize,
        entry_error: ResolutionError,
    }

    impl CountingResolver {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                entry_calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delay,
                entry_failures: 0,
                entry_error: ResolutionError::Other("flaky".into()),
            }
        }
    }

    #[async_trait]
    impl TrackResolver for CountingResolver {
        async fn resolve(
            &self,
            query: &str,
            _expand_playlist: bool,
        ) -> Result<Resolved, ResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if query == "missing" {
                return Err(ResolutionError::NotFound(query.into()));
            }
            Ok(Resolved::Single(Track::new(
                format!("https://cdn/{}", query),
                query,
            )))
        }

        async fn resolve_entry(&self, entry: &PlaylistEntry) -> Result<Track, ResolutionError> {
            let call = self.entry_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.entry_failures {
                return Err(self.entry_error.clone());
            }
            Ok(Track::new(entry.url.clone(), entry.display_title()))
        }
    }

    fn config() -> Config {
        Config {
            resolver_concurrency: 2,
            ..Config::for_test()
        }
    }

    fn entry() -> PlaylistEntry {
        PlaylistEntry {
            url: "https://youtu.be/e".into(),
            title: Some("Entry".into()),
            duration_secs: Some(200),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_lookup_is_served_from_cache() {
        let inner = Arc::new(CountingResolver::new(Duration::from_millis(10)));
        let resolver = CachedResolver::new(inner.clone(), &config());

        let first = resolver.resolve("song", false).await.unwrap();
        let second = resolver.resolve("song", false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.cached_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expansion_flag_is_part_of_the_key() {
        let inner = Arc::new(CountingResolver::new(Duration::ZERO));
        let resolver = CachedResolver::new(inner.clone(), &config());

        resolver.resolve("song", false).await.unwrap();
        resolver.resolve("song", true).await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(CachedResolver::cache_key("song", true), "song_true");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_identical_requests_share_one_resolution() {
        let inner = Arc::new(CountingResolver::new(Duration::from_secs(1)));
        let resolver = Arc::new(CachedResolver::new(inner.clone(), &config()));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve("song", false).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert!(resolver.in_flight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_concurrency_is_bounded() {
        let inner = Arc::new(CountingResolver::new(Duration::from_secs(1)));
        let resolver = Arc::new(CachedResolver::new(inner.clone(), &config()));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve(&format!("song-{}", i), false).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(inner.calls.load(Ordering::SeqCst), 6);
        assert_eq!(inner.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_not_cached() {
        let inner = Arc::new(CountingResolver::new(Duration::ZERO));
        let resolver = CachedResolver::new(inner.clone(), &config());

        assert!(matches!(
            resolver.resolve("missing", false).await,
            Err(ResolutionError::NotFound(_))
        ));
        assert!(resolver.resolve("missing", false).await.is_err());

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.cached_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_with_the_ttl() {
        let inner = Arc::new(CountingResolver::new(Duration::ZERO));
        let resolver = CachedResolver::new(inner.clone(), &config());

        resolver.resolve("song", false).await.unwrap();
        tokio::time::advance(Duration::from_secs(3600)).await;

        assert_eq!(resolver.sweep(), 1);
        resolver.resolve("song", false).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_entry_failure_is_retried() {
        let mut inner = CountingResolver::new(Duration::ZERO);
        inner.entry_failures = 1;
        let inner = Arc::new(inner);
        let resolver = CachedResolver::new(inner.clone(), &config());

        let track = resolver.resolve_entry(&entry()).await.unwrap();

        assert_eq!(track.title, "Entry");
        assert_eq!(inner.entry_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restricted_entry_is_not_retried() {
        let mut inner = CountingResolver::new(Duration::ZERO);
        inner.entry_failures = 5;
        inner.entry_error = ResolutionError::Restricted("private".into());
        let inner = Arc::new(inner);
        let resolver = CachedResolver::new(inner.clone(), &config());

        let result = resolver.resolve_entry(&entry()).await;

        assert!(matches!(result, Err(ResolutionError::Restricted(_))));
        assert_eq!(inner.entry_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_empties_the_cache() {
        let inner = Arc::new(CountingResolver::new(Duration::ZERO));
        let resolver = CachedResolver::new(inner, &config());
        resolver.resolve("a", false).await.unwrap();
        resolver.clear();
        assert_eq!(resolver.cached_len(), 0);
    }
}
