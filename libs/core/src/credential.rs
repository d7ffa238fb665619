//! Self-refreshing bearer token cache shared by outbound API clients.
//!
//! A token is served from memory while it is more than the safety margin away
//! from expiry. On a miss exactly one fetch runs per cache; every caller that
//! misses while it is in flight awaits the same shared future and therefore
//! observes the same token or the same error. A failed fetch leaves the cache
//! empty so the next caller starts a fresh attempt.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default distance from expiry at which a cached token is refreshed.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(120);

/// Token returned by a [`TokenFetcher`], with its lifetime relative to now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedToken {
    pub token: String,
    pub expires_in: Duration,
}

/// Performs the network call that issues a new token.
#[async_trait]
pub trait TokenFetcher: Send + Sync + 'static {
    async fn fetch_token(&self) -> anyhow::Result<FetchedToken>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("token fetch failed: {0}")]
    Fetch(String),
    #[error("token endpoint returned an empty token")]
    EmptyToken,
    #[error("token endpoint returned a zero expiry")]
    ZeroExpiry,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

type InflightFetch = Shared<BoxFuture<'static, Result<CachedToken, CredentialError>>>;

#[derive(Default)]
struct CacheState {
    token: Option<CachedToken>,
    inflight: Option<(u64, InflightFetch)>,
    generation: u64,
}

pub struct CredentialCache {
    client: &'static str,
    fetcher: Arc<dyn TokenFetcher>,
    margin: Duration,
    state: Mutex<CacheState>,
}

impl CredentialCache {
    pub fn new(client: &'static str, fetcher: Arc<dyn TokenFetcher>) -> Self {
        Self::with_margin(client, fetcher, DEFAULT_REFRESH_MARGIN)
    }

    pub fn with_margin(
        client: &'static str,
        fetcher: Arc<dyn TokenFetcher>,
        margin: Duration,
    ) -> Self {
        Self {
            client,
            fetcher,
            margin,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Returns a usable token, fetching one when the cache is empty or stale.
    pub async fn get_token(&self) -> Result<String, CredentialError> {
        let (generation, fetch) = {
            let mut state = self.lock();
            if let Some(token) = state.token.as_ref().filter(|t| self.is_fresh(t)) {
                return Ok(token.value.clone());
            }
            let joined = state
                .inflight
                .as_ref()
                .map(|(generation, fetch)| (*generation, fetch.clone()));
            match joined {
                Some(joined) => joined,
                None => {
                    state.generation += 1;
                    let generation = state.generation;
                    let fetch = start_fetch(self.fetcher.clone());
                    state.inflight = Some((generation, fetch.clone()));
                    debug!(client = self.client, generation, "refreshing access token");
                    (generation, fetch)
                }
            }
        };

        let outcome = fetch.await;

        let mut state = self.lock();
        let owns_fetch = matches!(&state.inflight, Some((current, _)) if *current == generation);
        if owns_fetch {
            state.inflight = None;
            match &outcome {
                Ok(token) => {
                    state.token = Some(token.clone());
                    metrics::counter!(
                        "credential_refresh_total",
                        "client" => self.client,
                        "outcome" => "ok"
                    )
                    .increment(1);
                }
                Err(err) => {
                    warn!(client = self.client, error = %err, "access token refresh failed");
                    metrics::counter!(
                        "credential_refresh_total",
                        "client" => self.client,
                        "outcome" => "error"
                    )
                    .increment(1);
                }
            }
        }
        outcome.map(|token| token.value)
    }

    /// Drops the cached token so the next call refetches. An in-flight fetch
    /// is left alone.
    pub fn invalidate(&self) {
        self.lock().token = None;
    }

    fn is_fresh(&self, token: &CachedToken) -> bool {
        Instant::now() + self.margin < token.expires_at
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn start_fetch(fetcher: Arc<dyn TokenFetcher>) -> InflightFetch {
    async move {
        let fetched = fetcher
            .fetch_token()
            .await
            .map_err(|err| CredentialError::Fetch(format!("{err:#}")))?;
        if fetched.token.is_empty() {
            return Err(CredentialError::EmptyToken);
        }
        if fetched.expires_in.is_zero() {
            return Err(CredentialError::ZeroExpiry);
        }
        Ok(CachedToken {
            value: fetched.token,
            expires_at: Instant::now() + fetched.expires_in,
        })
    }
    .boxed()
    .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        delay: Duration,
        expires_in: Duration,
        fail_first: usize,
    }

    impl CountingFetcher {
        fn new(expires_in: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(20),
                expires_in,
                fail_first: 0,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenFetcher for CountingFetcher {
        async fn fetch_token(&self) -> anyhow::Result<FetchedToken> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if call <= self.fail_first {
                anyhow::bail!("gettoken error: 40001 invalid credential");
            }
            Ok(FetchedToken {
                token: format!("token-{call}"),
                expires_in: self.expires_in,
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_fetch() {
        let fetcher = Arc::new(CountingFetcher::new(Duration::from_secs(7200)));
        let cache = Arc::new(CredentialCache::new("test", fetcher.clone()));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_token().await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-1");
        }
        assert_eq!(fetcher.calls(), 1);

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failure_reaches_every_waiter_and_does_not_poison() {
        let mut fetcher = CountingFetcher::new(Duration::from_secs(7200));
        fetcher.fail_first = 1;
        let fetcher = Arc::new(fetcher);
        let cache = Arc::new(CredentialCache::new("test", fetcher.clone()));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_token().await })
            })
            .collect();
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, CredentialError::Fetch(ref msg) if msg.contains("40001")));
        }
        assert_eq!(fetcher.calls(), 1);

        assert_eq!(cache.get_token().await.unwrap(), "token-2");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn token_inside_margin_is_refetched() {
        let fetcher = Arc::new(CountingFetcher::new(Duration::from_secs(60)));
        let cache = CredentialCache::new("test", fetcher.clone());
        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_once_margin_is_reached() {
        let fetcher = Arc::new(CountingFetcher::new(Duration::from_secs(600)));
        let cache = CredentialCache::new("test", fetcher.clone());
        assert_eq!(cache.get_token().await.unwrap(), "token-1");

        tokio::time::advance(Duration::from_secs(400)).await;
        assert_eq!(cache.get_token().await.unwrap(), "token-1");

        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn empty_token_and_zero_expiry_are_errors() {
        struct Fixed(FetchedToken);

        #[async_trait]
        impl TokenFetcher for Fixed {
            async fn fetch_token(&self) -> anyhow::Result<FetchedToken> {
                Ok(self.0.clone())
            }
        }

        let empty = CredentialCache::new(
            "test",
            Arc::new(Fixed(FetchedToken {
                token: String::new(),
                expires_in: Duration::from_secs(7200),
            })),
        );
        assert_eq!(empty.get_token().await, Err(CredentialError::EmptyToken));

        let zero = CredentialCache::new(
            "test",
            Arc::new(Fixed(FetchedToken {
                token: "t".into(),
                expires_in: Duration::ZERO,
            })),
        );
        assert_eq!(zero.get_token().await, Err(CredentialError::ZeroExpiry));
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let fetcher = Arc::new(CountingFetcher::new(Duration::from_secs(7200)));
        let cache = CredentialCache::new("test", fetcher.clone());
        cache.get_token().await.unwrap();
        cache.invalidate();
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
    }
}
