//! Rate limiting for the embedding collaborator.
//!
//! Two independent bounds are enforced:
//! - at most `max_concurrency` calls in flight, via a semaphore
//! - at most `requests_per_minute` grants in any rolling window, via a grant log
//!
//! A grant is logged at the moment the permit is handed out and only ages out
//! of the log once the window has passed. Dropping a permit early frees its
//! concurrency slot but never its window slot.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::error::{MagpieError, MagpieResult};
use crate::traits::Embedder;

/// Configuration for the embedding rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum concurrent embedding calls. Default: 4
    pub max_concurrency: usize,
    /// Maximum grants per rolling window. Default: 60
    pub requests_per_minute: usize,
    /// Rolling window length in milliseconds. Default: 60000
    pub window_ms: u64,
    /// How long `acquire_timeout` waits before giving up. Default: 30000
    pub acquire_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            requests_per_minute: 60,
            window_ms: 60_000,
            acquire_timeout_ms: 30_000,
        }
    }
}

impl RateLimitConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be at least 1");
        }
        if self.requests_per_minute == 0 {
            return Err("requests_per_minute must be at least 1");
        }
        if self.window_ms == 0 {
            return Err("window_ms must be positive");
        }
        Ok(())
    }
}

/// Permission to make one embedding call.
///
/// Holds a concurrency slot until dropped.
#[derive(Debug)]
pub struct RateLimitPermit {
    _slot: OwnedSemaphorePermit,
    granted_at: Instant,
}

impl RateLimitPermit {
    /// When this permit was granted.
    pub fn granted_at(&self) -> Instant {
        self.granted_at
    }
}

/// Shared limiter for every embedding call in the process.
#[derive(Debug)]
pub struct EmbeddingRateLimiter {
    semaphore: Arc<Semaphore>,
    grants: Mutex<VecDeque<Instant>>,
    max_concurrency: usize,
    requests_per_window: usize,
    window: Duration,
    acquire_timeout: Duration,
}

impl EmbeddingRateLimiter {
    /// Create a limiter from config.
    pub fn new(config: &RateLimitConfig) -> MagpieResult<Self> {
        config.validate().map_err(|e| MagpieError::Configuration(e.to_string()))?;
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            grants: Mutex::new(VecDeque::with_capacity(config.requests_per_minute)),
            max_concurrency: config.max_concurrency,
            requests_per_window: config.requests_per_minute,
            window: Duration::from_millis(config.window_ms),
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
        })
    }

    /// Wait for a concurrency slot and a window slot, then grant a permit.
    pub async fn acquire(&self) -> MagpieResult<RateLimitPermit> {
        let slot = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| MagpieError::internal(format!("Rate limiter closed: {}", e)))?;

        loop {
            let wake_at = {
                let mut grants = self.lock_grants()?;
                let now = Instant::now();
                self.prune(&mut grants, now);

                if grants.len() < self.requests_per_window {
                    grants.push_back(now);
                    return Ok(RateLimitPermit {
                        _slot: slot,
                        granted_at: now,
                    });
                }
                // Window is full, so the log is non-empty.
                grants.front().map(|oldest| *oldest + self.window)
            };

            match wake_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => tokio::task::yield_now().await,
            }
        }
    }

    /// Like [`acquire`](Self::acquire), bounded by the configured timeout.
    pub async fn acquire_timeout(&self) -> MagpieResult<RateLimitPermit> {
        match tokio::time::timeout(self.acquire_timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => {
                let retry_after_ms = self.retry_after().map(|d| d.as_millis() as u64);
                tracing::warn!(
                    timeout_ms = self.acquire_timeout.as_millis() as u64,
                    ?retry_after_ms,
                    "embedding rate limit permit not granted in time"
                );
                Err(MagpieError::rate_limit_timeout(
                    format!(
                        "no embedding permit within {}ms",
                        self.acquire_timeout.as_millis()
                    ),
                    retry_after_ms,
                ))
            }
        }
    }

    /// Calls currently holding a concurrency slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrency - self.semaphore.available_permits()
    }

    /// Grants still inside the rolling window.
    pub fn grants_in_window(&self) -> usize {
        match self.grants.lock() {
            Ok(mut grants) => {
                self.prune(&mut grants, Instant::now());
                grants.len()
            }
            Err(_) => 0,
        }
    }

    /// Time until the oldest logged grant leaves the window, if the window is full.
    fn retry_after(&self) -> Option<Duration> {
        let mut grants = self.grants.lock().ok()?;
        let now = Instant::now();
        self.prune(&mut grants, now);
        if grants.len() < self.requests_per_window {
            return None;
        }
        grants
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
    }

    fn prune(&self, grants: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = grants.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                grants.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock_grants(&self) -> MagpieResult<std::sync::MutexGuard<'_, VecDeque<Instant>>> {
        self.grants
            .lock()
            .map_err(|e| MagpieError::internal(format!("Lock error: {}", e)))
    }
}

/// An [`Embedder`] whose every call goes through a shared [`EmbeddingRateLimiter`].
pub struct RateLimitedEmbedder<E> {
    inner: E,
    limiter: Arc<EmbeddingRateLimiter>,
}

impl<E: Embedder> RateLimitedEmbedder<E> {
    /// Wrap an embedder with a shared limiter.
    pub fn new(inner: E, limiter: Arc<EmbeddingRateLimiter>) -> Self {
        Self { inner, limiter }
    }

    /// The shared limiter.
    pub fn limiter(&self) -> &Arc<EmbeddingRateLimiter> {
        &self.limiter
    }

    /// The wrapped embedder.
    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: Embedder> Embedder for RateLimitedEmbedder<E> {
    async fn embed(&self, text: &str) -> MagpieResult<Vec<f32>> {
        let _permit = self.limiter.acquire_timeout().await?;
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> MagpieResult<Vec<Vec<f32>>> {
        // One provider request, one grant.
        let _permit = self.limiter.acquire_timeout().await?;
        self.inner.embed_batch(texts).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limiter(max_concurrency: usize, rpm: usize, timeout_ms: u64) -> Arc<EmbeddingRateLimiter> {
        Arc::new(
            EmbeddingRateLimiter::new(&RateLimitConfig {
                max_concurrency,
                requests_per_minute: rpm,
                window_ms: 60_000,
                acquire_timeout_ms: timeout_ms,
            })
            .unwrap(),
        )
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> MagpieResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_window_exceeds_rpm() {
        let limiter = limiter(16, 3, 600_000);
        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let permit = limiter.acquire().await.unwrap();
                permit.granted_at()
            }));
        }

        let mut granted = Vec::new();
        for handle in handles {
            granted.push(handle.await.unwrap());
        }
        granted.sort();

        let window = Duration::from_secs(60);
        for i in 0..granted.len().saturating_sub(3) {
            assert!(
                granted[i + 3].duration_since(granted[i]) >= window,
                "grants {} and {} fall in one window",
                i,
                i + 3
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound() {
        let limiter = limiter(2, 1_000, 600_000);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_permit_keeps_window_slot() {
        let limiter = limiter(4, 2, 1_000);
        drop(limiter.acquire().await.unwrap());
        drop(limiter.acquire().await.unwrap());
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.grants_in_window(), 2);

        let err = limiter.acquire_timeout().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RateAcquireTimeout);
        match err {
            MagpieError::RateLimitTimeout { retry_after_ms, .. } => {
                let retry = retry_after_ms.unwrap();
                assert!(retry > 0 && retry <= 60_000);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slot_frees_after_window() {
        let limiter = limiter(4, 1, 120_000);
        let first = limiter.acquire().await.unwrap().granted_at();
        let second = limiter.acquire_timeout().await.unwrap().granted_at();
        assert!(second.duration_since(first) >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_embedder_delegates() {
        let embedder = RateLimitedEmbedder::new(
            CountingEmbedder {
                calls: AtomicUsize::new(0),
            },
            limiter(1, 10, 1_000),
        );

        assert_eq!(embedder.embed("abc").await.unwrap(), vec![3.0, 1.0]);
        assert_eq!(embedder.dimension(), 2);
        assert_eq!(embedder.model_name(), "counting");
        assert_eq!(embedder.limiter().grants_in_window(), 1);
        assert_eq!(embedder.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_config_validate() {
        assert!(RateLimitConfig::default().validate().is_ok());
        let bad = RateLimitConfig {
            requests_per_minute: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(EmbeddingRateLimiter::new(&bad).is_err());
    }
}
