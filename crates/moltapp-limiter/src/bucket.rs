use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use moltapp_models::config::RateLimiterConfig;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LimiterError;

/// Token-bucket admission control for one external dependency.
///
/// Requests that find no token wait in a FIFO queue. A background task
/// refills the bucket every `refill_interval_ms` and hands tokens to the
/// queue head first, so a newcomer never overtakes a queued request.
/// The bucket state is also refilled lazily on each `acquire`, computed from
/// elapsed wall-clock time, so overlapping refills never double-count.
pub struct TokenBucket {
    name: String,
    config: RateLimiterConfig,
    state: Arc<Mutex<BucketState>>,
    cancel: CancellationToken,
}

/// Point-in-time view of a bucket, for operational dashboards.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RateLimiterMetrics {
    pub name: String,
    pub tokens: u32,
    pub max_tokens: u32,
    pub queue_depth: usize,
    pub total_requests: u64,
    /// Requests that had to queue.
    pub rate_limit_hits: u64,
    /// Requests refused because the queue was full or the bucket shut down.
    pub rejected_requests: u64,
    pub total_wait_ms: u64,
    /// Mean wait across all admitted requests (immediate ones count as zero).
    pub average_wait_ms: f64,
}

struct Waiter {
    grant: oneshot::Sender<Result<(), LimiterError>>,
    enqueued_at: Instant,
}

struct BucketState {
    tokens: u32,
    last_refill: Instant,
    queue: VecDeque<Waiter>,
    closed: bool,
    total_requests: u64,
    admitted: u64,
    rate_limit_hits: u64,
    rejected_requests: u64,
    total_wait: Duration,
}

impl BucketState {
    /// Add `refill_rate` tokens for every whole interval elapsed since the
    /// last refill. The fractional remainder carries over.
    fn refill(&mut self, config: &RateLimiterConfig, now: Instant) -> u32 {
        let interval = Duration::from_millis(config.refill_interval_ms);
        let elapsed = now.saturating_duration_since(self.last_refill);
        let intervals =
            (elapsed.as_millis() / interval.as_millis()).min(u128::from(u32::MAX)) as u32;
        if intervals == 0 {
            return 0;
        }

        self.last_refill += interval * intervals;
        let before = self.tokens;
        let added = u64::from(config.refill_rate) * u64::from(intervals);
        self.tokens = (u64::from(self.tokens) + added).min(u64::from(config.max_tokens)) as u32;
        self.tokens - before
    }

    /// Grant tokens to queued requests in FIFO order while tokens remain.
    fn drain(&mut self, now: Instant) -> usize {
        let mut granted = 0;
        while self.tokens > 0 {
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            let waited = now.saturating_duration_since(waiter.enqueued_at);
            // A caller that gave up (dropped its future) does not consume a token.
            if waiter.grant.send(Ok(())).is_ok() {
                self.tokens -= 1;
                self.admitted += 1;
                self.total_wait += waited;
                granted += 1;
            }
        }
        granted
    }
}

impl TokenBucket {
    /// Create a bucket and start its refill task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Result<Self, LimiterError> {
        let name = name.into();
        validate(&name, &config)?;

        let tokens = config
            .initial_tokens
            .unwrap_or(config.max_tokens)
            .min(config.max_tokens);
        let state = Arc::new(Mutex::new(BucketState {
            tokens,
            last_refill: Instant::now(),
            queue: VecDeque::new(),
            closed: false,
            total_requests: 0,
            admitted: 0,
            rate_limit_hits: 0,
            rejected_requests: 0,
            total_wait: Duration::ZERO,
        }));

        let cancel = CancellationToken::new();
        spawn_refill_loop(name.clone(), config.clone(), state.clone(), cancel.clone());

        info!(
            limiter = %name,
            max_tokens = config.max_tokens,
            refill_rate = config.refill_rate,
            refill_interval_ms = config.refill_interval_ms,
            "Rate limiter started"
        );

        Ok(Self {
            name,
            config,
            state,
            cancel,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Run `operation` once a token is available.
    ///
    /// Returns the operation's own result, or the limiter rejection converted
    /// into the caller's error type.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LimiterError>,
    {
        self.acquire().await?;
        operation().await
    }

    /// Take one token, waiting in the FIFO queue if none is available.
    pub async fn acquire(&self) -> Result<(), LimiterError> {
        let rx = {
            let mut state = self.lock();
            state.total_requests += 1;

            if state.closed {
                state.rejected_requests += 1;
                return Err(LimiterError::Shutdown(self.name.clone()));
            }

            let now = Instant::now();
            state.refill(&self.config, now);
            state.drain(now);

            if state.queue.is_empty() && state.tokens > 0 {
                state.tokens -= 1;
                state.admitted += 1;
                return Ok(());
            }

            if let Some(max_queue_size) = self.config.max_queue_size {
                if state.queue.len() >= max_queue_size {
                    state.rejected_requests += 1;
                    warn!(limiter = %self.name, max_queue_size, "Rate limiter queue full");
                    return Err(LimiterError::QueueFull {
                        limiter: self.name.clone(),
                        max_queue_size,
                    });
                }
            }

            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiter {
                grant: tx,
                enqueued_at: now,
            });
            state.rate_limit_hits += 1;
            debug!(
                limiter = %self.name,
                queue_depth = state.queue.len(),
                "Rate limit hit, request queued"
            );
            rx
        };

        match rx.await {
            Ok(result) => result,
            // Sender dropped without a grant: the bucket went away.
            Err(_) => Err(LimiterError::Shutdown(self.name.clone())),
        }
    }

    pub fn metrics(&self) -> RateLimiterMetrics {
        let state = self.lock();
        let total_wait_ms = state.total_wait.as_millis() as u64;
        let average_wait_ms = if state.admitted == 0 {
            0.0
        } else {
            total_wait_ms as f64 / state.admitted as f64
        };
        RateLimiterMetrics {
            name: self.name.clone(),
            tokens: state.tokens,
            max_tokens: self.config.max_tokens,
            queue_depth: state.queue.len(),
            total_requests: state.total_requests,
            rate_limit_hits: state.rate_limit_hits,
            rejected_requests: state.rejected_requests,
            total_wait_ms,
            average_wait_ms,
        }
    }

    /// Stop refilling and reject every queued request. Returns how many were rejected.
    pub fn shutdown(&self) -> usize {
        self.cancel.cancel();
        let pending: Vec<Waiter> = {
            let mut state = self.lock();
            if state.closed {
                return 0;
            }
            state.closed = true;
            state.rejected_requests += state.queue.len() as u64;
            state.queue.drain(..).collect()
        };

        let rejected = pending.len();
        for waiter in pending {
            let _ = waiter
                .grant
                .send(Err(LimiterError::Shutdown(self.name.clone())));
        }
        info!(limiter = %self.name, rejected, "Rate limiter shut down");
        rejected
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        // No code path panics while holding the lock, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for TokenBucket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn validate(name: &str, config: &RateLimiterConfig) -> Result<(), LimiterError> {
    let invalid = |reason: &str| LimiterError::InvalidConfig {
        limiter: name.to_string(),
        reason: reason.to_string(),
    };
    if config.max_tokens == 0 {
        return Err(invalid("max_tokens must be positive"));
    }
    if config.refill_rate == 0 {
        return Err(invalid("refill_rate must be positive"));
    }
    if config.refill_interval_ms == 0 {
        return Err(invalid("refill_interval_ms must be positive"));
    }
    Ok(())
}

fn spawn_refill_loop(
    name: String,
    config: RateLimiterConfig,
    state: Arc<Mutex<BucketState>>,
    cancel: CancellationToken,
) {
    let period = Duration::from_millis(config.refill_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(limiter = %name, "Refill loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
                    let now = Instant::now();
                    let added = guard.refill(&config, now);
                    let granted = guard.drain(now);
                    if granted > 0 {
                        debug!(
                            limiter = %name,
                            added,
                            granted,
                            queue_depth = guard.queue.len(),
                            "Refilled and drained queue"
                        );
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_at(now: Instant, tokens: u32) -> BucketState {
        BucketState {
            tokens,
            last_refill: now,
            queue: VecDeque::new(),
            closed: false,
            total_requests: 0,
            admitted: 0,
            rate_limit_hits: 0,
            rejected_requests: 0,
            total_wait: Duration::ZERO,
        }
    }

    #[test]
    fn refill_counts_whole_intervals_only() {
        let config = RateLimiterConfig::new(10, 2, 1_000);
        let start = Instant::now();
        let mut state = state_at(start, 0);

        assert_eq!(state.refill(&config, start + Duration::from_millis(999)), 0);
        assert_eq!(state.refill(&config, start + Duration::from_millis(2_500)), 4);
        assert_eq!(state.tokens, 4);
        // The 500ms remainder carries into the next interval.
        assert_eq!(state.refill(&config, start + Duration::from_millis(3_000)), 2);
        assert_eq!(state.tokens, 6);
    }

    #[test]
    fn overlapping_refills_do_not_double_count() {
        let config = RateLimiterConfig::new(10, 1, 100);
        let start = Instant::now();
        let mut state = state_at(start, 0);
        let later = start + Duration::from_millis(300);

        state.refill(&config, later);
        state.refill(&config, later);
        state.refill(&config, later);
        assert_eq!(state.tokens, 3);
    }

    #[test]
    fn refill_caps_at_max_tokens() {
        let config = RateLimiterConfig::new(3, 5, 100);
        let start = Instant::now();
        let mut state = state_at(start, 1);

        state.refill(&config, start + Duration::from_secs(60));
        assert_eq!(state.tokens, 3);
    }

    #[test]
    fn drain_skips_abandoned_waiters_without_spending_tokens() {
        let start = Instant::now();
        let mut state = state_at(start, 1);

        let (gone_tx, gone_rx) = oneshot::channel();
        drop(gone_rx);
        let (live_tx, mut live_rx) = oneshot::channel();
        state.queue.push_back(Waiter {
            grant: gone_tx,
            enqueued_at: start,
        });
        state.queue.push_back(Waiter {
            grant: live_tx,
            enqueued_at: start,
        });

        assert_eq!(state.drain(start), 1);
        assert_eq!(state.tokens, 0);
        assert!(state.queue.is_empty());
        assert_eq!(live_rx.try_recv().unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let err = TokenBucket::new("bad", RateLimiterConfig::new(0, 1, 1_000))
            .err()
            .unwrap();
        assert!(matches!(err, LimiterError::InvalidConfig { .. }));

        assert!(TokenBucket::new("bad", RateLimiterConfig::new(1, 0, 1_000)).is_err());
        assert!(TokenBucket::new("bad", RateLimiterConfig::new(1, 1, 0)).is_err());
    }

    #[tokio::test]
    async fn initial_tokens_are_capped() {
        let bucket = TokenBucket::new(
            "capped",
            RateLimiterConfig::new(2, 1, 1_000).with_initial_tokens(9),
        )
        .unwrap();
        assert_eq!(bucket.metrics().tokens, 2);
    }
}
