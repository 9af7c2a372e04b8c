//! The polite request controller (C2): a shared token bucket plus
//! per-phase bounded concurrency and adaptive exponential backoff.
//!
//! The token bucket itself is the same replenish-by-elapsed-time shape
//! as `proxy::count_tokens::RateLimiter`, generalized from a sync
//! `Mutex`-guarded counter to an async one so `acquire` can suspend
//! instead of spin-polling, and from one phase to two (person vs.
//! relationship) with independent `tokio::sync::Semaphore` concurrency
//! caps, per spec.md §4.2/§5.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use crate::error::{CrawlError, Result};

#[derive(Debug, Clone, Copy)]
pub enum Phase {
    Person,
    Relationship,
}

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub requests_per_second: f64,
    pub burst: f64,
    pub max_concurrent_person_requests: usize,
    pub max_concurrent_relationship_requests: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub backoff_max: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5.0,
            burst: 5.0,
            max_concurrent_person_requests: 4,
            max_concurrent_relationship_requests: 4,
            max_retries: 5,
            backoff_base: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            backoff_max: Duration::from_secs(60),
        }
    }
}

struct TokenBucket {
    tokens: f64,
    last_update: Instant,
    rate: f64,
    capacity: f64,
}

impl TokenBucket {
    fn new(rate: f64, capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
            rate,
            capacity,
        }
    }

    /// Replenish, then return the wait duration (zero if a token is
    /// already available) and consume one token optimistically.
    fn acquire_wait(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Duration::ZERO
        } else {
            let deficit = 1.0 - self.tokens;
            self.tokens = 0.0;
            Duration::from_secs_f64(deficit / self.rate.max(0.001))
        }
    }

    fn set_rate(&mut self, rate: f64) {
        self.rate = rate.max(0.01);
    }
}

enum Suspend {
    Paused,
    Stopped,
}

/// Cooperative pause/stop control shared with the control plane (C8).
#[derive(Default)]
struct Gate {
    paused: AtomicBool,
    stopped: AtomicBool,
}

impl Gate {
    fn state(&self) -> Option<Suspend> {
        if self.stopped.load(Ordering::SeqCst) {
            Some(Suspend::Stopped)
        } else if self.paused.load(Ordering::SeqCst) {
            Some(Suspend::Paused)
        } else {
            None
        }
    }
}

/// One shared instance per run, handed to both the person-fetching and
/// relationship-resolution phases.
pub struct RateController {
    config: ThrottleConfig,
    bucket: Mutex<TokenBucket>,
    person_slots: Semaphore,
    relationship_slots: Semaphore,
    consecutive_failures: AtomicU32,
    gate: Gate,
    /// A server-literal `Retry-After` value from the most recent 429,
    /// consumed (one-shot) by the next `acquire()`'s backoff sleep.
    forced_delay: Mutex<Option<Duration>>,
}

/// Held while a caller has a concurrency slot; releases it on drop.
pub struct Permit<'a> {
    _slot: tokio::sync::SemaphorePermit<'a>,
}

impl RateController {
    pub fn new(config: ThrottleConfig) -> Self {
        let capacity = config.burst.max(config.requests_per_second);
        Self {
            bucket: Mutex::new(TokenBucket::new(config.requests_per_second, capacity)),
            person_slots: Semaphore::new(config.max_concurrent_person_requests),
            relationship_slots: Semaphore::new(config.max_concurrent_relationship_requests),
            consecutive_failures: AtomicU32::new(0),
            gate: Gate::default(),
            forced_delay: Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Acquire a permit: blocks until a concurrency slot is free for
    /// `phase` and the token bucket has a token. Blocks indefinitely
    /// while paused; returns `Cancelled` immediately on stop.
    pub async fn acquire(&self, phase: Phase) -> Result<Permit<'_>> {
        loop {
            match self.gate.state() {
                Some(Suspend::Stopped) => return Err(CrawlError::Cancelled),
                Some(Suspend::Paused) => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                }
                None => break,
            }
        }

        let semaphore = match phase {
            Phase::Person => &self.person_slots,
            Phase::Relationship => &self.relationship_slots,
        };
        let slot = semaphore
            .acquire()
            .await
            .expect("rate controller semaphore never closes");

        loop {
            if matches!(self.gate.state(), Some(Suspend::Stopped)) {
                return Err(CrawlError::Cancelled);
            }
            let wait = {
                let mut bucket = self.bucket.lock().await;
                bucket.acquire_wait()
            };
            if wait.is_zero() {
                break;
            }
            tokio::time::sleep(wait).await;
        }

        // Adaptive backoff: while failures are outstanding, every
        // acquisition pays an extra equal-jitter sleep on top of the
        // token bucket's own pacing, floored at `backoff_base` so a
        // lucky low jitter roll can never violate the post-429 delay
        // floor. A literal `Retry-After` value from the triggering
        // response takes precedence if it's the larger of the two.
        let failures = self.consecutive_failures.load(Ordering::SeqCst);
        if failures > 0 {
            let backoff = self.backoff_duration(failures);
            let floor = self.config.backoff_base;
            let span = backoff.saturating_sub(floor);
            let jittered = floor + Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=span.as_secs_f64()));
            let forced = self.forced_delay.lock().await.take();
            let sleep_for = match forced {
                Some(f) => f.max(jittered),
                None => jittered,
            };
            tokio::time::sleep(sleep_for).await;
        }

        Ok(Permit { _slot: slot })
    }

    fn backoff_duration(&self, failures: u32) -> Duration {
        let scaled = self.config.backoff_base.as_secs_f64()
            * self.config.backoff_multiplier.powi(failures as i32);
        Duration::from_secs_f64(scaled.min(self.config.backoff_max.as_secs_f64()))
    }

    /// Report a 429/5xx: enters adaptive backoff and halves the
    /// effective rps until a success is reported. `retry_after_secs`,
    /// when the response carried a literal `Retry-After` header, is
    /// remembered and applied as a floor on the next `acquire()`'s
    /// backoff sleep (spec.md §8 S5).
    pub async fn report_throttled(&self, retry_after_secs: Option<u64>) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let mut bucket = self.bucket.lock().await;
        let halved = (bucket.rate / 2.0).max(self.config.requests_per_second * 0.01);
        bucket.set_rate(halved);
        tracing::warn!(failures, new_rate = halved, "rate controller entering backoff");
        if let Some(secs) = retry_after_secs {
            *self.forced_delay.lock().await = Some(Duration::from_secs(secs));
        }
    }

    /// Report a successful request: recovers the effective rps
    /// geometrically and clears the failure streak once fully
    /// recovered.
    pub async fn report_success(&self) {
        let mut bucket = self.bucket.lock().await;
        if bucket.rate < self.config.requests_per_second {
            bucket.set_rate((bucket.rate * 1.5).min(self.config.requests_per_second));
        } else {
            self.consecutive_failures.store(0, Ordering::SeqCst);
        }
    }

    /// Block permit acquisition indefinitely until resumed.
    pub fn pause(&self) {
        self.gate.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.gate.paused.store(false, Ordering::SeqCst);
    }

    /// Permit acquisition now returns `Cancelled` immediately.
    pub fn stop(&self) {
        self.gate.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.gate.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.gate.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_respects_concurrency_cap() {
        let controller = RateController::new(ThrottleConfig {
            requests_per_second: 1000.0,
            burst: 1000.0,
            max_concurrent_person_requests: 1,
            ..ThrottleConfig::default()
        });
        let permit1 = controller.acquire(Phase::Person).await.unwrap();
        assert_eq!(controller.person_slots.available_permits(), 0);
        drop(permit1);
        assert_eq!(controller.person_slots.available_permits(), 1);
    }

    #[tokio::test]
    async fn stop_cancels_pending_acquisitions() {
        let controller = RateController::new(ThrottleConfig::default());
        controller.stop();
        let result = controller.acquire(Phase::Person).await;
        assert!(matches!(result, Err(CrawlError::Cancelled)));
    }

    #[tokio::test]
    async fn backoff_grows_with_consecutive_failures() {
        let controller = RateController::new(ThrottleConfig::default());
        let d1 = controller.backoff_duration(1);
        let d2 = controller.backoff_duration(2);
        assert!(d2 >= d1);
    }

    #[tokio::test]
    async fn report_throttled_halves_rate() {
        let controller = RateController::new(ThrottleConfig {
            requests_per_second: 10.0,
            burst: 10.0,
            ..ThrottleConfig::default()
        });
        controller.report_throttled(None).await;
        let rate = controller.bucket.lock().await.rate;
        assert!((rate - 5.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn backoff_sleep_never_drops_below_backoff_base() {
        let controller = RateController::new(ThrottleConfig {
            requests_per_second: 1000.0,
            burst: 1000.0,
            backoff_base: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            ..ThrottleConfig::default()
        });
        controller.report_throttled(None).await;
        let started = Instant::now();
        let _permit = controller.acquire(Phase::Person).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn retry_after_forces_at_least_that_long_a_delay() {
        let controller = RateController::new(ThrottleConfig {
            requests_per_second: 1000.0,
            burst: 1000.0,
            backoff_base: Duration::from_millis(10),
            backoff_multiplier: 1.0,
            ..ThrottleConfig::default()
        });
        controller.report_throttled(Some(1)).await;
        let started = Instant::now();
        let _permit = controller.acquire(Phase::Person).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
