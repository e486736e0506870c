//! GCRA rate limiting for source crawls, built on `governor`.
//!
//! The limiters read time through [`TokioClock`] and wait with
//! `tokio::time::sleep`, so tests can run against a paused clock.

use std::{fmt, num::NonZeroU32, ops::Add, time::Duration};

use governor::{
  Quota, RateLimiter,
  clock::{Clock, Reference},
  middleware::NoOpMiddleware,
  nanos::Nanos,
  state::{InMemoryState, NotKeyed},
};
use tokio::time::Instant;

use crate::config::RateLimitConfig;

// ─── Clock ───────────────────────────────────────────────────────────────────

/// A point on tokio's clock, as governor sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TokioInstant(Instant);

impl Add<Nanos> for TokioInstant {
  type Output = Self;

  fn add(self, rhs: Nanos) -> Self { Self(self.0 + Duration::from(rhs)) }
}

impl Reference for TokioInstant {
  fn duration_since(&self, earlier: Self) -> Nanos {
    self.0.saturating_duration_since(earlier.0).into()
  }

  fn saturating_sub(&self, duration: Nanos) -> Self {
    Self(self.0.checked_sub(Duration::from(duration)).unwrap_or(self.0))
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
  type Instant = TokioInstant;

  fn now(&self) -> TokioInstant { TokioInstant(Instant::now()) }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<TokioInstant>>;

// ─── Buckets ─────────────────────────────────────────────────────────────────

/// Up to `capacity` requests at once, replenished at `refill_per_sec`.
pub struct TokenBucket {
  limiter: DirectLimiter,
  clock:   TokioClock,
}

impl fmt::Debug for TokenBucket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TokenBucket").finish_non_exhaustive()
  }
}

impl TokenBucket {
  /// Starts full. A non-positive rate is clamped to a tiny one so `acquire`
  /// always terminates.
  pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
    let burst = NonZeroU32::new(capacity.max(1)).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_secs_f64(1.0 / refill_per_sec.max(1e-6));
    let quota = Quota::with_period(period)
      .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
      .allow_burst(burst);

    let clock = TokioClock;
    Self { limiter: RateLimiter::direct_with_clock(quota, &clock), clock }
  }

  /// Take one cell, sleeping until the quota allows it.
  pub async fn acquire(&self) {
    while let Err(not_until) = self.limiter.check() {
      tokio::time::sleep(not_until.wait_time_from(self.clock.now())).await;
    }
  }

  /// Take one cell if the quota allows it right now.
  pub fn try_acquire(&self) -> bool { self.limiter.check().is_ok() }
}

/// Per-source limiter: a per-minute quota and a per-second quota whose burst
/// is the configured `burst`.
#[derive(Debug)]
pub struct SourceLimiter {
  per_minute: TokenBucket,
  per_second: TokenBucket,
}

impl SourceLimiter {
  pub fn new(config: &RateLimitConfig) -> Self {
    let per_minute_cap = config.requests_per_minute.clamp(1.0, f64::from(u32::MAX)) as u32;
    Self {
      per_minute: TokenBucket::new(per_minute_cap, config.requests_per_minute / 60.0),
      per_second: TokenBucket::new(config.burst, config.requests_per_second),
    }
  }

  pub async fn acquire(&self) {
    self.per_minute.acquire().await;
    self.per_second.acquire().await;
  }

  pub fn try_acquire(&self) -> bool {
    self.per_second.try_acquire() && self.per_minute.try_acquire()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn burst_is_immediate_then_refill_paced() {
    let bucket = TokenBucket::new(3, 1.0);
    let start = Instant::now();

    for _ in 0..3 {
      bucket.acquire().await;
    }
    assert!(start.elapsed() < Duration::from_millis(10));

    bucket.acquire().await;
    bucket.acquire().await;
    assert!(start.elapsed() >= Duration::from_millis(1990));
  }

  #[tokio::test(start_paused = true)]
  async fn try_acquire_does_not_wait() {
    let bucket = TokenBucket::new(1, 0.5);
    assert!(bucket.try_acquire());
    assert!(!bucket.try_acquire());

    tokio::time::advance(Duration::from_millis(2100)).await;
    assert!(bucket.try_acquire());
  }

  #[tokio::test(start_paused = true)]
  async fn minute_budget_caps_a_fast_source() {
    let limiter = SourceLimiter::new(&RateLimitConfig {
      requests_per_second: 100.0,
      requests_per_minute: 2.0,
      burst:               10,
    });
    let start = Instant::now();

    limiter.acquire().await;
    limiter.acquire().await;
    assert!(!limiter.try_acquire());

    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_secs(29));
  }

  #[tokio::test(start_paused = true)]
  async fn fractional_rates_are_honoured() {
    let bucket = TokenBucket::new(1, 0.25);
    let start = Instant::now();

    bucket.acquire().await;
    bucket.acquire().await;
    assert!(start.elapsed() >= Duration::from_millis(3990));
  }
}
