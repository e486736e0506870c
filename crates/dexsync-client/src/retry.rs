//! Capped exponential backoff for transient fetch failures.

use std::{future::Future, time::Duration};

use serde::Deserialize;
use tracing::warn;

use crate::FetchError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryPolicy {
  #[serde(default = "default_base_delay_ms")]
  pub base_delay_ms: u64,
  #[serde(default = "default_multiplier")]
  pub multiplier:    f64,
  #[serde(default = "default_max_delay_ms")]
  pub max_delay_ms:  u64,
  /// Total attempts including the first one.
  #[serde(default = "default_max_attempts")]
  pub max_attempts:  u32,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      base_delay_ms: default_base_delay_ms(),
      multiplier:    default_multiplier(),
      max_delay_ms:  default_max_delay_ms(),
      max_attempts:  default_max_attempts(),
    }
  }
}

impl RetryPolicy {
  /// A policy that tries once and never sleeps.
  pub fn none() -> Self {
    Self { base_delay_ms: 0, multiplier: 1.0, max_delay_ms: 0, max_attempts: 1 }
  }

  /// Delay before retry number `retry` (0-based): `base * multiplier^retry`,
  /// capped at `max_delay_ms`.
  pub fn delay_for(&self, retry: u32) -> Duration {
    let exp = i32::try_from(retry).unwrap_or(i32::MAX);
    let ms = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exp);
    Duration::from_millis(ms.min(self.max_delay_ms as f64) as u64)
  }

  /// Run `op` until it succeeds, fails permanently or attempts run out.
  pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, FetchError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
  {
    let attempts = self.max_attempts.max(1);
    let mut retry = 0;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(e) if e.is_transient() && retry + 1 < attempts => {
          let delay = self.delay_for(retry);
          warn!(what, attempt = retry + 1, ?delay, error = %e, "transient failure, backing off");
          tokio::time::sleep(delay).await;
          retry += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }
}

fn default_base_delay_ms() -> u64 { 500 }
fn default_multiplier() -> f64 { 2.0 }
fn default_max_delay_ms() -> u64 { 30_000 }
fn default_max_attempts() -> u32 { 5 }

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::*;

  #[test]
  fn delays_grow_then_cap() {
    let policy = RetryPolicy { base_delay_ms: 100, multiplier: 2.0, max_delay_ms: 1_000, max_attempts: 10 };
    let delays: Vec<_> = (0..6).map(|n| policy.delay_for(n).as_millis()).collect();
    assert_eq!(delays, [100, 200, 400, 800, 1_000, 1_000]);
  }

  #[tokio::test(start_paused = true)]
  async fn transient_failures_are_retried() {
    let policy = RetryPolicy { base_delay_ms: 10, multiplier: 2.0, max_delay_ms: 100, max_attempts: 4 };
    let calls = AtomicU32::new(0);

    let value = policy
      .run("version.json", || async {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
          Err(FetchError::Transient("reset".into()))
        } else {
          Ok(7)
        }
      })
      .await
      .unwrap();

    assert_eq!(value, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn exhaustion_returns_last_error() {
    let policy = RetryPolicy { base_delay_ms: 10, multiplier: 2.0, max_delay_ms: 100, max_attempts: 3 };
    let calls = AtomicU32::new(0);

    let err = policy
      .run("x", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(FetchError::Transient("down".into()))
      })
      .await
      .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn permanent_failures_are_not_retried() {
    let calls = AtomicU32::new(0);
    let err = RetryPolicy::default()
      .run("x", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(FetchError::NotFound("x".into()))
      })
      .await
      .unwrap_err();

    assert_eq!(err, FetchError::NotFound("x".into()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
