//! Per-source circuit breaker.

use std::{
  sync::{Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use tokio::time::Instant;
use tracing::{info, warn};

use crate::{config::BreakerConfig, Error, Result};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
  Closed,
  Open,
  HalfOpen,
}

#[derive(Debug)]
struct Inner {
  state:                CircuitState,
  consecutive_failures: u32,
  open_until:           Option<Instant>,
  trial_in_flight:      bool,
}

/// Opens after `failure_threshold` consecutive failures and fast-fails
/// until `cooldown` has passed. The first call after that is a trial: its
/// success closes the circuit, its failure opens it again.
#[derive(Debug)]
pub struct CircuitBreaker {
  source:    String,
  threshold: u32,
  cooldown:  Duration,
  inner:     Mutex<Inner>,
}

impl CircuitBreaker {
  pub fn new(source: impl Into<String>, config: &BreakerConfig) -> Self {
    Self {
      source:    source.into(),
      threshold: config.failure_threshold.max(1),
      cooldown:  Duration::from_secs(config.cooldown_secs),
      inner:     Mutex::new(Inner {
        state:                CircuitState::Closed,
        consecutive_failures: 0,
        open_until:           None,
        trial_in_flight:      false,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Whether a call may go ahead. An open circuit yields
  /// [`Error::SourceUnavailable`] with the remaining cooldown.
  pub fn check(&self) -> Result<()> {
    let mut inner = self.lock();
    let now = Instant::now();

    match inner.state {
      CircuitState::Closed => Ok(()),
      CircuitState::Open => {
        let until = inner.open_until.unwrap_or(now);
        if now < until {
          return Err(self.unavailable(until - now));
        }
        info!(source = %self.source, "circuit half-open, allowing a trial call");
        inner.state = CircuitState::HalfOpen;
        inner.trial_in_flight = true;
        Ok(())
      }
      CircuitState::HalfOpen if inner.trial_in_flight => Err(self.unavailable(Duration::ZERO)),
      CircuitState::HalfOpen => {
        inner.trial_in_flight = true;
        Ok(())
      }
    }
  }

  pub fn record_success(&self) {
    let mut inner = self.lock();
    if inner.state != CircuitState::Closed {
      info!(source = %self.source, "circuit closed");
    }
    inner.state = CircuitState::Closed;
    inner.consecutive_failures = 0;
    inner.open_until = None;
    inner.trial_in_flight = false;
  }

  pub fn record_failure(&self) {
    let mut inner = self.lock();
    inner.consecutive_failures += 1;
    inner.trial_in_flight = false;

    let trip = inner.state == CircuitState::HalfOpen
      || inner.consecutive_failures >= self.threshold;
    if trip {
      warn!(
        source = %self.source,
        failures = inner.consecutive_failures,
        cooldown = ?self.cooldown,
        "circuit opened"
      );
      inner.state = CircuitState::Open;
      inner.open_until = Some(Instant::now() + self.cooldown);
    }
  }

  /// Current state, accounting for an elapsed cooldown.
  pub fn state(&self) -> CircuitState {
    let inner = self.lock();
    match (inner.state, inner.open_until) {
      (CircuitState::Open, Some(until)) if Instant::now() >= until => CircuitState::HalfOpen,
      (state, _) => state,
    }
  }

  fn unavailable(&self, retry_after: Duration) -> Error {
    Error::SourceUnavailable { source_name: self.source.clone(), retry_after }
  }
}
