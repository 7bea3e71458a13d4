//! Timestamping failure circuit breaker.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::config::HaltPolicy;
use crate::error::{LogError, Result};

#[derive(Debug, Default)]
struct BreakerState {
    first_failure: Option<DateTime<Utc>>,
    halted_at: Option<DateTime<Utc>>,
}

/// Snapshot of the breaker for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStatus {
    pub halted: bool,
    /// Start of the current failure window.
    pub first_failure: Option<DateTime<Utc>>,
    pub halted_at: Option<DateTime<Utc>>,
}

/// Halts logging once timestamping has been failing for longer than the
/// acceptable period.
///
/// The window opens at the first failure after a success and closes on the
/// next success. A zero period disables the breaker.
#[derive(Debug)]
pub struct FailureBreaker {
    period: Duration,
    policy: HaltPolicy,
    state: Mutex<BreakerState>,
}

impl FailureBreaker {
    pub fn new(period: Duration, policy: HaltPolicy) -> Self {
        Self {
            period,
            policy,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Fail with `TimestampingHalted` if logging must be refused at `now`.
    pub fn check(&self, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock();
        self.evaluate(&mut state, now);

        let Some(halted_at) = state.halted_at else {
            return Ok(());
        };
        if let HaltPolicy::Cooldown(cooldown) = self.policy {
            if (now - halted_at).to_std().is_ok_and(|e| e >= cooldown) {
                info!(halted_at = %halted_at, "Timestamping halt cooled down");
                *state = BreakerState::default();
                return Ok(());
            }
        }
        Err(LogError::TimestampingHalted {
            since: state.first_failure.unwrap_or(halted_at),
        })
    }

    pub fn record_failure(&self, now: DateTime<Utc>) {
        let mut state = self.lock();
        let first = *state.first_failure.get_or_insert(now);
        self.evaluate(&mut state, now);
        warn!(
            first_failure = %first,
            halted = state.halted_at.is_some(),
            "Timestamping failure recorded"
        );
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.first_failure.take().is_some() {
            info!("Timestamping recovered");
        }
        if self.policy == HaltPolicy::ResumeOnSuccess && state.halted_at.take().is_some() {
            info!("Timestamping halt cleared by successful timestamp");
        }
    }

    /// Clear the halt and the failure window.
    pub fn reset(&self) {
        *self.lock() = BreakerState::default();
    }

    pub fn status(&self, now: DateTime<Utc>) -> BreakerStatus {
        let mut state = self.lock();
        self.evaluate(&mut state, now);
        BreakerStatus {
            halted: state.halted_at.is_some(),
            first_failure: state.first_failure,
            halted_at: state.halted_at,
        }
    }

    fn evaluate(&self, state: &mut BreakerState, now: DateTime<Utc>) {
        if self.period.is_zero() || state.halted_at.is_some() {
            return;
        }
        if let Some(first) = state.first_failure {
            if elapsed_exceeds(first, now, self.period) {
                warn!(
                    first_failure = %first,
                    period_secs = self.period.as_secs(),
                    "Timestamping failing longer than acceptable, halting message log"
                );
                state.halted_at = Some(now);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn elapsed_exceeds(since: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    (now - since).to_std().is_ok_and(|e| e > limit)
}
