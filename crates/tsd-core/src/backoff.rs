//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Bounded retry schedule for the readiness query layer."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::time::Duration;

use tsd_common::config::ReadinessSettings;

/// How the delay evolves between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffShape {
    /// Double after every attempt, capped at the maximum.
    Doubling,
    /// Always wait the initial delay.
    Constant,
}

/// Retry policy: attempt budget plus delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub max: Duration,
    pub shape: BackoffShape,
}

impl BackoffPolicy {
    pub fn doubling(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial,
            max: max.max(initial),
            shape: BackoffShape::Doubling,
        }
    }

    /// Fixed-interval polling until `timeout` is used up.
    pub fn fixed_interval(timeout: Duration, interval: Duration) -> Self {
        let attempts = if interval.is_zero() {
            1
        } else {
            (timeout.as_millis() / interval.as_millis().max(1)).clamp(1, u128::from(u32::MAX)) as u32
        };
        Self {
            max_attempts: attempts,
            initial: interval,
            max: interval,
            shape: BackoffShape::Constant,
        }
    }

    /// Exactly one attempt, no waiting.
    pub fn single() -> Self {
        Self {
            max_attempts: 1,
            initial: Duration::ZERO,
            max: Duration::ZERO,
            shape: BackoffShape::Constant,
        }
    }

    pub fn from_settings(settings: &ReadinessSettings) -> Self {
        Self::doubling(
            settings.max_attempts,
            settings.initial_backoff,
            settings.max_backoff,
        )
    }

    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempts: 0,
            next: self.initial,
        }
    }
}

/// Running schedule. Call [`Backoff::next_delay`] after every failed attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempts: u32,
    next: Duration,
}

impl Backoff {
    /// Record a failed attempt and return the wait before the next one, or
    /// `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let delay = self.next;
        if self.policy.shape == BackoffShape::Doubling {
            self.next = self.next.saturating_mul(2).min(self.policy.max);
        }
        Some(delay)
    }

    /// Attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Upper bound on total waiting if every attempt fails.
    pub fn worst_case(policy: &BackoffPolicy) -> Duration {
        let mut schedule = policy.start();
        let mut total = Duration::ZERO;
        while let Some(delay) = schedule.next_delay() {
            total += delay;
        }
        total
    }
}
