//! Reconnection backoff state used by the connection worker.

use std::time::Duration;

use super::config::BackoffPolicy;

/// Result of recording a reconnection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Buffering remains in its previous state.
    Continue,
    /// This attempt crossed `maximum_attempts`; buffering is now disabled.
    BufferingDisabled { attempts: u32 },
}

/// Tracks reconnection attempts, the current delay, and whether new writes
/// may still be buffered.
#[derive(Clone, Debug)]
pub struct RetryState {
    policy: BackoffPolicy,
    current_delay: Duration,
    consecutive_since_decay: u32,
    total_attempts: u32,
    buffering_enabled: bool,
}

impl RetryState {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current_delay: policy.initial_delay,
            consecutive_since_decay: 0,
            total_attempts: 0,
            buffering_enabled: true,
            policy,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn total_attempts(&self) -> u32 {
        self.total_attempts
    }

    pub fn buffering_enabled(&self) -> bool {
        self.buffering_enabled
    }

    /// Record that a scheduled retry fired.
    ///
    /// Doubles the delay once `attempts_before_decay` consecutive attempts have
    /// elapsed below the ceiling, and latches buffering off when the total
    /// reaches `maximum_attempts`.
    pub fn record_attempt(&mut self) -> AttemptOutcome {
        self.consecutive_since_decay = self.consecutive_since_decay.saturating_add(1);
        self.total_attempts = self.total_attempts.saturating_add(1);

        if self.current_delay < self.policy.max_delay
            && self.consecutive_since_decay >= self.policy.attempts_before_decay
        {
            self.current_delay = self
                .current_delay
                .saturating_mul(2)
                .min(self.policy.max_delay);
            self.consecutive_since_decay = 0;
        }

        if self.buffering_enabled && self.total_attempts >= self.policy.maximum_attempts {
            self.buffering_enabled = false;
            return AttemptOutcome::BufferingDisabled {
                attempts: self.total_attempts,
            };
        }
        AttemptOutcome::Continue
    }

    /// Reset after a successful connection.
    pub fn record_success(&mut self) {
        self.current_delay = self.policy.initial_delay;
        self.consecutive_since_decay = 0;
        self.total_attempts = 0;
        self.buffering_enabled = true;
    }
}
