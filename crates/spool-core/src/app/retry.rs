//! Retry policy: decides what happens to a task after a failed attempt.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::app::config::{RetryConfig, RetryMode};
use crate::domain::Task;
use crate::ports::clock::after;

/// What to do with a task that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enter `pending`, dispatchable from `at`.
    Reschedule { at: DateTime<Utc> },
    /// Budget used up; stays `failed` for good.
    Exhausted,
    /// Budget left, but automatic retry is off. Stays `failed` until retried by hand.
    Hold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub automatic: bool,
    pub mode: RetryMode,

    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Growth factor per further failure.
    pub multiplier: f64,

    pub max_delay: Duration,

    /// Fraction of each delay randomly shaved off, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            automatic: config.automatic,
            mode: config.mode,
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    /// Re-queue failures at once.
    pub fn immediate() -> Self {
        Self {
            mode: RetryMode::Immediate,
            ..Self::default()
        }
    }

    /// Never retry automatically; only `QueueService::retry` re-queues.
    pub fn manual_only() -> Self {
        Self {
            automatic: false,
            ..Self::default()
        }
    }

    /// Backoff before the next attempt, given the attempts made so far
    /// (1-based): `base_delay * multiplier^(attempts - 1)`, capped at
    /// `max_delay`. Jitter is not applied here.
    ///
    /// With base=2s, multiplier=2.0: 2s, 4s, 8s, 16s, 32s, 60s, 60s...
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        delay.mul_f64(1.0 - self.jitter * rand::random::<f64>())
    }

    /// Decide the fate of `task`, which has just failed attempt `task.attempts`.
    pub fn decide(&self, task: &Task, now: DateTime<Utc>) -> RetryDecision {
        if !task.has_retry_budget() {
            return RetryDecision::Exhausted;
        }
        if !self.automatic {
            return RetryDecision::Hold;
        }
        let at = match self.mode {
            RetryMode::Immediate => now,
            RetryMode::Backoff => after(now, self.jittered(self.next_delay(task.attempts))),
        };
        RetryDecision::Reschedule { at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, TaskId, TaskStatus};
    use rstest::rstest;
    use ulid::Ulid;

    fn failed(attempts: u32, max_retries: u32) -> Task {
        let mut task = Task::new(
            TaskId::from_ulid(Ulid::new()),
            NewTask::new("", "sms", max_retries),
            Utc::now(),
        );
        task.status = TaskStatus::Failed;
        task.attempts = attempts;
        task
    }

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert!(policy.automatic);
        assert_eq!(policy.mode, RetryMode::Backoff);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_delay, Duration::from_secs(60));
    }

    #[rstest]
    #[case(0, 2)]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(3, 8)]
    #[case(5, 32)]
    #[case(6, 60)]
    #[case(40, 60)]
    #[case(u32::MAX, 60)]
    fn exponential_backoff_is_capped(#[case] attempts: u32, #[case] secs: u64) {
        assert_eq!(RetryPolicy::default().next_delay(attempts), Duration::from_secs(secs));
    }

    #[test]
    fn jitter_only_shortens() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let d = policy.jittered(Duration::from_secs(8));
            assert!(d <= Duration::from_secs(8));
            assert!(d >= Duration::from_secs(4));
        }
    }

    #[test]
    fn backoff_reschedules_in_the_future() {
        let now = Utc::now();
        let decision = RetryPolicy::default().decide(&failed(2, 3), now);
        assert_eq!(
            decision,
            RetryDecision::Reschedule {
                at: now + chrono::Duration::seconds(4)
            }
        );
    }

    #[test]
    fn immediate_reschedules_now() {
        let now = Utc::now();
        let decision = RetryPolicy::immediate().decide(&failed(1, 3), now);
        assert_eq!(decision, RetryDecision::Reschedule { at: now });
    }

    #[rstest]
    #[case(3, 2)]
    #[case(1, 0)]
    fn exhausted_once_attempts_pass_max_retries(#[case] attempts: u32, #[case] max_retries: u32) {
        let decision = RetryPolicy::default().decide(&failed(attempts, max_retries), Utc::now());
        assert_eq!(decision, RetryDecision::Exhausted);
    }

    #[test]
    fn manual_only_holds_while_budget_remains() {
        let policy = RetryPolicy::manual_only();
        assert_eq!(policy.decide(&failed(1, 2), Utc::now()), RetryDecision::Hold);
        assert_eq!(policy.decide(&failed(3, 2), Utc::now()), RetryDecision::Exhausted);
    }
}
