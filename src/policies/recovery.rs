//! # Recovery policy for crashed daemon slots.
//!
//! [`RecoveryPolicy`] answers three questions about a crashing slot:
//! - Does this crash start a **new burst** (the slot had been stable)?
//! - Should the slot be **restarted**, and after what delay?
//! - Or has it crashed often enough to be declared **degraded**?
//!
//! The delay grows as `2^k` seconds for the k-th restart of the current
//! burst, capped at [`RecoveryPolicy::cap`].
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use swarmvisor::RecoveryPolicy;
//!
//! let policy = RecoveryPolicy::default();
//! assert_eq!(policy.delay_for(1), Duration::from_secs(2));
//! assert_eq!(policy.delay_for(3), Duration::from_secs(8));
//! // 2^9 = 512s exceeds the 300s cap:
//! assert_eq!(policy.delay_for(9), Duration::from_secs(300));
//! ```

use std::time::{Duration, Instant};

/// Verdict for a crashing slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Schedule a restart after the given delay.
    Backoff(Duration),
    /// Too many crashes inside the degradation window; give up on the slot.
    Degraded,
}

/// Crash-recovery policy.
#[derive(Clone, Copy, Debug)]
pub struct RecoveryPolicy {
    /// Maximum restart delay.
    pub cap: Duration,
    /// Stability span after which the next crash starts a fresh burst.
    pub burst_reset: Duration,
    /// Window inside which exceeding [`max_restarts`](Self::max_restarts)
    /// degrades the slot.
    pub degrade_window: Duration,
    /// Restarts tolerated per burst before degradation.
    pub max_restarts: u32,
}

impl Default for RecoveryPolicy {
    /// Returns a policy with:
    /// - `cap = 300s`
    /// - `burst_reset = 5min`
    /// - `degrade_window = 30min`
    /// - `max_restarts = 5`
    fn default() -> Self {
        Self {
            cap: Duration::from_secs(300),
            burst_reset: Duration::from_secs(5 * 60),
            degrade_window: Duration::from_secs(30 * 60),
            max_restarts: 5,
        }
    }
}

impl RecoveryPolicy {
    /// Restart delay for the `restart_count`-th restart of a burst:
    /// `min(2^restart_count, cap)` seconds.
    pub fn delay_for(&self, restart_count: u32) -> Duration {
        let secs = 1u64
            .checked_shl(restart_count)
            .unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.cap)
    }

    /// Whether a crash at `now` starts a new burst for a slot that has been
    /// stable since `stable_since`.
    pub fn is_new_burst(&self, stable_since: Instant, now: Instant) -> bool {
        now.duration_since(stable_since) > self.burst_reset
    }

    /// Decides between backing off and degrading.
    ///
    /// `restart_count` is the count *after* the current crash has been
    /// tallied; `first_restart_at` is when the current burst began.
    pub fn assess(
        &self,
        restart_count: u32,
        first_restart_at: Instant,
        now: Instant,
    ) -> RecoveryDecision {
        if restart_count > self.max_restarts
            && now.duration_since(first_restart_at) < self.degrade_window
        {
            RecoveryDecision::Degraded
        } else {
            RecoveryDecision::Backoff(self.delay_for(restart_count))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_and_cap() {
        let p = RecoveryPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(2), Duration::from_secs(4));
        assert_eq!(p.delay_for(5), Duration::from_secs(32));
        assert_eq!(p.delay_for(8), Duration::from_secs(256));
        assert_eq!(p.delay_for(9), Duration::from_secs(300));
        assert_eq!(p.delay_for(63), Duration::from_secs(300));
        // Shift overflow saturates rather than wrapping.
        assert_eq!(p.delay_for(64), Duration::from_secs(300));
    }

    #[test]
    fn stability_starts_a_new_burst() {
        let p = RecoveryPolicy::default();
        let now = Instant::now();
        assert!(!p.is_new_burst(now, now + Duration::from_secs(60)));
        assert!(p.is_new_burst(now, now + Duration::from_secs(6 * 60)));
    }

    #[test]
    fn sixth_rapid_crash_degrades() {
        let p = RecoveryPolicy::default();
        let burst_start = Instant::now();
        let now = burst_start + Duration::from_secs(60);

        for k in 1..=5 {
            assert_eq!(
                p.assess(k, burst_start, now),
                RecoveryDecision::Backoff(p.delay_for(k))
            );
        }
        assert_eq!(p.assess(6, burst_start, now), RecoveryDecision::Degraded);
    }

    #[test]
    fn slow_crashes_never_degrade() {
        let p = RecoveryPolicy::default();
        let burst_start = Instant::now();
        // Sixth restart, but the burst began 31 minutes ago.
        let now = burst_start + Duration::from_secs(31 * 60);
        assert!(matches!(
            p.assess(6, burst_start, now),
            RecoveryDecision::Backoff(_)
        ));
    }
}
