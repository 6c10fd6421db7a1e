use std::time::{Duration, Instant};

/// Backoff configuration for a topic's pause/retry policy (spec.md section 6,
/// `pause.timeout` / `pause.max_timeout` / `pause.with_exponential_backoff`).
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub timeout: Duration,
    pub max_timeout: Duration,
    pub with_exponential_backoff: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(30),
            with_exponential_backoff: true,
        }
    }
}

/// Per-topic-partition backoff state (spec.md section 3 "PauseTracker").
///
/// `attempt` resets to 0 on success and grows by one per failure. The timeout
/// for attempt `n` (1-indexed) is `timeout * 2^(n-1)` capped at `max_timeout`
/// when exponential backoff is enabled (SPEC_FULL.md section B.1), else the
/// constant `timeout` on every attempt.
#[derive(Debug, Clone)]
pub struct PauseTracker {
    attempt: u32,
    current_timeout: Duration,
    manual_pause: bool,
    resume_at: Option<Instant>,
    config: BackoffConfig,
}

impl PauseTracker {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            attempt: 0,
            current_timeout: config.timeout,
            manual_pause: false,
            resume_at: None,
            config,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn current_timeout(&self) -> Duration {
        self.current_timeout
    }

    pub fn manual_pause(&self) -> bool {
        self.manual_pause
    }

    pub fn set_manual_pause(&mut self, paused: bool) {
        self.manual_pause = paused;
    }

    /// Resets attempt count and current timeout back to the base state, as
    /// happens on a successful consume (spec.md section 3 invariant: "attempt
    /// resets to 0 on success").
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_timeout = self.config.timeout;
        self.resume_at = None;
    }

    /// Registers a failure, advances `attempt`, computes the next backoff
    /// window, and records when the partition should resume. Returns the
    /// backoff duration just computed.
    pub fn register_failure(&mut self, now: Instant) -> Duration {
        self.attempt += 1;

        self.current_timeout = if self.config.with_exponential_backoff {
            let factor = 1u64.checked_shl(self.attempt.saturating_sub(1)).unwrap_or(u64::MAX);
            let scaled = self.config.timeout.saturating_mul(factor.min(u32::MAX as u64) as u32);
            scaled.min(self.config.max_timeout)
        } else {
            self.config.timeout
        };

        self.resume_at = Some(now + self.current_timeout);
        self.current_timeout
    }

    /// Pins a nominal, immediately-resumable pause: used after a DLQ/skip
    /// dispatch where the next tick should lift the pause right away
    /// (spec.md section 9, open question resolved per SPEC_FULL.md section B.3).
    pub fn pause_immediate(&mut self, now: Instant) {
        self.resume_at = Some(now);
    }

    /// True once `now` has reached the recorded resume time. A tracker that
    /// was never paused (no failure registered) is considered elapsed.
    pub fn window_elapsed(&self, now: Instant) -> bool {
        match self.resume_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.resume_at.is_some()
    }

    pub fn clear_pause(&mut self) {
        self.resume_at = None;
    }
}
