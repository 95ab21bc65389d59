//! Exponential backoff timing.
//!
//! After `n` attempts the next wait is `min(max, jitter + base * 2^(n - 1))`.
//! The first attempt is always immediate. Jitter, when enabled, is drawn
//! uniformly from `[0, base)`.

use core::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Retry counter with exponential delays.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
    max_attempts: u32,
    attempts: u32,
    last_attempt: Option<Instant>,
    next_delay: Duration,
}

impl Backoff {
    /// `max_attempts` of zero means unlimited.
    #[must_use]
    pub const fn new(max_attempts: u32, base: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            base,
            max,
            jitter,
            max_attempts,
            attempts: 0,
            last_attempt: None,
            next_delay: Duration::ZERO,
        }
    }

    /// Whether an attempt may be made at `now`. Advances the counter only when
    /// it returns `true`.
    pub fn try_at(&mut self, now: Instant) -> bool {
        if self.maxed_out() {
            return false;
        }

        if let Some(last) = self.last_attempt {
            if now.saturating_duration_since(last) < self.next_delay {
                return false;
            }
        }

        self.advance();
        self.last_attempt = Some(now);

        true
    }

    pub fn try_now(&mut self) -> bool {
        self.try_at(Instant::now())
    }

    /// How long to wait before the next attempt. Always advances the counter.
    pub fn next(&mut self) -> Duration {
        let wait = if self.attempts == 0 {
            Duration::ZERO
        } else {
            self.next_delay
        };

        self.advance();

        wait
    }

    #[must_use]
    pub const fn maxed_out(&self) -> bool {
        self.max_attempts != 0 && self.attempts >= self.max_attempts
    }

    #[must_use]
    pub const fn tries(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_attempt = None;
        self.next_delay = Duration::ZERO;
    }

    fn advance(&mut self) {
        self.attempts = self.attempts.saturating_add(1);

        let jitter = if self.jitter && !self.base.is_zero() {
            rand::thread_rng().gen_range(Duration::ZERO..self.base)
        } else {
            Duration::ZERO
        };

        self.next_delay = delay_for(self.attempts, self.base, self.max, jitter);
    }
}

/// Delay following `attempts` completed attempts.
#[must_use]
pub fn delay_for(attempts: u32, base: Duration, max: Duration, jitter: Duration) -> Duration {
    if attempts == 0 {
        return Duration::ZERO;
    }

    let factor = 1_u32.checked_shl(attempts.saturating_sub(1)).unwrap_or(u32::MAX);

    base.saturating_mul(factor)
        .saturating_add(jitter)
        .min(max)
}

/// Worst-case total wait across `retries` attempts. Used to size the lifetime
/// of records that must outlive a full retry schedule.
#[must_use]
pub fn cumulative_backoff(base: Duration, max: Duration, retries: u32, jitter: bool) -> Duration {
    let worst_jitter = if jitter { base } else { Duration::ZERO };

    (1..retries).fold(Duration::ZERO, |total, attempts| {
        total.saturating_add(delay_for(attempts, base, max, worst_jitter))
    })
}
