//! Hard-failure classification and retry backoff.
//!
//! A hard failure is a charge that never confirmed (submission error,
//! timeout, revert). Transient causes get retried on a backoff schedule;
//! deterministic ones (reverts, bad state) fail the charge immediately
//! since resubmitting the same call cannot change the outcome.

use std::time::Duration;

/// Whether resubmitting a failed charge could plausibly succeed.
///
/// Classification is by message because provider stacks flatten transport
/// and contract errors into strings. Unknown messages are not retried;
/// burning attempts on an error we cannot name helps nobody.
pub fn is_retryable(error: &str) -> bool {
    let msg = error.to_lowercase();

    // Deterministic failures first: a revert or a known contract rejection
    // will revert again no matter how often we resubmit.
    if msg.contains("revert")
        || msg.contains("insufficient")
        || msg.contains("policy not active")
        || msg.contains("too soon")
    {
        return false;
    }

    msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("network")
        || msg.contains("connection")
        || msg.contains("rate limit")
        || msg.contains("429")
        || msg.contains("502")
        || msg.contains("503")
        || msg.contains("nonce")
        || msg.contains("gas")
}

/// Retry schedule for failed work.
///
/// `delay_for` takes a 1-based attempt number (the attempt that just
/// failed) and clamps past the end of the schedule, so a `Custom` preset
/// with more attempts than delays repeats its last delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffPreset {
    /// 3 attempts, 30s / 1m / 2m.
    Aggressive,
    /// 3 attempts, 1m / 5m / 15m.
    Standard,
    /// 5 attempts, 5m / 15m / 30m / 1h / 2h.
    Conservative,
    Custom {
        max_attempts: u32,
        delays: Vec<Duration>,
    },
}

impl BackoffPreset {
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Aggressive | Self::Standard => 3,
            Self::Conservative => 5,
            Self::Custom { max_attempts, .. } => *max_attempts,
        }
    }

    fn delays(&self) -> &[Duration] {
        const AGGRESSIVE: &[Duration] = &[
            Duration::from_secs(30),
            Duration::from_secs(60),
            Duration::from_secs(120),
        ];
        const STANDARD: &[Duration] = &[
            Duration::from_secs(60),
            Duration::from_secs(300),
            Duration::from_secs(900),
        ];
        const CONSERVATIVE: &[Duration] = &[
            Duration::from_secs(300),
            Duration::from_secs(900),
            Duration::from_secs(1_800),
            Duration::from_secs(3_600),
            Duration::from_secs(7_200),
        ];
        match self {
            Self::Aggressive => AGGRESSIVE,
            Self::Standard => STANDARD,
            Self::Conservative => CONSERVATIVE,
            Self::Custom { delays, .. } => delays,
        }
    }

    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delays = self.delays();
        if delays.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt.max(1) as usize - 1).min(delays.len() - 1);
        delays[idx]
    }
}
