//! Rate-limited logging
//!
//! A malformed command must not flood the log of a core serving many flows.
//! [`RateLimit`] lets one message through per interval and counts the rest,
//! reporting the count with the next message that passes.

use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Lock-free log limiter
#[derive(Debug)]
pub struct RateLimit {
    interval_ns: u64,
    /// Nanoseconds since the process epoch, plus one; zero means never fired
    last: AtomicU64,
    suppressed: AtomicU64,
}

fn now_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

impl RateLimit {
    /// Allow one message per `interval`
    ///
    /// Intervals longer than `u64::MAX` nanoseconds saturate.
    pub const fn new(interval: Duration) -> Self {
        let ns = interval.as_nanos();
        Self {
            interval_ns: if ns > u64::MAX as u128 { u64::MAX } else { ns as u64 },
            last: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Ask to emit a message
    ///
    /// Returns `Some(n)` if the caller should log, where `n` is the number of
    /// messages suppressed since the last one emitted, or `None` to stay quiet.
    pub fn check(&self) -> Option<u64> {
        let now = now_ns().wrapping_add(1);
        let last = self.last.load(Ordering::Relaxed);

        let due = last == 0 || now.saturating_sub(last) >= self.interval_ns;
        if due
            && self
                .last
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            return Some(self.suppressed.swap(0, Ordering::Relaxed));
        }

        self.suppressed.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Messages held back since the last one emitted
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

/// `log::error!` through a [`RateLimit`]
macro_rules! error_ratelimited {
    ($limit:expr, $($arg:tt)+) => {
        if let Some(suppressed) = $limit.check() {
            if suppressed > 0 {
                log::error!("{} ({} similar messages suppressed)", format_args!($($arg)+), suppressed);
            } else {
                log::error!($($arg)+);
            }
        }
    };
}

pub(crate) use error_ratelimited;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_message_passes() {
        let limit = RateLimit::new(Duration::from_secs(3600));
        assert_eq!(limit.check(), Some(0));
        assert_eq!(limit.check(), None);
        assert_eq!(limit.check(), None);
        assert_eq!(limit.suppressed(), 2);
    }

    #[test]
    fn test_zero_interval_never_suppresses() {
        let limit = RateLimit::new(Duration::ZERO);
        for _ in 0..5 {
            assert_eq!(limit.check(), Some(0));
        }
    }

    #[test]
    fn test_suppressed_count_reported() {
        let limit = RateLimit::new(Duration::from_millis(20));
        assert_eq!(limit.check(), Some(0));
        assert_eq!(limit.check(), None);
        assert_eq!(limit.check(), None);

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(limit.check(), Some(2));
        assert_eq!(limit.suppressed(), 0);
    }

    #[test]
    fn test_huge_interval_saturates() {
        let limit = RateLimit::new(Duration::from_millis(u64::MAX));
        assert_eq!(limit.interval_ns, u64::MAX);
        assert_eq!(limit.check(), Some(0));
        assert_eq!(limit.check(), None);
    }

    #[test]
    fn test_macro_expands() {
        let limit = RateLimit::new(Duration::from_secs(3600));
        error_ratelimited!(limit, "bad cmd '{}'", 99);
        error_ratelimited!(limit, "bad cmd '{}'", 100);
        assert_eq!(limit.suppressed(), 1);
    }
}
