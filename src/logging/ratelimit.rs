use super::StructuredLogger;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Suppresses identical messages seen again within a time window
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    last_seen: HashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// True if `key` was not emitted within the window ending at `now`
    pub fn allow(&mut self, key: &str, now: Instant) -> bool {
        if self.window.is_zero() {
            return true;
        }
        match self.last_seen.get(key) {
            Some(prev) if now.saturating_duration_since(*prev) < self.window => false,
            _ => {
                self.last_seen.insert(key.to_string(), now);
                if self.last_seen.len() > 256 {
                    let window = self.window;
                    self.last_seen
                        .retain(|_, t| now.saturating_duration_since(*t) < window);
                }
                true
            }
        }
    }
}

/// A [`StructuredLogger`] that drops repeats of the same message
#[derive(Debug)]
pub struct RateLimitedLogger {
    inner: StructuredLogger,
    limiter: Mutex<RateLimiter>,
}

impl RateLimitedLogger {
    pub fn new(inner: StructuredLogger, window: Duration) -> Self {
        Self {
            inner,
            limiter: Mutex::new(RateLimiter::new(window)),
        }
    }

    fn allow(&self, level: &str, message: &str) -> bool {
        let key = format!("{}:{}", level, message);
        match self.limiter.lock() {
            Ok(mut guard) => guard.allow(&key, Instant::now()),
            Err(_) => true,
        }
    }

    pub fn info(&self, message: &str) {
        if self.allow("info", message) {
            self.inner.info(message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.allow("warn", message) {
            self.inner.warn(message);
        }
    }

    pub fn error(&self, message: &str) {
        if self.allow("error", message) {
            self.inner.error(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_inside_window_are_dropped() {
        let mut limiter = RateLimiter::new(Duration::from_millis(500));
        let t0 = Instant::now();
        assert!(limiter.allow("read failed", t0));
        assert!(!limiter.allow("read failed", t0 + Duration::from_millis(100)));
        assert!(limiter.allow("other", t0 + Duration::from_millis(100)));
        assert!(limiter.allow("read failed", t0 + Duration::from_millis(600)));
    }

    #[test]
    fn zero_window_never_limits() {
        let mut limiter = RateLimiter::new(Duration::ZERO);
        let t0 = Instant::now();
        assert!(limiter.allow("x", t0));
        assert!(limiter.allow("x", t0));
    }
}
