use offgrid_bridge::logging::{RateLimiter, min_level, parse_log_level};
use std::time::{Duration, Instant};
use tracing::Level;

#[test]
fn log_levels_parse_case_insensitively() {
    assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
    assert_eq!(parse_log_level("WARNING").unwrap(), Level::WARN);
    assert!(parse_log_level("loud").is_err());
    assert_eq!(min_level(Level::INFO, Level::TRACE), Level::TRACE);
}

#[test]
fn repeated_messages_are_suppressed_within_window() {
    let mut limiter = RateLimiter::new(Duration::from_secs(30));
    let t0 = Instant::now();
    assert!(limiter.allow("modbus down", t0));
    assert!(!limiter.allow("modbus down", t0 + Duration::from_secs(10)));
    assert!(limiter.allow("other", t0 + Duration::from_secs(10)));
    assert!(limiter.allow("modbus down", t0 + Duration::from_secs(31)));
}

#[test]
fn zero_window_allows_everything() {
    let mut limiter = RateLimiter::new(Duration::ZERO);
    let t0 = Instant::now();
    assert!(limiter.allow("x", t0));
    assert!(limiter.allow("x", t0));
}
