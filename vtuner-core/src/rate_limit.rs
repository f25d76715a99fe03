//! Login rate limiter
//!
//! Fixed window per client IP: 10 attempts per 5 minutes. The map is pruned
//! once it grows past 1000 entries (dropping windows older than 10 minutes)
//! and cleared outright past 2000 entries.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(5 * 60);
const MAX_ATTEMPTS: u32 = 10;
const EVICT_AGE: Duration = Duration::from_secs(10 * 60);
const EVICT_THRESHOLD: usize = 1000;
const RESET_THRESHOLD: usize = 2000;

#[derive(Debug, Clone, Copy)]
struct Window {
    start: Instant,
    count: u32,
}

pub struct LoginRateLimiter {
    window: Duration,
    max_attempts: u32,
    entries: Mutex<HashMap<IpAddr, Window>>,
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(WINDOW, MAX_ATTEMPTS)
    }

    #[must_use]
    pub fn with_limits(window: Duration, max_attempts: u32) -> Self {
        Self {
            window,
            max_attempts,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt. Returns `true` while the caller is within its
    /// window budget.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut entries = self.entries.lock();

        if entries.len() > RESET_THRESHOLD {
            entries.clear();
        } else if entries.len() > EVICT_THRESHOLD {
            entries.retain(|_, w| now.duration_since(w.start) < EVICT_AGE);
        }

        let window = entries.entry(ip).or_insert(Window {
            start: now,
            count: 0,
        });
        if now.duration_since(window.start) >= self.window {
            window.start = now;
            window.count = 0;
        }
        window.count += 1;
        window.count <= self.max_attempts
    }

    #[must_use]
    pub fn tracked_ips(&self) -> usize {
        self.entries.lock().len()
    }
}
