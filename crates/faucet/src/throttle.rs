//! Transport-level per-IP request throttle.
//!
//! Runs before the dispensing core and only counts HTTP requests; it keeps
//! a flood from reaching the store at all. The core's burst tracking is
//! separate and persisted.

use crate::config::ThrottleConfig;
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

pub struct RequestThrottle {
    limiter: Option<KeyedLimiter>,
    clock: DefaultClock,
}

impl RequestThrottle {
    /// `max_requests` per `window_ms`, replenished evenly across the window.
    pub fn new(config: &ThrottleConfig) -> Self {
        let limiter = if config.enabled {
            NonZeroU32::new(config.max_requests).and_then(|max| {
                let period = Duration::from_millis(config.window_ms) / max.get();
                Quota::with_period(period).map(|quota| RateLimiter::keyed(quota.allow_burst(max)))
            })
        } else {
            None
        };

        Self {
            limiter,
            clock: DefaultClock::default(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            limiter: None,
            clock: DefaultClock::default(),
        }
    }

    /// `Err` carries how long the caller must wait.
    pub fn check(&self, ip: &str) -> Result<(), Duration> {
        match &self.limiter {
            Some(limiter) => limiter
                .check_key(&ip.to_string())
                .map_err(|not_until| not_until.wait_time_from(self.clock.now())),
            None => Ok(()),
        }
    }

    /// Forget IPs whose quota has fully replenished.
    pub fn retain_recent(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.retain_recent();
        }
    }
}
