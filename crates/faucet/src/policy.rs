//! Admission policy: decides whether a dispense may proceed.

use crate::config::{window_ms, PolicyConfig, MINUTE_MS};
use crate::store::RateLimitState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a request was turned away, most punitive first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    BlockedIp,
    Address,
    Ip,
    DailyLimit,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::BlockedIp => "blocked_ip",
            DenyReason::Address => "address",
            DenyReason::Ip => "ip",
            DenyReason::DailyLimit => "daily_limit",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denial {
    pub reason: DenyReason,
    /// Whole minutes until the limiting entry expires, rounded up
    pub retry_after_minutes: u64,
}

impl Denial {
    /// User-facing explanation.
    pub fn message(&self, policy: &PolicyConfig) -> String {
        let minutes = self.retry_after_minutes;
        match self.reason {
            DenyReason::BlockedIp => format!(
                "Your IP has been temporarily blocked due to too many requests. Please wait {} minutes before trying again.",
                minutes
            ),
            DenyReason::Address => format!(
                "This address has already received tokens. Please wait {} minutes before requesting again.",
                minutes
            ),
            DenyReason::Ip => format!(
                "Too many requests from your IP. Please wait {} minutes before requesting again.",
                minutes
            ),
            DenyReason::DailyLimit => format!(
                "Daily limit exceeded ({} requests per day). Please wait {} minutes before requesting again.",
                policy.daily_cap, minutes
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Deny(Denial),
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit)
    }

    fn deny(reason: DenyReason, remaining_ms: i64) -> Self {
        Decision::Deny(Denial {
            reason,
            retry_after_minutes: minutes_ceil(remaining_ms),
        })
    }
}

/// Evaluates the rules in severity order; the first one still in force wins.
///
/// A rule only denies while its remaining time is positive, so a denial
/// never reports 0 minutes.
pub fn evaluate(
    state: &RateLimitState,
    address: &str,
    ip: &str,
    now: i64,
    policy: &PolicyConfig,
) -> Decision {
    let remaining = |since: i64, window: u64| window_ms(window).saturating_sub(now.saturating_sub(since));

    if let Some(&blocked_at) = state.ip_blocks.get(ip) {
        let left = remaining(blocked_at, policy.block_duration_ms);
        if left > 0 {
            return Decision::deny(DenyReason::BlockedIp, left);
        }
    }

    if let Some(&last) = state.address_cooldowns.get(address) {
        let left = remaining(last, policy.cooldown_period_ms);
        if left > 0 {
            return Decision::deny(DenyReason::Address, left);
        }
    }

    if let Some(&last) = state.ip_cooldowns.get(ip) {
        let left = remaining(last, policy.cooldown_period_ms);
        if left > 0 {
            return Decision::deny(DenyReason::Ip, left);
        }
    }

    if let Some(counter) = state.daily_counters.get(ip) {
        let left = remaining(counter.window_start, policy.daily_window_ms);
        if left > 0 && counter.count >= policy.daily_cap {
            return Decision::deny(DenyReason::DailyLimit, left);
        }
    }

    Decision::Admit
}

/// Milliseconds to minutes, rounded up.
fn minutes_ceil(ms: i64) -> u64 {
    let ms = ms.max(0) as u64;
    ms.div_ceil(MINUTE_MS)
}
