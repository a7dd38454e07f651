//! Rate-limit tracking state and its persistence.
//!
//! The whole state is one document, read and written wholesale. Expired
//! entries are dropped by [`cleanup`] before every decision, so there is no
//! background sweeper requirement; [`crate::FaucetService::compact`] exists
//! for deployments that want one anyway.

mod file;
mod memory;
mod sled;

pub use self::file::JsonFileStore;
pub use self::memory::MemoryStore;
pub use self::sled::SledStore;

use crate::config::{window_ms, PolicyConfig, StoreBackend, StoreConfig};
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Successful dispenses from one IP inside the current daily window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounter {
    pub count: u32,
    #[serde(rename = "resetTime")]
    pub window_start: i64,
}

/// Snapshot of all abuse-tracking state. Timestamps are Unix milliseconds.
///
/// Field names on disk follow the historical rate-limit file layout; every
/// field defaults so older snapshots keep loading when fields are added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitState {
    /// address -> last successful dispense
    #[serde(rename = "addresses")]
    pub address_cooldowns: BTreeMap<String, i64>,

    /// ip -> last successful dispense from that ip
    #[serde(rename = "ips")]
    pub ip_cooldowns: BTreeMap<String, i64>,

    #[serde(rename = "dailyLimits")]
    pub daily_counters: BTreeMap<String, DailyCounter>,

    /// ip -> attempt timestamps, oldest first
    #[serde(rename = "shortTermLimits")]
    pub burst_history: BTreeMap<String, Vec<i64>>,

    /// ip -> time the block was imposed
    #[serde(rename = "blockedIps")]
    pub ip_blocks: BTreeMap<String, i64>,
}

impl RateLimitState {
    pub fn is_empty(&self) -> bool {
        self.address_cooldowns.is_empty()
            && self.ip_cooldowns.is_empty()
            && self.daily_counters.is_empty()
            && self.burst_history.is_empty()
            && self.ip_blocks.is_empty()
    }

    /// Number of tracked entries; burst samples count individually.
    pub fn entry_count(&self) -> usize {
        self.address_cooldowns.len()
            + self.ip_cooldowns.len()
            + self.daily_counters.len()
            + self.burst_history.values().map(Vec::len).sum::<usize>()
            + self.ip_blocks.len()
    }

    /// Appends an attempt sample for `ip`. Returns the history length when
    /// it reached the burst threshold, in which case the ip is now blocked
    /// from `now`.
    pub fn record_attempt(&mut self, ip: &str, now: i64, policy: &PolicyConfig) -> Option<usize> {
        let history = self.burst_history.entry(ip.to_string()).or_default();
        history.push(now);
        let attempts = history.len();

        if attempts >= policy.burst_threshold as usize {
            self.ip_blocks.insert(ip.to_string(), now);
            return Some(attempts);
        }
        None
    }

    /// Commits a confirmed dispense.
    pub fn record_success(&mut self, address: &str, ip: &str, now: i64) {
        self.address_cooldowns.insert(address.to_string(), now);
        self.ip_cooldowns.insert(ip.to_string(), now);

        self.daily_counters
            .entry(ip.to_string())
            .and_modify(|counter| counter.count = counter.count.saturating_add(1))
            .or_insert(DailyCounter { count: 1, window_start: now });
    }
}

/// Drops every entry that has outlived its window at `now`.
///
/// Pure and idempotent for a fixed `now`. Entries stamped further in the
/// future than their own window cannot have come from this clock and are
/// dropped as well.
pub fn cleanup(mut state: RateLimitState, now: i64, policy: &PolicyConfig) -> RateLimitState {
    let cooldown = window_ms(policy.cooldown_period_ms);
    let daily_window = window_ms(policy.daily_window_ms);
    let burst_window = window_ms(policy.burst_window_ms);
    let block_duration = window_ms(policy.block_duration_ms);

    let live = |ts: i64, window: i64| {
        let elapsed = now.saturating_sub(ts);
        elapsed <= window && elapsed >= -window
    };

    state.address_cooldowns.retain(|_, ts| live(*ts, cooldown));
    state.ip_cooldowns.retain(|_, ts| live(*ts, cooldown));
    state
        .daily_counters
        .retain(|_, counter| live(counter.window_start, daily_window));

    state.burst_history.retain(|_, samples| {
        samples.retain(|ts| live(*ts, burst_window));
        !samples.is_empty()
    });

    state.ip_blocks.retain(|_, ts| live(*ts, block_duration));
    state
}

/// Durable home of the [`RateLimitState`] snapshot.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Reads the snapshot. A missing snapshot is an empty state, not an error.
    async fn load(&self) -> Result<RateLimitState, StoreError>;

    /// Replaces the snapshot. Readers never observe a partial write.
    async fn save(&self, state: &RateLimitState) -> Result<(), StoreError>;

    fn backend(&self) -> &'static str;
}

/// Loads the snapshot, falling back to an empty state on any failure so a
/// storage outage never turns into a denial of service.
pub async fn load_or_empty(store: &dyn RateLimitStore) -> (RateLimitState, Option<StoreError>) {
    match store.load().await {
        Ok(state) => (state, None),
        Err(e) => {
            warn!(backend = store.backend(), error = %e, "Failed to load rate limits, starting from empty state");
            (RateLimitState::default(), Some(e))
        }
    }
}

/// Persists the snapshot; failures are logged and handed back, never raised.
pub async fn save_or_log(store: &dyn RateLimitStore, state: &RateLimitState) -> Option<StoreError> {
    match store.save(state).await {
        Ok(()) => None,
        Err(e) => {
            error!(backend = store.backend(), error = %e, "Failed to save rate limits");
            Some(e)
        }
    }
}

/// Opens the backend named by the configuration.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn RateLimitStore>, StoreError> {
    let path = config.resolved_path();
    let store: Arc<dyn RateLimitStore> = match config.backend {
        StoreBackend::Sled => Arc::new(SledStore::open(&path)?),
        StoreBackend::File => Arc::new(JsonFileStore::new(&path)),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };

    info!(backend = store.backend(), path = %path.display(), "Rate-limit store opened");
    Ok(store)
}
