//! Faucet configuration

use crate::error::{FaucetError, FaucetResult};
use drip_common::utils::logging::LoggingConfig;
use drip_common::utils::units::parse_ether;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const MINUTE_MS: u64 = 60 * 1000;
pub const HOUR_MS: u64 = 60 * MINUTE_MS;
pub const DAY_MS: u64 = 24 * HOUR_MS;

/// Faucet service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    /// Server address
    pub server_addr: String,

    /// RPC endpoint for blockchain
    pub rpc_url: String,

    /// Faucet account private key (hex). Required.
    pub private_key: Option<String>,

    /// Chain ID; queried from the node when unset
    pub chain_id: Option<u64>,

    /// Human-readable network name reported by the status endpoint
    pub network_name: String,

    /// Symbol appended to dispensed amounts
    pub asset_symbol: String,

    /// Amount to dispense per request, as a decimal string
    pub amount: String,

    /// Warn at startup when the faucet balance is below this (decimal)
    pub low_balance_warning: String,

    /// Admission policy thresholds
    pub policy: PolicyConfig,

    /// Rate-limit snapshot persistence
    pub store: StoreConfig,

    /// Transfer submission settings
    pub ledger: LedgerConfig,

    /// Transport-level per-IP throttle
    pub throttle: ThrottleConfig,

    /// Interval for the background compaction pass (seconds, 0 disables)
    pub compaction_interval_secs: u64,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Allowed origins; `*` allows any
    pub allowed_origins: Vec<String>,

    /// Key clients by `X-Forwarded-For` / `X-Real-IP` instead of the socket
    /// peer. Only enable behind a proxy that overwrites those headers.
    pub trust_proxy_headers: bool,

    pub logging: LoggingConfig,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:3001".to_string(),
            rpc_url: "https://testnet-rpc.monad.xyz".to_string(),
            private_key: None,
            chain_id: None,
            network_name: "Monad Testnet".to_string(),
            asset_symbol: "MON".to_string(),
            amount: "0.25".to_string(),
            low_balance_warning: "10".to_string(),
            policy: PolicyConfig::default(),
            store: StoreConfig::default(),
            ledger: LedgerConfig::default(),
            throttle: ThrottleConfig::default(),
            compaction_interval_secs: 3600,
            cors_enabled: true,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            trust_proxy_headers: false,
            logging: LoggingConfig::default(),
        }
    }
}

/// Admission thresholds. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Address and IP cooldown after a successful dispense
    pub cooldown_period_ms: u64,
    /// Maximum successful dispenses per IP within `daily_window_ms`
    pub daily_cap: u32,
    pub daily_window_ms: u64,
    /// Attempts within `burst_window_ms` that trigger an IP block
    pub burst_threshold: u32,
    pub burst_window_ms: u64,
    pub block_duration_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cooldown_period_ms: DAY_MS,
            daily_cap: 2,
            daily_window_ms: DAY_MS,
            burst_threshold: 4,
            burst_window_ms: 10 * MINUTE_MS,
            block_duration_ms: 15 * MINUTE_MS,
        }
    }
}

impl PolicyConfig {
    /// e.g. `4 requests per 10 minutes`
    pub fn burst_limit_description(&self) -> String {
        format!(
            "{} requests per {}",
            self.burst_threshold,
            describe_duration_ms(self.burst_window_ms)
        )
    }

    pub fn block_duration_description(&self) -> String {
        describe_duration_ms(self.block_duration_ms)
    }

    fn durations(&self) -> [(&'static str, u64); 4] {
        [
            ("cooldown_period_ms", self.cooldown_period_ms),
            ("daily_window_ms", self.daily_window_ms),
            ("burst_window_ms", self.burst_window_ms),
            ("block_duration_ms", self.block_duration_ms),
        ]
    }
}

/// A window length on the signed millisecond timeline state timestamps use.
/// Lengths past `i64::MAX` are refused by [`FaucetConfig::validate`]; here
/// they clamp.
pub fn window_ms(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sled,
    File,
    Memory,
}

impl StoreBackend {
    pub fn default_path(&self) -> PathBuf {
        match self {
            StoreBackend::Sled => PathBuf::from("./faucet_data"),
            StoreBackend::File => PathBuf::from("/tmp/faucet-rate-limits.json"),
            StoreBackend::Memory => PathBuf::new(),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = FaucetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sled" => Ok(StoreBackend::Sled),
            "file" | "json" => Ok(StoreBackend::File),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(FaucetError::Configuration(format!("Unknown store backend: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Backend location; each backend has its own default
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| self.backend.default_path())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Gas limit for a plain value transfer
    pub gas_limit: u64,
    /// Gas price in wei; queried from the node when unset
    pub gas_price: Option<String>,
    /// Blocks that must include the transfer before it counts as confirmed
    pub confirmations: u64,
    /// Upper bound on submit + confirmation wait
    pub timeout_secs: u64,
    /// Receipt polling interval
    pub poll_interval_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            gas_limit: 21000,
            gas_price: None,
            confirmations: 1,
            timeout_secs: 120,
            poll_interval_ms: 1000,
        }
    }
}

impl LedgerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub enabled: bool,
    /// Requests allowed per IP within `window_ms`
    pub max_requests: u32,
    pub window_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 3,
            window_ms: 10 * MINUTE_MS,
        }
    }
}

impl FaucetConfig {
    /// Load from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Load a config file over the defaults, then apply environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let mut config = drip_common::utils::config::load_config_over(&Self::default(), path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay variables resolved by `lookup`; unparsable numbers keep the
    /// current value.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse_or<T: FromStr>(value: Option<String>, current: T) -> T {
            value.and_then(|v| v.trim().parse().ok()).unwrap_or(current)
        }

        if let Some(addr) = lookup("FAUCET_SERVER_ADDR") {
            self.server_addr = addr;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.trim().parse::<u16>().ok()) {
            let host = self
                .server_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.server_addr = format!("{}:{}", host, port);
        }
        if let Some(rpc_url) = lookup("FAUCET_RPC_URL") {
            self.rpc_url = rpc_url;
        }
        if let Some(key) = lookup("FAUCET_PRIVATE_KEY") {
            self.private_key = Some(key);
        }
        if let Some(chain_id) = lookup("FAUCET_CHAIN_ID").and_then(|c| c.trim().parse().ok()) {
            self.chain_id = Some(chain_id);
        }
        if let Some(amount) = lookup("FAUCET_AMOUNT") {
            self.amount = amount;
        }

        self.policy.cooldown_period_ms = parse_or(lookup("FAUCET_COOLDOWN"), self.policy.cooldown_period_ms);
        self.policy.daily_cap = parse_or(lookup("FAUCET_DAILY_CAP"), self.policy.daily_cap);
        self.policy.burst_threshold = parse_or(lookup("FAUCET_BURST_THRESHOLD"), self.policy.burst_threshold);
        self.policy.burst_window_ms = parse_or(lookup("FAUCET_BURST_WINDOW"), self.policy.burst_window_ms);
        self.policy.block_duration_ms = parse_or(lookup("FAUCET_BLOCK_DURATION"), self.policy.block_duration_ms);

        if let Some(backend) = lookup("FAUCET_STORE_BACKEND").and_then(|b| b.parse().ok()) {
            self.store.backend = backend;
        }
        if let Some(path) = lookup("FAUCET_STORE_PATH") {
            self.store.path = Some(PathBuf::from(path));
        }

        self.ledger.timeout_secs = parse_or(lookup("FAUCET_LEDGER_TIMEOUT"), self.ledger.timeout_secs);
        self.throttle.window_ms = parse_or(lookup("RATE_LIMIT_WINDOW"), self.throttle.window_ms);
        self.throttle.max_requests = parse_or(lookup("RATE_LIMIT_MAX"), self.throttle.max_requests);

        if let Some(trust) = lookup("TRUST_PROXY") {
            self.trust_proxy_headers = matches!(trust.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Startup checks; any failure here keeps the service from starting.
    pub fn validate(&self) -> FaucetResult<()> {
        let key = self
            .private_key
            .as_deref()
            .ok_or_else(|| FaucetError::Configuration("FAUCET_PRIVATE_KEY not found".to_string()))?;
        let key_hex = key.strip_prefix("0x").unwrap_or(key);
        match hex::decode(key_hex) {
            Ok(bytes) if bytes.len() == 32 => {}
            _ => {
                return Err(FaucetError::Configuration(
                    "Private key must be 32 bytes of hex".to_string(),
                ))
            }
        }

        if self.amount_wei()? == 0 {
            return Err(FaucetError::Configuration("Dispense amount must be positive".to_string()));
        }
        parse_ether(&self.low_balance_warning)
            .map_err(|e| FaucetError::Configuration(e.to_string()))?;

        if self.policy.burst_threshold == 0 {
            return Err(FaucetError::Configuration("Burst threshold must be at least 1".to_string()));
        }
        if self.ledger.confirmations == 0 {
            return Err(FaucetError::Configuration("Confirmations must be at least 1".to_string()));
        }

        let durations = self
            .policy
            .durations()
            .into_iter()
            .chain([("throttle.window_ms", self.throttle.window_ms)]);
        for (name, ms) in durations {
            if i64::try_from(ms).is_err() {
                return Err(FaucetError::Configuration(format!(
                    "{} is out of range: {}",
                    name, ms
                )));
            }
        }

        Ok(())
    }

    /// Dispense amount in wei
    pub fn amount_wei(&self) -> FaucetResult<u128> {
        parse_ether(&self.amount).map_err(|e| FaucetError::Configuration(e.to_string()))
    }
}

/// Renders a millisecond duration the way the status endpoint reports it.
pub fn describe_duration_ms(ms: u64) -> String {
    let minutes = ms / MINUTE_MS;
    if ms % HOUR_MS == 0 && minutes >= 60 {
        let hours = minutes / 60;
        return format!("{} hour{}", hours, if hours == 1 { "" } else { "s" });
    }
    if ms % MINUTE_MS == 0 {
        return format!("{} minute{}", minutes, if minutes == 1 { "" } else { "s" });
    }
    format!("{} seconds", ms / 1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_policy() {
        let config = FaucetConfig::default();
        assert_eq!(config.amount, "0.25");
        assert_eq!(config.policy.cooldown_period_ms, 86_400_000);
        assert_eq!(config.policy.daily_cap, 2);
        assert_eq!(config.policy.burst_threshold, 4);
        assert_eq!(config.policy.burst_window_ms, 600_000);
        assert_eq!(config.policy.block_duration_ms, 900_000);
        assert_eq!(config.ledger.gas_limit, 21000);
    }

    #[test]
    fn test_apply_env_overrides() {
        let mut config = FaucetConfig::default();
        config.apply_env(env(&[
            ("FAUCET_PRIVATE_KEY", KEY),
            ("FAUCET_AMOUNT", "0.5"),
            ("FAUCET_COOLDOWN", "3600000"),
            ("FAUCET_STORE_BACKEND", "file"),
            ("PORT", "8080"),
            ("RATE_LIMIT_MAX", "not-a-number"),
        ]));

        assert_eq!(config.private_key.as_deref(), Some(KEY));
        assert_eq!(config.amount, "0.5");
        assert_eq!(config.policy.cooldown_period_ms, 3_600_000);
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.server_addr, "0.0.0.0:8080");
        assert_eq!(config.throttle.max_requests, 3);
    }

    #[test]
    fn test_missing_private_key_is_fatal() {
        let config = FaucetConfig::default();
        assert!(matches!(config.validate(), Err(FaucetError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_bad_amount() {
        let config = FaucetConfig {
            private_key: Some(KEY.to_string()),
            amount: "a lot".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FaucetConfig {
            private_key: Some(KEY.to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_durations() {
        let mut config = FaucetConfig::default();
        config.apply_env(env(&[
            ("FAUCET_PRIVATE_KEY", KEY),
            ("FAUCET_COOLDOWN", "18446744073709551615"),
        ]));
        assert_eq!(config.policy.cooldown_period_ms, u64::MAX);
        assert!(matches!(config.validate(), Err(FaucetError::Configuration(_))));

        let config = FaucetConfig {
            private_key: Some(KEY.to_string()),
            throttle: ThrottleConfig { window_ms: i64::MAX as u64 + 1, ..Default::default() },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = FaucetConfig {
            private_key: Some(KEY.to_string()),
            ..Default::default()
        };
        config.policy.block_duration_ms = i64::MAX as u64;
        assert!(config.validate().is_ok());

        assert_eq!(window_ms(u64::MAX), i64::MAX);
        assert_eq!(window_ms(DAY_MS), 86_400_000);
    }

    #[test]
    fn test_proxy_headers_untrusted_by_default() {
        let mut config = FaucetConfig::default();
        assert!(!config.trust_proxy_headers);

        config.apply_env(env(&[("TRUST_PROXY", "true")]));
        assert!(config.trust_proxy_headers);

        config.apply_env(env(&[("TRUST_PROXY", "0")]));
        assert!(!config.trust_proxy_headers);
    }

    #[test]
    fn test_store_paths() {
        let store = StoreConfig { backend: StoreBackend::File, path: None };
        assert_eq!(store.resolved_path(), PathBuf::from("/tmp/faucet-rate-limits.json"));
        assert!("bogus".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_descriptions() {
        let policy = PolicyConfig::default();
        assert_eq!(policy.burst_limit_description(), "4 requests per 10 minutes");
        assert_eq!(policy.block_duration_description(), "15 minutes");
        assert_eq!(describe_duration_ms(DAY_MS), "24 hours");
        assert_eq!(describe_duration_ms(MINUTE_MS), "1 minute");
    }

    #[test]
    fn test_file_overrides_nested_sections() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "amount = \"0.5\"").unwrap();
        writeln!(file, "[policy]").unwrap();
        writeln!(file, "daily_cap = 5").unwrap();
        writeln!(file, "[store]").unwrap();
        writeln!(file, "backend = \"file\"").unwrap();

        let config = FaucetConfig::from_file(file.path()).unwrap();
        assert_eq!(config.amount, "0.5");
        assert_eq!(config.policy.daily_cap, 5);
        assert_eq!(config.policy.burst_threshold, 4);
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.ledger.gas_limit, 21000);
    }
}
