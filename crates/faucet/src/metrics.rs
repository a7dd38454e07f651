//! Prometheus metrics for the faucet

use prometheus::{
    histogram_opts, opts, Encoder, Histogram, IntCounter, IntCounterVec, Registry, TextEncoder,
};

/// Dispense outcome label values
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_LEDGER_FAILURE: &str = "ledger_failure";

pub struct FaucetMetrics {
    registry: Registry,
    /// Dispense attempts by outcome (success, deny reason, ledger_failure)
    pub dispense_total: IntCounterVec,
    pub ip_blocks_total: IntCounter,
    pub ledger_duration: Histogram,
    pub store_errors_total: IntCounter,
}

impl FaucetMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let dispense_total = IntCounterVec::new(
            opts!("faucet_dispense_total", "Dispense attempts by outcome"),
            &["outcome"],
        )?;
        let ip_blocks_total = IntCounter::with_opts(opts!(
            "faucet_ip_blocks_total",
            "Temporary IP blocks imposed after request bursts"
        ))?;
        let ledger_duration = Histogram::with_opts(histogram_opts!(
            "faucet_ledger_duration_seconds",
            "Time from transfer submission to confirmation or failure",
            vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
        ))?;
        let store_errors_total = IntCounter::with_opts(opts!(
            "faucet_store_errors_total",
            "Rate-limit store load/save failures"
        ))?;

        registry.register(Box::new(dispense_total.clone()))?;
        registry.register(Box::new(ip_blocks_total.clone()))?;
        registry.register(Box::new(ledger_duration.clone()))?;
        registry.register(Box::new(store_errors_total.clone()))?;

        Ok(Self {
            registry,
            dispense_total,
            ip_blocks_total,
            ledger_duration,
            store_errors_total,
        })
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.dispense_total.with_label_values(&[outcome]).inc();
    }

    pub fn outcome_count(&self, outcome: &str) -> u64 {
        self.dispense_total.with_label_values(&[outcome]).get()
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
