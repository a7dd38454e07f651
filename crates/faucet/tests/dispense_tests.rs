//! End-to-end dispensing behaviour against stub ledgers and real stores

mod common;

use common::{address, harness, harness_with, test_config, BrokenStore, LedgerMode};
use drip_faucet::config::MINUTE_MS;
use drip_faucet::metrics::{OUTCOME_LEDGER_FAILURE, OUTCOME_SUCCESS};
use drip_faucet::store::{DailyCounter, JsonFileStore, MemoryStore};
use drip_faucet::{DenyReason, RateLimitState, RateLimitStore};
use std::sync::Arc;
use std::time::Duration;

const LEDGER_FAILURE: &str = "Transaction failed. Please try again later.";

#[tokio::test]
async fn test_successful_dispense_records_cooldowns() {
    let h = harness(LedgerMode::Confirm);

    let result = h.service.dispense(&address(1), "1.2.3.4").await;

    assert!(result.success);
    assert_eq!(result.amount.as_deref(), Some("0.25 MON"));
    assert!(result.tx_hash.unwrap().starts_with("0x"));
    assert_eq!(h.ledger.calls(), 1);

    let state = h.store.load().await.unwrap();
    assert!(state.address_cooldowns.contains_key(&address(1).to_string()));
    assert!(state.ip_cooldowns.contains_key("1.2.3.4"));
    assert_eq!(state.daily_counters["1.2.3.4"].count, 1);
    assert_eq!(h.service.metrics().outcome_count(OUTCOME_SUCCESS), 1);
}

#[tokio::test]
async fn test_address_cooldown_applies_across_ips() {
    let h = harness(LedgerMode::Confirm);

    assert!(h.service.dispense(&address(1), "1.2.3.4").await.success);
    h.clock.advance_minutes(1);

    let result = h.service.dispense(&address(1), "5.6.7.8").await;
    assert!(!result.success);
    assert_eq!(result.reason, Some(DenyReason::Address));
    assert_eq!(result.retry_after, Some(1439));
    assert_eq!(h.ledger.calls(), 1);
}

#[tokio::test]
async fn test_reference_scenario() {
    let h = harness(LedgerMode::Confirm);
    let aaa = address(0xaa);

    // 1: first dispense
    let first = h.service.dispense(&aaa, "1.2.3.4").await;
    assert!(first.success);
    assert_eq!(first.amount.as_deref(), Some("0.25 MON"));

    // 2: same address, same ip, one minute later
    h.clock.advance_minutes(1);
    let second = h.service.dispense(&aaa, "1.2.3.4").await;
    assert_eq!(second.reason, Some(DenyReason::Address));
    assert_eq!(second.retry_after, Some(1439));

    // 3: another address from the same ip
    let third = h.service.dispense(&address(0xbb), "1.2.3.4").await;
    assert_eq!(third.reason, Some(DenyReason::Ip));

    // 4-7: fresh ip hammering within two minutes
    let fresh = "9.9.9.9";
    let mut results = Vec::new();
    for n in 0..4u8 {
        results.push(h.service.dispense(&address(0x10 + n), fresh).await);
        h.clock.advance_ms(30_000);
    }
    assert!(results[0].success);
    assert_eq!(results[1].reason, Some(DenyReason::Ip));
    assert_eq!(results[2].reason, Some(DenyReason::Ip));
    assert_eq!(results[3].reason, Some(DenyReason::BlockedIp));
    assert_eq!(results[3].retry_after, Some(15));

    assert_eq!(h.ledger.calls(), 2);
    assert_eq!(h.service.metrics().ip_blocks_total.get(), 1);
}

#[tokio::test]
async fn test_burst_blocks_until_fifteen_minutes_after_trigger() {
    let h = harness(LedgerMode::Error);
    let ip = "10.0.0.1";

    for n in 0..3u8 {
        let result = h.service.dispense(&address(n), ip).await;
        assert!(!result.success);
        assert!(!result.is_rate_limited());
        h.clock.advance_minutes(1);
    }

    // fourth attempt inside the window trips the block
    let trigger = h.service.dispense(&address(3), ip).await;
    assert_eq!(trigger.reason, Some(DenyReason::BlockedIp));
    assert_eq!(trigger.retry_after, Some(15));

    h.clock.advance_minutes(14);
    let still_blocked = h.service.dispense(&address(4), ip).await;
    assert_eq!(still_blocked.reason, Some(DenyReason::BlockedIp));
    assert_eq!(still_blocked.retry_after, Some(1));

    h.clock.advance_ms(MINUTE_MS as i64 + 1);
    let released = h.service.dispense(&address(5), ip).await;
    assert!(!released.is_rate_limited());

    assert_eq!(h.ledger.calls(), 4);
}

#[tokio::test]
async fn test_daily_cap_limits_ip_independent_of_cooldown() {
    let mut config = test_config();
    config.policy.cooldown_period_ms = 60 * MINUTE_MS;
    let h = harness_with(
        config,
        LedgerMode::Confirm,
        Arc::new(MemoryStore::new()),
    );
    let ip = "172.16.0.1";

    assert!(h.service.dispense(&address(1), ip).await.success);
    h.clock.advance_minutes(61);
    assert!(h.service.dispense(&address(2), ip).await.success);
    h.clock.advance_minutes(61);

    let third = h.service.dispense(&address(3), ip).await;
    assert_eq!(third.reason, Some(DenyReason::DailyLimit));
    assert_eq!(third.retry_after, Some(24 * 60 - 122));
    assert!(third.error.unwrap().contains("2 requests per day"));

    // a day after the first success the window has rolled over
    h.clock.advance_minutes(24 * 60 - 122 + 1);
    assert!(h.service.dispense(&address(3), ip).await.success);
}

#[tokio::test]
async fn test_ledger_failure_never_writes_cooldowns() {
    let h = harness(LedgerMode::Error);
    let target = address(7);

    // spaced past the burst window: every call reaches the ledger
    for _ in 0..100 {
        let result = h.service.dispense(&target, "8.8.8.8").await;
        assert_eq!(result.error.as_deref(), Some(LEDGER_FAILURE));
        assert_eq!(result.reason, None);
        h.clock.advance_minutes(11);
    }
    assert_eq!(h.ledger.calls(), 100);

    // back to back: only the burst path ever stops them
    for _ in 0..100 {
        let result = h.service.dispense(&target, "8.8.4.4").await;
        assert!(matches!(result.reason, None | Some(DenyReason::BlockedIp)));
    }
    assert_eq!(h.ledger.calls(), 103);

    let state = h.store.load().await.unwrap();
    assert!(state.address_cooldowns.is_empty());
    assert!(state.ip_cooldowns.is_empty());
    assert!(state.daily_counters.is_empty());
    assert_eq!(h.service.metrics().outcome_count(OUTCOME_LEDGER_FAILURE), 103);
}

#[tokio::test]
async fn test_reverted_transfer_is_a_retryable_failure() {
    let h = harness(LedgerMode::Revert);

    let result = h.service.dispense(&address(1), "1.2.3.4").await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some(LEDGER_FAILURE));
    assert_eq!(result.retry_after, None);

    let retry = h.service.dispense(&address(1), "1.2.3.4").await;
    assert!(!retry.is_rate_limited());
    assert_eq!(h.ledger.calls(), 2);
}

#[tokio::test]
async fn test_store_outage_fails_open() {
    let h = harness_with(test_config(), LedgerMode::Confirm, Arc::new(BrokenStore));

    assert!(h.service.dispense(&address(1), "1.2.3.4").await.success);
    // nothing was remembered, so the same request goes through again
    assert!(h.service.dispense(&address(1), "1.2.3.4").await.success);

    assert_eq!(h.ledger.calls(), 2);
    assert!(h.service.metrics().store_errors_total.get() >= 4);
}

#[tokio::test]
async fn test_corrupt_timestamps_are_discarded() {
    let ip = "1.2.3.4";
    let mut state = RateLimitState::default();
    state.address_cooldowns.insert(address(1).to_string(), i64::MIN);
    state.ip_cooldowns.insert(ip.to_string(), i64::MIN);
    state
        .daily_counters
        .insert(ip.to_string(), DailyCounter { count: u32::MAX, window_start: i64::MIN });
    state.burst_history.insert(ip.to_string(), vec![i64::MIN, i64::MAX]);
    state.ip_blocks.insert(ip.to_string(), i64::MAX);

    let h = harness_with(
        test_config(),
        LedgerMode::Confirm,
        Arc::new(MemoryStore::with_state(state)),
    );

    let result = h.service.dispense(&address(1), ip).await;
    assert!(result.success);

    let state = h.store.load().await.unwrap();
    assert_eq!(state.address_cooldowns[&address(1).to_string()], common::START_MS);
    assert_eq!(state.daily_counters[ip].count, 1);
    assert_eq!(state.burst_history[ip], vec![common::START_MS]);
    assert!(state.ip_blocks.is_empty());
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rate-limits.json");

    let before = harness_with(
        test_config(),
        LedgerMode::Confirm,
        Arc::new(JsonFileStore::new(&path)),
    );
    assert!(before.service.dispense(&address(1), "1.2.3.4").await.success);
    drop(before);

    let after = harness_with(
        test_config(),
        LedgerMode::Confirm,
        Arc::new(JsonFileStore::new(&path)),
    );
    after.clock.advance_minutes(30);

    let result = after.service.dispense(&address(1), "5.6.7.8").await;
    assert_eq!(result.reason, Some(DenyReason::Address));
    assert_eq!(result.retry_after, Some(24 * 60 - 30));
    assert_eq!(after.ledger.calls(), 0);
}

#[tokio::test]
async fn test_ledger_timeout_counts_as_failure() {
    let mut config = test_config();
    config.ledger.timeout_secs = 1;
    let h = harness_with(
        config,
        LedgerMode::Hang,
        Arc::new(MemoryStore::new()),
    );

    let result = h.service.dispense(&address(1), "1.2.3.4").await;
    assert_eq!(result.error.as_deref(), Some(LEDGER_FAILURE));

    let state = h.store.load().await.unwrap();
    assert!(state.address_cooldowns.is_empty());
}

#[tokio::test]
async fn test_abandoned_request_still_commits() {
    let h = harness(LedgerMode::Slow);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        h.service.dispense(&address(1), "1.2.3.4"),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(500)).await;

    let state = h.store.load().await.unwrap();
    assert!(state.address_cooldowns.contains_key(&address(1).to_string()));
    assert_eq!(h.ledger.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_attempts_keep_every_burst_sample() {
    let h = harness(LedgerMode::Error);

    let mut handles = Vec::new();
    for n in 0..3u8 {
        let service = h.service.clone();
        handles.push(tokio::spawn(async move {
            service.dispense(&address(n), "3.3.3.3").await
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let state = h.store.load().await.unwrap();
    assert_eq!(state.burst_history["3.3.3.3"].len(), 3);
}

#[tokio::test]
async fn test_compact_drops_expired_entries() {
    let h = harness(LedgerMode::Confirm);

    assert!(h.service.dispense(&address(1), "1.2.3.4").await.success);
    assert_eq!(h.service.compact().await, 0);

    h.clock.advance_minutes(25 * 60);
    // address, ip, daily counter and one burst sample
    assert_eq!(h.service.compact().await, 4);
    assert!(h.store.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_reports_configuration() {
    let h = harness(LedgerMode::Confirm);

    let status = h.service.status();
    assert_eq!(status.faucet_address, common::FAUCET_ADDRESS);
    assert_eq!(status.faucet_amount, "0.25");
    assert_eq!(status.asset_symbol, "MON");
    assert_eq!(status.cooldown_period, 86_400_000);
    assert_eq!(status.daily_limit, 2);
    assert_eq!(status.short_term_limit, "4 requests per 10 minutes");
    assert_eq!(status.block_duration, "15 minutes");

    assert_eq!(h.service.check_balance().await.unwrap(), 1_000 * 10u128.pow(18));
}
