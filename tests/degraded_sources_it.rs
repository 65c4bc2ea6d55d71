mod common;

use std::time::Duration;

use common::*;
use locate_pricing::{
    AuditStore, BreakerState, Endpoint,
    audit::AuditOutcome,
    data::{BorrowStatus, SourceFlag, TransactionFeeType},
    error::ClientError,
};

#[tokio::test]
async fn sec_lend_outage_falls_back_to_the_min_rate() {
    let fixture = EngineFixtureBuilder::new()
        .sec_lend(FakeSecLend::failing(503))
        .market(FakeMarket::reading("0"))
        .broker(broker("X", "0.05", TransactionFeeType::Flat, "10.00"))
        .await
        .min_rate("GME", "0.01")
        .await
        .build();

    let breakdown = fixture
        .engine
        .calculate_fee(request("GME", "50000", 30, "X"))
        .await
        .unwrap();

    assert_eq!(breakdown.data_sources.borrow, SourceFlag::Fallback);
    assert_eq!(breakdown.borrow_rate_used, dec("0.01"));
    // The retry budget was spent before falling back.
    assert_eq!(fixture.sec_lend.calls(), 3);
}

#[tokio::test]
async fn open_breaker_serves_fallbacks_without_upstream_calls() {
    let mut config = test_config();
    config.resilience.sec_lend.max_failures = 2;
    config.resilience.sec_lend.max_attempts = 2;

    let fixture = EngineFixtureBuilder::new()
        .config(config)
        .sec_lend(FakeSecLend::failing(500))
        .market(FakeMarket::reading("0"))
        .broker(broker("X", "0.05", TransactionFeeType::Flat, "10.00"))
        .await
        .build();

    // Two failed attempts trip the breaker.
    let first = fixture
        .engine
        .calculate_fee(request("GME", "50000", 30, "X"))
        .await
        .unwrap();
    assert_eq!(first.data_sources.borrow, SourceFlag::Fallback);

    let health = fixture.engine.health();
    let sec_lend = health
        .breaker_states
        .iter()
        .find(|h| h.endpoint == Endpoint::SecLend)
        .unwrap();
    assert_eq!(sec_lend.state, BreakerState::Open);

    // While OPEN, requests still answer 200 with fallbacks and the venue
    // sees zero traffic.
    fixture.sec_lend.reset_calls();
    let second = fixture
        .engine
        .calculate_fee(request("MSFT", "80000", 15, "X"))
        .await
        .unwrap();
    assert_eq!(second.data_sources.borrow, SourceFlag::Fallback);
    assert_eq!(second.borrow_rate_used, dec("0.0025"));
    assert_eq!(fixture.sec_lend.calls(), 0);
}

#[tokio::test]
async fn not_found_borrows_fall_back_like_outages() {
    let sec_lend = FakeSecLend::quoting("0.05", BorrowStatus::Easy);
    sec_lend.set_response(Err(ClientError::NotFound("DELISTED".into())));

    let fixture = EngineFixtureBuilder::new()
        .sec_lend(sec_lend)
        .market(FakeMarket::reading("0"))
        .broker(broker("X", "0.05", TransactionFeeType::Flat, "10.00"))
        .await
        .build();

    let breakdown = fixture
        .engine
        .calculate_fee(request("DELISTED", "10000", 10, "X"))
        .await
        .unwrap();

    assert_eq!(breakdown.data_sources.borrow, SourceFlag::Fallback);
    assert_eq!(breakdown.borrow_rate_used, dec("0.0025"));
    // Terminal answers are not retried.
    assert_eq!(fixture.sec_lend.calls(), 1);
}

#[tokio::test]
async fn volatility_falls_back_to_the_last_cached_value_within_grace() {
    let mut config = test_config();
    config.cache.ttl.volatility = Duration::from_millis(50);
    config.cache.volatility_grace = Duration::from_secs(60);

    let fixture = EngineFixtureBuilder::new()
        .config(config)
        .market(FakeMarket::reading("35"))
        .broker(broker("X", "0.05", TransactionFeeType::Flat, "10.00"))
        .await
        .build();

    let live = fixture
        .engine
        .calculate_fee(request("TSLA", "100000", 30, "X"))
        .await
        .unwrap();
    assert_eq!(live.data_sources.volatility, SourceFlag::Live);

    // Let the cached reading expire, then take the provider down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    fixture
        .market
        .set_response(Err(ClientError::Upstream { status: 503 }));

    let degraded = fixture
        .engine
        .calculate_fee(request("TSLA", "90000", 30, "X"))
        .await
        .unwrap();
    assert_eq!(degraded.data_sources.volatility, SourceFlag::Fallback);

    // The stale reading (35), not the configured default, fed the price.
    let EngineFixture {
        engine, audit_store, ..
    } = fixture;
    engine.shutdown().await;
    let records = audit_store
        .read_partition(&locate_pricing::data::ClientId::from("X"))
        .await
        .unwrap();
    let last = records.last().unwrap();
    let signals = last.signals.as_ref().unwrap();
    assert_eq!(signals.volatility_index, dec("35"));
    assert_eq!(signals.source_flags.volatility, SourceFlag::Fallback);
}

#[tokio::test]
async fn market_vix_stands_in_for_failed_ticker_volatility() {
    let fixture = EngineFixtureBuilder::new()
        .market(FakeMarket::vix_only("28"))
        .broker(broker("X", "0.05", TransactionFeeType::Flat, "10.00"))
        .await
        .build();

    let first = fixture
        .engine
        .calculate_fee(request("TSLA", "100000", 30, "X"))
        .await
        .unwrap();
    assert_eq!(first.data_sources.volatility, SourceFlag::Fallback);
    assert_eq!(fixture.market.vix_calls(), 1);

    // The VIX read populated `vol:market`; other tickers now hit it
    // straight from cache without another upstream call.
    let second = fixture
        .engine
        .calculate_fee(request("MSFT", "50000", 30, "X"))
        .await
        .unwrap();
    assert_eq!(second.data_sources.volatility, SourceFlag::Cached);
    assert_eq!(fixture.market.vix_calls(), 1);

    // The market-wide reading fed both prices.
    let EngineFixture {
        engine, audit_store, ..
    } = fixture;
    engine.shutdown().await;
    let records = audit_store
        .read_partition(&locate_pricing::data::ClientId::from("X"))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert!(
        records
            .iter()
            .all(|record| record.signals.as_ref().unwrap().volatility_index == dec("28"))
    );
}

#[tokio::test]
async fn volatility_defaults_when_nothing_is_cached() {
    let fixture = EngineFixtureBuilder::new()
        .market(FakeMarket::failing(500))
        .broker(broker("X", "0.05", TransactionFeeType::Flat, "10.00"))
        .await
        .build();

    let breakdown = fixture
        .engine
        .calculate_fee(request("AAPL", "100000", 30, "X"))
        .await
        .unwrap();
    assert_eq!(breakdown.data_sources.volatility, SourceFlag::Fallback);

    let EngineFixture {
        engine, audit_store, ..
    } = fixture;
    engine.shutdown().await;
    let records = audit_store
        .read_partition(&locate_pricing::data::ClientId::from("X"))
        .await
        .unwrap();
    let signals = records.last().unwrap().signals.as_ref().unwrap();
    // The configured default volatility index.
    assert_eq!(signals.volatility_index, dec("20"));
}

#[tokio::test]
async fn event_outages_price_with_zero_risk() {
    let fixture = EngineFixtureBuilder::new()
        .events(FakeEvents::failing(502))
        .broker(broker("X", "0.05", TransactionFeeType::Flat, "10.00"))
        .await
        .build();

    let degraded = fixture
        .engine
        .calculate_fee(request("AAPL", "100000", 30, "X"))
        .await
        .unwrap();
    assert_eq!(degraded.data_sources.event, SourceFlag::Fallback);

    // Identical to a quiet calendar: vol 20 -> adjusted 0.06.
    assert_eq!(degraded.borrow_rate_used, dec("0.0600"));
    assert_eq!(degraded.total_fee, dec("527.8082"));
}

#[tokio::test]
async fn every_degraded_response_is_still_audited() {
    let fixture = EngineFixtureBuilder::new()
        .sec_lend(FakeSecLend::failing(503))
        .market(FakeMarket::failing(503))
        .events(FakeEvents::failing(503))
        .broker(broker("X", "0.05", TransactionFeeType::Flat, "10.00"))
        .await
        .build();

    fixture
        .engine
        .calculate_fee(request("GME", "50000", 30, "X"))
        .await
        .unwrap();

    let EngineFixture {
        engine, audit_store, ..
    } = fixture;
    engine.shutdown().await;
    let records = audit_store
        .read_partition(&locate_pricing::data::ClientId::from("X"))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!(matches!(records[0].outcome, AuditOutcome::Priced(_)));
    let signals = records[0].signals.as_ref().unwrap();
    assert_eq!(signals.borrow_status, BorrowStatus::Hard);
    assert!(!signals.source_flags.fully_sourced());
}
