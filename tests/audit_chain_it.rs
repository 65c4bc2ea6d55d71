mod common;

use std::{sync::Arc, time::Duration};

use common::*;
use locate_pricing::{
    AuditStore, MemoryAuditStore, PricingEngine,
    audit::{AuditOutcome, verify_chain},
    data::{ClientId, TransactionFeeType},
    error::{AuditError, PricingError},
};

#[tokio::test]
async fn ten_calculations_form_a_verifiable_chain() -> anyhow::Result<()> {
    let fixture = EngineFixtureBuilder::new()
        .broker(broker("C", "0.05", TransactionFeeType::Flat, "10.00"))
        .await
        .build();

    let mut ok_responses = 0;
    for loan_days in 1..=10 {
        fixture
            .engine
            .calculate_fee(request("AAPL", "100000", loan_days, "C"))
            .await?;
        ok_responses += 1;
    }

    let EngineFixture {
        engine, audit_store, ..
    } = fixture;
    engine.shutdown().await;

    // Exactly one durable record per 200-OK response.
    let records = audit_store.read_partition(&ClientId::from("C")).await?;
    assert_eq!(records.len(), ok_responses);
    assert!(records
        .iter()
        .all(|r| matches!(r.outcome, AuditOutcome::Priced(_))));

    verify_chain(&records)?;
    Ok(())
}

#[tokio::test]
async fn mutating_a_middle_record_is_detected_at_its_index() {
    let fixture = EngineFixtureBuilder::new()
        .broker(broker("C", "0.05", TransactionFeeType::Flat, "10.00"))
        .await
        .build();

    for loan_days in 1..=10 {
        fixture
            .engine
            .calculate_fee(request("AAPL", "100000", loan_days, "C"))
            .await
            .unwrap();
    }

    let EngineFixture {
        engine, audit_store, ..
    } = fixture;
    engine.shutdown().await;

    let partition = ClientId::from("C");
    let records = audit_store.read_partition(&partition).await.unwrap();
    verify_chain(&records).unwrap();

    let mut forged = records[5].clone();
    forged.inputs.position_value = dec("1");
    audit_store.tamper(&partition, 5, forged).await;

    let tampered = audit_store.read_partition(&partition).await.unwrap();
    assert!(matches!(
        verify_chain(&tampered),
        Err(AuditError::ChainBroken { index: 5 })
    ));
}

#[tokio::test]
async fn rejected_calculations_leave_a_failure_record() {
    let fixture = EngineFixtureBuilder::new()
        .broker(broker("C", "0.05", TransactionFeeType::Flat, "10.00"))
        .await
        .build();

    let result = fixture
        .engine
        .calculate_fee(request("AAPL", "-5", 30, "C"))
        .await;
    assert!(result.is_err());

    let EngineFixture {
        engine, audit_store, ..
    } = fixture;
    engine.shutdown().await;

    let records = audit_store
        .read_partition(&ClientId::from("C"))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    match &records[0].outcome {
        AuditOutcome::Failed { reason } => assert!(reason.contains("positive")),
        other => panic!("expected failure record, got {other:?}"),
    }
    verify_chain(&records).unwrap();
}

#[tokio::test]
async fn audit_backpressure_demotes_the_calculation() {
    let mut config = test_config();
    config.audit.queue_capacity = 1;
    config.audit.batch_size = 1;
    config.audit.workers = 1;
    config.audit.enqueue_deadline = Duration::from_millis(50);

    let config_store = Arc::new(
        locate_pricing::MemoryConfigStore::new()
            .with_broker(broker("C", "0.05", TransactionFeeType::Flat, "10.00"))
            .await,
    );
    let engine = PricingEngine::builder(config)
        .with_config_store(config_store)
        .with_audit_store(Arc::new(StalledAuditStore))
        .with_sec_lend_client(FakeSecLend::quoting(
            "0.05",
            locate_pricing::data::BorrowStatus::Easy,
        ))
        .with_market_client(FakeMarket::reading("20"))
        .with_event_client(FakeEvents::quiet())
        .build()
        .unwrap();

    // First record is taken by the worker and stalls in the store; the
    // second occupies the queue's only slot.
    engine
        .calculate_fee(request("AAPL", "100000", 1, "C"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine
        .calculate_fee(request("AAPL", "100000", 2, "C"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The queue is saturated: the calculation succeeds numerically but is
    // demoted because its audit record cannot even be queued.
    let result = engine
        .calculate_fee(request("AAPL", "100000", 3, "C"))
        .await;
    assert!(matches!(
        result,
        Err(PricingError::Audit(AuditError::Backpressure { .. }))
    ));
}

#[tokio::test]
async fn restarts_extend_chains_instead_of_forking_them() {
    let audit_store = Arc::new(MemoryAuditStore::new());

    for run in 0..2u32 {
        let config_store = Arc::new(
            locate_pricing::MemoryConfigStore::new()
                .with_broker(broker("C", "0.05", TransactionFeeType::Flat, "10.00"))
                .await,
        );
        let engine = PricingEngine::builder(test_config())
            .with_config_store(config_store)
            .with_audit_store(audit_store.clone())
            .with_sec_lend_client(FakeSecLend::quoting(
                "0.05",
                locate_pricing::data::BorrowStatus::Easy,
            ))
            .with_market_client(FakeMarket::reading("20"))
            .with_event_client(FakeEvents::quiet())
            .build()
            .unwrap();

        engine
            .calculate_fee(request("AAPL", "100000", run + 1, "C"))
            .await
            .unwrap();
        engine.shutdown().await;
    }

    let records = audit_store
        .read_partition(&ClientId::from("C"))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    verify_chain(&records).unwrap();
}
