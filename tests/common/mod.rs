#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Days, Utc};
use locate_pricing::{
    AuditStore, EventApi, MarketApi, MemoryAuditStore, MemoryConfigStore, PricingEngine,
    SecLendApi,
    audit::AuditRecord,
    config::EngineConfig,
    data::{
        BorrowSignal, BorrowStatus, BrokerConfig, ClientId, CorporateEvent, FeeRequest, Ticker,
        TransactionFeeType, VolatilitySignal,
    },
    error::{AuditError, ClientError},
};
use rust_decimal::Decimal;

pub fn dec(raw: &str) -> Decimal {
    raw.parse().unwrap()
}

pub fn ticker(raw: &str) -> Ticker {
    Ticker::new(raw).unwrap()
}

pub fn pinned_as_of() -> DateTime<Utc> {
    "2026-08-01T12:00:00Z".parse().unwrap()
}

pub fn request(symbol: &str, position: &str, loan_days: u32, client: &str) -> FeeRequest {
    FeeRequest {
        ticker: ticker(symbol),
        position_value: dec(position),
        loan_days,
        client_id: ClientId::from(client),
    }
}

pub fn broker(client: &str, markup: &str, fee_type: TransactionFeeType, fee: &str) -> BrokerConfig {
    BrokerConfig {
        client_id: ClientId::from(client),
        markup_percent: dec(markup),
        transaction_fee_type: fee_type,
        transaction_fee_value: dec(fee),
        min_rate_override: None,
        rate_limit_tier: 1,
        active: true,
    }
}

/// Routes engine logs to the test writer when `RUST_LOG` is set.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine configuration tightened for fast, deterministic tests.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    for policy in [
        &mut config.resilience.sec_lend,
        &mut config.resilience.market,
        &mut config.resilience.event,
    ] {
        policy.attempt_timeout = Duration::from_millis(200);
        policy.backoff_base = Duration::from_millis(1);
        policy.backoff_cap = Duration::from_millis(5);
    }
    config.service.request_deadline = Duration::from_secs(2);
    config.audit.flush_interval = Duration::from_millis(10);
    config.audit.enqueue_deadline = Duration::from_millis(100);
    config
}

// ================================================================================================
// Scripted Clients
// ================================================================================================

pub struct FakeSecLend {
    calls: AtomicUsize,
    delay: Duration,
    response: Mutex<Result<BorrowSignal, ClientError>>,
}

impl FakeSecLend {
    pub fn quoting(rate: &str, status: BorrowStatus) -> Arc<Self> {
        Self::build(rate, status, Duration::ZERO)
    }

    pub fn slow_quoting(rate: &str, status: BorrowStatus, delay: Duration) -> Arc<Self> {
        Self::build(rate, status, delay)
    }

    fn build(rate: &str, status: BorrowStatus, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            response: Mutex::new(Ok(BorrowSignal {
                rate: dec(rate),
                status,
                as_of: pinned_as_of(),
            })),
        })
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            response: Mutex::new(Err(ClientError::Upstream { status })),
        })
    }

    pub fn set_response(&self, response: Result<BorrowSignal, ClientError>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl SecLendApi for FakeSecLend {
    async fn get_borrow(
        &self,
        _ticker: &Ticker,
        _deadline: Duration,
    ) -> Result<BorrowSignal, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.response.lock().unwrap().clone()
    }
}

pub struct FakeMarket {
    ticker_calls: AtomicUsize,
    vix_calls: AtomicUsize,
    ticker_response: Mutex<Result<VolatilitySignal, ClientError>>,
    vix_response: Mutex<Result<VolatilitySignal, ClientError>>,
}

fn volatility(value: &str) -> Result<VolatilitySignal, ClientError> {
    Ok(VolatilitySignal {
        value: dec(value),
        as_of: pinned_as_of(),
    })
}

impl FakeMarket {
    fn build(
        ticker: Result<VolatilitySignal, ClientError>,
        vix: Result<VolatilitySignal, ClientError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ticker_calls: AtomicUsize::new(0),
            vix_calls: AtomicUsize::new(0),
            ticker_response: Mutex::new(ticker),
            vix_response: Mutex::new(vix),
        })
    }

    pub fn reading(value: &str) -> Arc<Self> {
        Self::build(volatility(value), volatility(value))
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Self::build(
            Err(ClientError::Upstream { status }),
            Err(ClientError::Upstream { status }),
        )
    }

    /// Ticker volatility is down; only the market-wide index answers.
    pub fn vix_only(value: &str) -> Arc<Self> {
        Self::build(Err(ClientError::Upstream { status: 503 }), volatility(value))
    }

    /// Scripts both endpoints at once.
    pub fn set_response(&self, response: Result<VolatilitySignal, ClientError>) {
        *self.ticker_response.lock().unwrap() = response.clone();
        *self.vix_response.lock().unwrap() = response;
    }

    pub fn calls(&self) -> usize {
        self.ticker_calls.load(Ordering::SeqCst)
    }

    pub fn vix_calls(&self) -> usize {
        self.vix_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketApi for FakeMarket {
    async fn ticker_volatility(
        &self,
        _ticker: &Ticker,
        _deadline: Duration,
    ) -> Result<VolatilitySignal, ClientError> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        self.ticker_response.lock().unwrap().clone()
    }

    async fn market_vix(&self, _deadline: Duration) -> Result<VolatilitySignal, ClientError> {
        self.vix_calls.fetch_add(1, Ordering::SeqCst);
        self.vix_response.lock().unwrap().clone()
    }
}

pub struct FakeEvents {
    calls: AtomicUsize,
    response: Mutex<Result<Vec<CorporateEvent>, ClientError>>,
}

impl FakeEvents {
    pub fn quiet() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            response: Mutex::new(Ok(Vec::new())),
        })
    }

    /// One event `days_ahead` from now with the given risk factor.
    pub fn upcoming(days_ahead: u64, risk_factor: u8) -> Arc<Self> {
        let event = CorporateEvent {
            kind: "EARNINGS".to_string(),
            event_date: Utc::now()
                .date_naive()
                .checked_add_days(Days::new(days_ahead))
                .unwrap(),
            risk_factor,
        };
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            response: Mutex::new(Ok(vec![event])),
        })
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            response: Mutex::new(Err(ClientError::Upstream { status })),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventApi for FakeEvents {
    async fn get_events(
        &self,
        _ticker: &Ticker,
        _window_days: u32,
        _deadline: Duration,
    ) -> Result<Vec<CorporateEvent>, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.lock().unwrap().clone()
    }
}

/// Audit store whose appends never complete; backpressure tests only.
pub struct StalledAuditStore;

#[async_trait]
impl AuditStore for StalledAuditStore {
    async fn append_batch(&self, _records: &[AuditRecord]) -> Result<(), AuditError> {
        std::future::pending().await
    }

    async fn last_hash(&self, _partition: &ClientId) -> Result<Option<String>, AuditError> {
        Ok(None)
    }

    async fn read_partition(&self, _partition: &ClientId) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(Vec::new())
    }
}

// ================================================================================================
// Engine Fixture
// ================================================================================================

pub struct EngineFixture {
    pub engine: PricingEngine,
    pub config_store: Arc<MemoryConfigStore>,
    pub audit_store: Arc<MemoryAuditStore>,
    pub sec_lend: Arc<FakeSecLend>,
    pub market: Arc<FakeMarket>,
    pub events: Arc<FakeEvents>,
}

pub struct EngineFixtureBuilder {
    config: EngineConfig,
    config_store: MemoryConfigStore,
    sec_lend: Arc<FakeSecLend>,
    market: Arc<FakeMarket>,
    events: Arc<FakeEvents>,
}

impl EngineFixtureBuilder {
    pub fn new() -> Self {
        init_tracing();
        Self {
            config: test_config(),
            config_store: MemoryConfigStore::new(),
            sec_lend: FakeSecLend::quoting("0.05", BorrowStatus::Easy),
            market: FakeMarket::reading("20"),
            events: FakeEvents::quiet(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn broker(mut self, config: BrokerConfig) -> Self {
        self.config_store = self.config_store.with_broker(config).await;
        self
    }

    pub async fn min_rate(mut self, symbol: &str, rate: &str) -> Self {
        self.config_store = self
            .config_store
            .with_min_rate(ticker(symbol), dec(rate))
            .await;
        self
    }

    pub fn sec_lend(mut self, client: Arc<FakeSecLend>) -> Self {
        self.sec_lend = client;
        self
    }

    pub fn market(mut self, client: Arc<FakeMarket>) -> Self {
        self.market = client;
        self
    }

    pub fn events(mut self, client: Arc<FakeEvents>) -> Self {
        self.events = client;
        self
    }

    pub fn build(self) -> EngineFixture {
        let config_store = Arc::new(self.config_store);
        let audit_store = Arc::new(MemoryAuditStore::new());
        let engine = PricingEngine::builder(self.config)
            .with_config_store(config_store.clone())
            .with_audit_store(audit_store.clone())
            .with_sec_lend_client(self.sec_lend.clone())
            .with_market_client(self.market.clone())
            .with_event_client(self.events.clone())
            .build()
            .unwrap();
        EngineFixture {
            engine,
            config_store,
            audit_store,
            sec_lend: self.sec_lend,
            market: self.market,
            events: self.events,
        }
    }
}
