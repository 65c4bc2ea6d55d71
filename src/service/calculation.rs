use std::{sync::Arc, time::Duration};

use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{
    audit::{
        emitter::AuditEmitter,
        record::{AuditDraft, AuditOutcome},
    },
    cache::{InProcessSharedCache, Keyspace, SharedCache, TieredCache, value::CachedValue},
    clients::{
        EventApi, EventClient, MarketApi, MarketClient, SecLendApi, SecLendClient,
    },
    config::{EngineConfig, KernelConfig},
    data::{
        breakdown::{BorrowQuote, FeeBreakdown, FeeRequest},
        domain::{BrokerConfig, Ticker},
        signal::SignalBundle,
    },
    error::{CalculationError, PricingResult},
    math::{adjust_borrow_rate, assemble_breakdown, calc_fingerprint, effective_minimum_rate},
    resilience::RequestBudget,
    service::{
        data::DataService,
        health::{EndpointHealth, Health},
    },
    store::{AuditStore, ConfigCatalog, ConfigStore, MemoryAuditStore, MemoryConfigStore},
};

/// The engine's entry point: validates, prices, audits.
///
/// One instance serves many concurrent requests; everything mutable behind
/// it (breakers, caches, audit queue) is shared state designed for that.
pub struct PricingEngine {
    kernel: KernelConfig,
    request_deadline: Duration,
    cache: Arc<TieredCache>,
    catalog: Arc<ConfigCatalog>,
    data: DataService,
    audit: AuditEmitter,
    invalidation_task: JoinHandle<()>,
}

impl PricingEngine {
    pub fn builder(config: EngineConfig) -> PricingEngineBuilder {
        PricingEngineBuilder::new(config)
    }

    /// Prices one locate fee request.
    ///
    /// The returned breakdown is reproducible from the request, the signal
    /// bundle snapshot in its audit record, and the broker's configured
    /// markup. Every outcome, success or failure, is audited; a success
    /// whose audit record cannot even be queued is demoted to an error.
    #[tracing::instrument(
        skip(self, request),
        fields(ticker = %request.ticker, client_id = %request.client_id)
    )]
    pub async fn calculate_fee(&self, request: FeeRequest) -> PricingResult<FeeBreakdown> {
        if let Err(invalid) = request.validate() {
            self.audit_failure(&request, None, invalid.to_string()).await;
            return Err(invalid.into());
        }

        let budget = RequestBudget::start(self.request_deadline);
        let fingerprint = calc_fingerprint(
            &request,
            self.cache.config_generation(),
            self.cache.signal_generation(),
        );

        // Idempotent short-circuit: an identical request priced under the
        // same config and signal generations within the calc TTL.
        if let Some(hit) = self.cache.get(Keyspace::Calc, &fingerprint).await
            && let Some(breakdown) = hit.as_breakdown()
        {
            let breakdown = breakdown.clone();
            self.audit_success(&request, None, &breakdown).await?;
            return Ok(breakdown);
        }

        let broker = match self.catalog.broker(&request.client_id).await {
            Ok(broker) => broker,
            Err(unavailable) => {
                self.audit_failure(&request, None, unavailable.to_string())
                    .await;
                return Err(unavailable);
            }
        };

        let bundle = self
            .data
            .signal_bundle(&request.ticker, request.loan_days, &budget)
            .await;

        let breakdown = match self.price(&request, &broker, &bundle) {
            Ok(breakdown) => breakdown,
            Err(precondition) => {
                self.audit_failure(&request, Some(bundle), precondition.to_string())
                    .await;
                return Err(precondition.into());
            }
        };

        let generation = self.cache.generation(Keyspace::Calc);
        self.cache.write_through(
            Keyspace::Calc,
            &fingerprint,
            CachedValue::Breakdown(breakdown.clone()),
            generation,
        );

        self.audit_success(&request, Some(bundle), &breakdown).await?;
        info!(total_fee = %breakdown.total_fee, "Fee calculated");
        Ok(breakdown)
    }

    /// The current borrow rate for a ticker, from the same cached and
    /// fallback-guarded signal path calculations use.
    pub async fn get_borrow_rate(&self, ticker: &Ticker) -> BorrowQuote {
        let budget = RequestBudget::start(self.request_deadline);
        self.data.borrow_quote(ticker, &budget).await
    }

    /// Operational snapshot for the health endpoint.
    pub fn health(&self) -> Health {
        Health {
            cache_ok: true,
            shared_cache_ok: self.cache.shared_healthy(),
            audit_queue_depth: self.audit.queue_depth(),
            audit_alert: self.audit.alert_raised(),
            breaker_states: self
                .data
                .breaker_states()
                .into_iter()
                .map(|(endpoint, state)| EndpointHealth { endpoint, state })
                .collect(),
        }
    }

    /// Administrative broker update; live, via the config store and an
    /// invalidation broadcast.
    pub async fn upsert_broker(&self, config: BrokerConfig) -> PricingResult<()> {
        self.catalog.upsert_broker(config).await
    }

    /// Administrative per-ticker floor update.
    pub async fn set_min_rate(&self, ticker: &Ticker, rate: Decimal) -> PricingResult<()> {
        self.catalog.set_min_rate(ticker, rate).await
    }

    /// Drains and persists every queued audit record, then stops the
    /// background tasks.
    pub async fn shutdown(self) {
        self.audit.shutdown().await;
        self.invalidation_task.abort();
    }

    // ============================================================================================
    // Internals
    // ============================================================================================

    /// Pure pricing step. Kernel rejections at this stage are runtime
    /// precondition failures, not caller errors: inputs were already
    /// validated, so whatever is out of domain came from signals or config.
    fn price(
        &self,
        request: &FeeRequest,
        broker: &BrokerConfig,
        bundle: &SignalBundle,
    ) -> Result<FeeBreakdown, CalculationError> {
        let effective_min = effective_minimum_rate(
            self.kernel.global_min_rate,
            broker.min_rate_override,
            Some(bundle.min_rate),
        );
        adjust_borrow_rate(
            &self.kernel,
            bundle.base_borrow_rate,
            bundle.volatility_index,
            bundle.event_risk_factor,
            effective_min,
        )
        .and_then(|adjusted| {
            assemble_breakdown(
                &self.kernel,
                request.position_value,
                request.loan_days,
                adjusted,
                broker.markup_percent,
                broker.transaction_fee_type,
                broker.transaction_fee_value,
                bundle.source_flags,
                bundle.signal_freshness,
            )
        })
        .map_err(|domain| CalculationError::Precondition(domain.to_string()))
    }

    async fn audit_success(
        &self,
        request: &FeeRequest,
        signals: Option<SignalBundle>,
        breakdown: &FeeBreakdown,
    ) -> PricingResult<()> {
        let draft = AuditDraft::new(request, AuditOutcome::Priced(breakdown.clone()), signals);
        self.audit.enqueue(draft).await.map_err(|backpressure| {
            error!(%backpressure, "Calculation demoted: audit record could not be queued");
            backpressure.into()
        })
    }

    async fn audit_failure(&self, request: &FeeRequest, signals: Option<SignalBundle>, reason: String) {
        let draft = AuditDraft::new(request, AuditOutcome::Failed { reason }, signals);
        if let Err(dropped) = self.audit.enqueue(draft).await {
            error!(%dropped, "Failed to audit a rejected calculation");
        }
    }
}

// ================================================================================================
// Builder
// ================================================================================================

/// Assembles a [`PricingEngine`], defaulting every collaborator that was
/// not injected: in-process shared cache, in-memory stores, HTTP clients
/// built from the endpoint configuration.
pub struct PricingEngineBuilder {
    config: EngineConfig,
    shared_cache: Option<Arc<dyn SharedCache>>,
    config_store: Option<Arc<dyn ConfigStore>>,
    audit_store: Option<Arc<dyn AuditStore>>,
    sec_lend: Option<Arc<dyn SecLendApi>>,
    market: Option<Arc<dyn MarketApi>>,
    events: Option<Arc<dyn EventApi>>,
}

impl PricingEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            shared_cache: None,
            config_store: None,
            audit_store: None,
            sec_lend: None,
            market: None,
            events: None,
        }
    }

    pub fn with_shared_cache(mut self, shared: Arc<dyn SharedCache>) -> Self {
        self.shared_cache = Some(shared);
        self
    }

    pub fn with_config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    pub fn with_audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(store);
        self
    }

    pub fn with_sec_lend_client(mut self, client: Arc<dyn SecLendApi>) -> Self {
        self.sec_lend = Some(client);
        self
    }

    pub fn with_market_client(mut self, client: Arc<dyn MarketApi>) -> Self {
        self.market = Some(client);
        self
    }

    pub fn with_event_client(mut self, client: Arc<dyn EventApi>) -> Self {
        self.events = Some(client);
        self
    }

    /// Validates the configuration and starts the engine's background
    /// tasks. Must run inside a tokio runtime.
    pub fn build(self) -> PricingResult<PricingEngine> {
        let config = self.config;
        config.validate()?;

        let shared = self
            .shared_cache
            .unwrap_or_else(|| Arc::new(InProcessSharedCache::new()));
        let cache = Arc::new(TieredCache::new(&config.cache, shared));
        let invalidation_task = cache.spawn_invalidation_subscriber();

        let config_store = self
            .config_store
            .unwrap_or_else(|| Arc::new(MemoryConfigStore::new()));
        let catalog = Arc::new(ConfigCatalog::new(
            config_store,
            Arc::clone(&cache),
            config.kernel.global_min_rate,
        ));

        let sec_lend: Arc<dyn SecLendApi> = match self.sec_lend {
            Some(client) => client,
            None => Arc::new(SecLendClient::new(&config.endpoints.sec_lend)?),
        };
        let market: Arc<dyn MarketApi> = match self.market {
            Some(client) => client,
            None => Arc::new(MarketClient::new(&config.endpoints.market)?),
        };
        let events: Arc<dyn EventApi> = match self.events {
            Some(client) => client,
            None => Arc::new(EventClient::new(&config.endpoints.event)?),
        };

        let data = DataService::new(
            Arc::clone(&cache),
            Arc::clone(&catalog),
            &config.resilience,
            &config.kernel,
            sec_lend,
            market,
            events,
        );

        let audit_store = self
            .audit_store
            .unwrap_or_else(|| Arc::new(MemoryAuditStore::new()));
        let audit = AuditEmitter::spawn(&config.audit, audit_store);

        Ok(PricingEngine {
            kernel: config.kernel,
            request_deadline: config.service.request_deadline,
            cache,
            catalog,
            data,
            audit,
            invalidation_task,
        })
    }
}
