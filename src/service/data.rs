use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use smallvec::{SmallVec, smallvec};
use tracing::warn;

use crate::{
    cache::{Keyspace, MARKET_VOLATILITY_KEY, TieredCache, value::CachedValue},
    clients::{EventApi, MarketApi, SecLendApi},
    config::{KernelConfig, ResilienceConfig},
    data::{
        breakdown::BorrowQuote,
        domain::{BorrowStatus, Ticker},
        signal::{SignalBundle, SourceFlag, SourceFlags, max_event_risk_within},
    },
    resilience::{Endpoint, EndpointGuard, RequestBudget, breaker::BreakerState},
    store::ConfigCatalog,
};

/// Orchestrates cache, resilience and the external clients into the signal
/// bundle one calculation consumes.
///
/// The service degrades, never fails: every signal has a fallback, and only
/// a broker config problem (owned by the calculation service) can fail a
/// request. Cache misses dispatch concurrently under single-flight, and
/// successes write through with the generation snapshotted before the fetch.
pub struct DataService {
    cache: Arc<TieredCache>,
    catalog: Arc<ConfigCatalog>,
    sec_lend: Arc<dyn SecLendApi>,
    market: Arc<dyn MarketApi>,
    events: Arc<dyn EventApi>,
    sec_lend_guard: EndpointGuard,
    market_guard: EndpointGuard,
    event_guard: EndpointGuard,
    default_volatility: Decimal,
}

struct SourcedSignal<T> {
    value: T,
    flag: SourceFlag,
    as_of: Option<DateTime<Utc>>,
}

impl DataService {
    pub(crate) fn new(
        cache: Arc<TieredCache>,
        catalog: Arc<ConfigCatalog>,
        resilience: &ResilienceConfig,
        kernel: &KernelConfig,
        sec_lend: Arc<dyn SecLendApi>,
        market: Arc<dyn MarketApi>,
        events: Arc<dyn EventApi>,
    ) -> Self {
        Self {
            cache,
            catalog,
            sec_lend,
            market,
            events,
            sec_lend_guard: EndpointGuard::new(
                Endpoint::SecLend,
                Endpoint::SecLend.policy(resilience),
            ),
            market_guard: EndpointGuard::new(Endpoint::Market, Endpoint::Market.policy(resilience)),
            event_guard: EndpointGuard::new(Endpoint::Event, Endpoint::Event.policy(resilience)),
            default_volatility: kernel.default_volatility_index,
        }
    }

    /// Assembles the signal bundle for `(ticker, loan_days)`.
    ///
    /// Cache hits are marked `CACHED`, fresh fetches `LIVE`, substitutions
    /// `FALLBACK`. The three signals are resolved concurrently.
    pub(crate) async fn signal_bundle(
        &self,
        ticker: &Ticker,
        loan_days: u32,
        budget: &RequestBudget,
    ) -> SignalBundle {
        let min_rate = self.catalog.min_rate(ticker).await;

        let (borrow, volatility, event) = futures::join!(
            self.borrow_signal(ticker, min_rate, budget),
            self.volatility_signal(ticker, budget),
            self.event_risk(ticker, loan_days, budget),
        );

        let source_flags = SourceFlags {
            borrow: borrow.flag,
            volatility: volatility.flag,
            event: event.flag,
        };
        let (rate, status) = borrow.value;

        SignalBundle {
            base_borrow_rate: rate,
            borrow_status: status,
            volatility_index: volatility.value,
            event_risk_factor: event.value,
            min_rate,
            signal_freshness: freshness(&[borrow.as_of, volatility.as_of, event.as_of]),
            source_flags,
        }
    }

    /// The standalone borrow rate lookup, sharing the calculation path's
    /// cache and fallback discipline.
    pub(crate) async fn borrow_quote(&self, ticker: &Ticker, budget: &RequestBudget) -> BorrowQuote {
        let min_rate = self.catalog.min_rate(ticker).await;
        let sourced = self.borrow_signal(ticker, min_rate, budget).await;
        let (rate, status) = sourced.value;
        BorrowQuote {
            current_rate: rate,
            status,
            source_flags: sourced.flag,
            as_of: sourced.as_of.unwrap_or_else(Utc::now),
        }
    }

    /// Breaker states of every endpoint, for the health probe.
    pub(crate) fn breaker_states(&self) -> SmallVec<[(Endpoint, BreakerState); 3]> {
        smallvec![
            (Endpoint::SecLend, self.sec_lend_guard.breaker_state()),
            (Endpoint::Market, self.market_guard.breaker_state()),
            (Endpoint::Event, self.event_guard.breaker_state()),
        ]
    }

    // ============================================================================================
    // Per-signal resolution
    // ============================================================================================

    async fn borrow_signal(
        &self,
        ticker: &Ticker,
        min_rate: Decimal,
        budget: &RequestBudget,
    ) -> SourcedSignal<(Decimal, BorrowStatus)> {
        let read_cached = |value: CachedValue| {
            value.as_borrow().map(|signal| SourcedSignal {
                value: (signal.rate, signal.status),
                flag: SourceFlag::Cached,
                as_of: Some(signal.as_of),
            })
        };

        if let Some(hit) = self
            .cache
            .get(Keyspace::Borrow, ticker.as_str())
            .await
            .and_then(read_cached)
        {
            return hit;
        }

        let _flight = self.cache.begin_flight(Keyspace::Borrow, ticker.as_str()).await;
        if let Some(hit) = self
            .cache
            .get(Keyspace::Borrow, ticker.as_str())
            .await
            .and_then(read_cached)
        {
            return hit;
        }

        let generation = self.cache.generation(Keyspace::Borrow);
        match self
            .sec_lend_guard
            .call(budget, |deadline| self.sec_lend.get_borrow(ticker, deadline))
            .await
        {
            Ok(signal) => {
                self.cache.write_through(
                    Keyspace::Borrow,
                    ticker.as_str(),
                    CachedValue::Borrow(signal.clone()),
                    generation,
                );
                SourcedSignal {
                    value: (signal.rate, signal.status),
                    flag: SourceFlag::Live,
                    as_of: Some(signal.as_of),
                }
            }
            Err(error) => {
                // Conservative fallback: the floor rate, assumed hard to
                // borrow.
                warn!(%ticker, %error, "Borrow fetch failed, falling back to min rate");
                SourcedSignal {
                    value: (min_rate, BorrowStatus::Hard),
                    flag: SourceFlag::Fallback,
                    as_of: None,
                }
            }
        }
    }

    async fn volatility_signal(
        &self,
        ticker: &Ticker,
        budget: &RequestBudget,
    ) -> SourcedSignal<Decimal> {
        // Ticker volatility first, the market-wide index as a stand-in.
        if let Some(hit) = self
            .cache
            .get(Keyspace::Vol, ticker.as_str())
            .await
            .and_then(|value| Self::cached_volatility(value, SourceFlag::Cached))
        {
            return hit;
        }
        if let Some(hit) = self
            .cache
            .get(Keyspace::Vol, MARKET_VOLATILITY_KEY)
            .await
            .and_then(|value| Self::cached_volatility(value, SourceFlag::Cached))
        {
            return hit;
        }

        let _flight = self.cache.begin_flight(Keyspace::Vol, ticker.as_str()).await;
        if let Some(hit) = self
            .cache
            .get(Keyspace::Vol, ticker.as_str())
            .await
            .and_then(|value| Self::cached_volatility(value, SourceFlag::Cached))
        {
            return hit;
        }

        let generation = self.cache.generation(Keyspace::Vol);
        match self
            .market_guard
            .call(budget, |deadline| {
                self.market.ticker_volatility(ticker, deadline)
            })
            .await
        {
            Ok(signal) => {
                self.cache.write_through(
                    Keyspace::Vol,
                    ticker.as_str(),
                    CachedValue::Volatility(signal.clone()),
                    generation,
                );
                SourcedSignal {
                    value: signal.value,
                    flag: SourceFlag::Live,
                    as_of: Some(signal.as_of),
                }
            }
            Err(error) => {
                warn!(%ticker, %error, "Ticker volatility fetch failed, trying the market-wide index");
                self.market_volatility(ticker, budget).await
            }
        }
    }

    /// Market-wide volatility standing in for a failed ticker fetch. A live
    /// VIX read keeps `vol:market` populated, so subsequent requests for any
    /// ticker hit it straight from cache; only when the venue is down
    /// entirely does the grace-window/default policy apply.
    async fn market_volatility(
        &self,
        ticker: &Ticker,
        budget: &RequestBudget,
    ) -> SourcedSignal<Decimal> {
        let _flight = self
            .cache
            .begin_flight(Keyspace::Vol, MARKET_VOLATILITY_KEY)
            .await;
        if let Some(hit) = self
            .cache
            .get(Keyspace::Vol, MARKET_VOLATILITY_KEY)
            .await
            .and_then(|value| Self::cached_volatility(value, SourceFlag::Fallback))
        {
            return hit;
        }

        let generation = self.cache.generation(Keyspace::Vol);
        match self
            .market_guard
            .call(budget, |deadline| self.market.market_vix(deadline))
            .await
        {
            Ok(signal) => {
                self.cache.write_through(
                    Keyspace::Vol,
                    MARKET_VOLATILITY_KEY,
                    CachedValue::Volatility(signal.clone()),
                    generation,
                );
                SourcedSignal {
                    value: signal.value,
                    flag: SourceFlag::Fallback,
                    as_of: Some(signal.as_of),
                }
            }
            Err(error) => {
                warn!(%ticker, %error, "Market volatility fetch failed, applying fallback policy");
                self.stale_or_default_volatility(ticker)
            }
        }
    }

    fn cached_volatility(value: CachedValue, flag: SourceFlag) -> Option<SourcedSignal<Decimal>> {
        value.as_volatility().map(|signal| SourcedSignal {
            value: signal.value,
            flag,
            as_of: Some(signal.as_of),
        })
    }

    /// Volatility fallback of last resort: the last cached value if it is
    /// still within the grace window, the configured default otherwise.
    fn stale_or_default_volatility(&self, ticker: &Ticker) -> SourcedSignal<Decimal> {
        let stale = self
            .cache
            .get_within_grace(Keyspace::Vol, ticker.as_str())
            .or_else(|| self.cache.get_within_grace(Keyspace::Vol, MARKET_VOLATILITY_KEY));
        if let Some(signal) = stale.as_ref().and_then(|value| value.as_volatility()) {
            return SourcedSignal {
                value: signal.value,
                flag: SourceFlag::Fallback,
                as_of: Some(signal.as_of),
            };
        }
        SourcedSignal {
            value: self.default_volatility,
            flag: SourceFlag::Fallback,
            as_of: None,
        }
    }

    async fn event_risk(
        &self,
        ticker: &Ticker,
        loan_days: u32,
        budget: &RequestBudget,
    ) -> SourcedSignal<u8> {
        let today = Utc::now().date_naive();
        let read_cached = |value: CachedValue| {
            value.as_events().map(|events| SourcedSignal {
                value: max_event_risk_within(events, today, loan_days),
                flag: SourceFlag::Cached,
                as_of: None,
            })
        };

        if let Some(hit) = self
            .cache
            .get(Keyspace::Event, ticker.as_str())
            .await
            .and_then(read_cached)
        {
            return hit;
        }

        let _flight = self.cache.begin_flight(Keyspace::Event, ticker.as_str()).await;
        if let Some(hit) = self
            .cache
            .get(Keyspace::Event, ticker.as_str())
            .await
            .and_then(read_cached)
        {
            return hit;
        }

        let generation = self.cache.generation(Keyspace::Event);
        match self
            .event_guard
            .call(budget, |deadline| {
                self.events.get_events(ticker, loan_days, deadline)
            })
            .await
        {
            Ok(events) => {
                let risk = max_event_risk_within(&events, today, loan_days);
                self.cache.write_through(
                    Keyspace::Event,
                    ticker.as_str(),
                    CachedValue::Events(events),
                    generation,
                );
                SourcedSignal {
                    value: risk,
                    flag: SourceFlag::Live,
                    as_of: None,
                }
            }
            Err(error) => {
                warn!(%ticker, %error, "Event fetch failed, assuming no event risk");
                SourcedSignal {
                    value: 0,
                    flag: SourceFlag::Fallback,
                    as_of: None,
                }
            }
        }
    }
}

/// The bundle's freshness: the oldest `as_of` among sourced signals, or the
/// assembly time when every signal was substituted.
fn freshness(stamps: &[Option<DateTime<Utc>>]) -> DateTime<Utc> {
    stamps
        .iter()
        .flatten()
        .min()
        .copied()
        .unwrap_or_else(Utc::now)
}
