use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::data::domain::{BorrowStatus, CorporateEvent};

// ================================================================================================
// Provenance
// ================================================================================================

/// Where a signal field came from, recorded per calculation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceFlag {
    /// Fetched from the provider for this calculation.
    Live,
    /// Served from a fresh cache entry.
    Cached,
    /// Substituted by the fallback policy after provider failure.
    Fallback,
}

/// Provenance of each field of a signal bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFlags {
    pub borrow: SourceFlag,
    pub volatility: SourceFlag,
    pub event: SourceFlag,
}

impl SourceFlags {
    /// True when no field had to be substituted by the fallback policy.
    pub fn fully_sourced(&self) -> bool {
        self.borrow != SourceFlag::Fallback
            && self.volatility != SourceFlag::Fallback
            && self.event != SourceFlag::Fallback
    }
}

// ================================================================================================
// Raw Signals
// ================================================================================================

/// One SecLend quote: annualized borrow rate plus availability status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorrowSignal {
    pub rate: Decimal,
    pub status: BorrowStatus,
    pub as_of: DateTime<Utc>,
}

/// One volatility reading, either per ticker or the market-wide VIX.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilitySignal {
    pub value: Decimal,
    pub as_of: DateTime<Utc>,
}

// ================================================================================================
// Signal Bundle
// ================================================================================================

/// The live inputs feeding one calculation, with per-field provenance.
///
/// A bundle is assembled per request and never cached as a whole; its
/// constituents are cached individually under their own keyspaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalBundle {
    /// Raw borrow rate from the lending venue, pre-adjustment.
    pub base_borrow_rate: Decimal,

    pub borrow_status: BorrowStatus,

    pub volatility_index: Decimal,

    /// Highest corporate event risk within the loan horizon, 0..=10.
    pub event_risk_factor: u8,

    /// Effective per-ticker borrow rate floor known at assembly time.
    pub min_rate: Decimal,

    /// Oldest `as_of` among the sourced signals. Calculations derive their
    /// timestamp from this so that identical bundles price identically.
    pub signal_freshness: DateTime<Utc>,

    pub source_flags: SourceFlags,
}

/// Reduces an event calendar to the single risk factor the formula consumes:
/// the maximum risk among events dated within the loan window, inclusive of
/// both ends. An empty or out-of-window calendar contributes no risk.
pub fn max_event_risk_within(events: &[CorporateEvent], today: NaiveDate, loan_days: u32) -> u8 {
    let horizon = today
        .checked_add_days(Days::new(u64::from(loan_days)))
        .unwrap_or(NaiveDate::MAX);
    events
        .iter()
        .filter(|event| event.event_date >= today && event.event_date <= horizon)
        .map(|event| event.risk_factor)
        .max()
        .unwrap_or(0)
}
