use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use strum_macros::EnumString;

use crate::{error::DomainError, impl_opaque_string};

// ================================================================================================
// Domain Strong Types (NewTypes)
// ================================================================================================

/// Upper bound of the corporate event risk scale.
pub const MAX_EVENT_RISK: u8 = 10;

/// A validated security symbol.
///
/// Symbols are opaque uppercase strings of 1 to 10 characters. Construction
/// normalizes ASCII case, so `Ticker::new("aapl")` and `Ticker::new("AAPL")`
/// address the same cache keyspace entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ticker(String);

impl Ticker {
    /// Validates and normalizes a raw symbol.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidTicker`] when the symbol is empty,
    /// longer than 10 characters, or contains anything outside
    /// `A-Z`, `0-9`, `.` and `-`.
    pub fn new(raw: &str) -> Result<Self, DomainError> {
        let symbol = raw.trim().to_ascii_uppercase();
        let valid_charset = symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-');
        if symbol.is_empty() || symbol.len() > 10 || !valid_charset {
            return Err(DomainError::InvalidTicker(raw.to_string()));
        }
        Ok(Self(symbol))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Ticker {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// An opaque broker client identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub String);
impl_opaque_string!(ClientId);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ================================================================================================
// Enums
// ================================================================================================

/// How hard a security currently is to borrow.
///
/// The status arrives with every SecLend quote. When the lending venue is
/// unreachable the engine assumes [`BorrowStatus::Hard`], the conservative
/// reading.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum BorrowStatus {
    Easy,
    Medium,
    Hard,
}

/// Shape of the broker's per-transaction surcharge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionFeeType {
    /// A fixed amount per calculation, independent of notional.
    Flat,
    /// A fraction of the position value.
    Percentage,
}

// ================================================================================================
// Broker Configuration
// ================================================================================================

/// Commercial terms of one brokerage client.
///
/// Stored externally, read almost-only, cached with a long TTL and
/// invalidated on administrative change. At most one active config exists
/// per client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub client_id: ClientId,

    /// Uplift applied to the borrow cost, e.g. `0.05` for 5 %.
    pub markup_percent: Decimal,

    pub transaction_fee_type: TransactionFeeType,

    /// Flat amount or fraction of notional, depending on the fee type.
    pub transaction_fee_value: Decimal,

    /// Broker-negotiated borrow rate floor. Can only raise the effective
    /// minimum, never lower it.
    pub min_rate_override: Option<Decimal>,

    pub rate_limit_tier: u8,

    pub active: bool,
}

impl BrokerConfig {
    /// Rejects commercially nonsensical terms before they reach the kernel.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.client_id.as_str().is_empty() {
            return Err(DomainError::EmptyClientId);
        }
        if self.markup_percent.is_sign_negative() {
            return Err(DomainError::NegativeMarkup(self.markup_percent));
        }
        if self.transaction_fee_value.is_sign_negative() {
            return Err(DomainError::NegativeTransactionFee(
                self.transaction_fee_value,
            ));
        }
        if let Some(floor) = self.min_rate_override
            && floor.is_sign_negative()
        {
            return Err(DomainError::NegativeRate(floor));
        }
        Ok(())
    }
}

// ================================================================================================
// Corporate Events
// ================================================================================================

/// A scheduled corporate event with its assessed short-sale risk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorporateEvent {
    /// Event class as reported by the provider, e.g. "EARNINGS" or "SPLIT".
    #[serde(rename = "type")]
    pub kind: String,

    pub event_date: NaiveDate,

    /// Risk on the 0..=10 scale; 10 is the riskiest.
    pub risk_factor: u8,
}

impl CorporateEvent {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.risk_factor > MAX_EVENT_RISK {
            return Err(DomainError::EventRiskOutOfRange(self.risk_factor));
        }
        Ok(())
    }
}
