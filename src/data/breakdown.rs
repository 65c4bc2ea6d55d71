use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    data::domain::{BorrowStatus, ClientId, Ticker},
    data::signal::{SourceFlag, SourceFlags},
    error::DomainError,
};

// ================================================================================================
// Request
// ================================================================================================

/// One locate fee calculation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeRequest {
    pub ticker: Ticker,

    /// Notional value of the short position, in the engine's currency.
    pub position_value: Decimal,

    /// Loan tenor in calendar days.
    pub loan_days: u32,

    pub client_id: ClientId,
}

impl FeeRequest {
    /// Checks the declared input domains before any I/O is spent.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.position_value <= Decimal::ZERO {
            return Err(DomainError::NonPositivePositionValue(self.position_value));
        }
        if self.loan_days == 0 {
            return Err(DomainError::InvalidLoanDays(0));
        }
        if self.client_id.as_str().is_empty() {
            return Err(DomainError::EmptyClientId);
        }
        Ok(())
    }
}

// ================================================================================================
// Breakdown
// ================================================================================================

/// The priced result of one calculation.
///
/// Every monetary component is rounded exactly once to the configured scale
/// with banker's rounding, and `total_fee` is the plain sum of the three
/// rounded components, so additivity holds byte-exactly. Field order is the
/// canonical serialization order; reordering fields changes audit hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Adjusted, floored annualized rate the cost was computed from.
    pub borrow_rate_used: Decimal,

    /// `loan_days / days_in_year`, unrounded.
    pub time_factor: Decimal,

    pub borrow_cost: Decimal,

    pub markup_amount: Decimal,

    pub transaction_fee: Decimal,

    pub total_fee: Decimal,

    pub currency: String,

    pub data_sources: SourceFlags,

    /// Derived from the signal bundle's freshness, not the wall clock, so
    /// identical inputs and signals reproduce identical bytes.
    pub calculated_at: DateTime<Utc>,
}

// ================================================================================================
// Borrow Quote
// ================================================================================================

/// Response shape of the standalone borrow rate lookup. Only the borrow
/// signal feeds it, so provenance is a single flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorrowQuote {
    pub current_rate: Decimal,
    pub status: BorrowStatus,
    pub source_flags: SourceFlag,
    pub as_of: DateTime<Utc>,
}
