use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::{
    config::KernelConfig,
    data::{
        breakdown::FeeBreakdown,
        domain::{MAX_EVENT_RISK, TransactionFeeType},
        signal::SourceFlags,
    },
    error::DomainError,
};

// ================================================================================================
// Rounding
// ================================================================================================

/// Rounds a monetary amount exactly once to the configured scale using
/// banker's rounding, then pads to that scale so every component renders
/// with the same number of decimal places.
pub fn round_money(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(scale);
    rounded
}

// ================================================================================================
// Rate Adjustment
// ================================================================================================

/// Adjusts the raw venue rate for volatility and event risk, then applies
/// the effective minimum rate floor.
///
/// `adjusted = base_rate × (1 + vol_index × vol_factor + event_risk ×
/// event_factor)`, floored at `effective_min_rate`. The adjusted rate is
/// deliberately not rounded; only monetary components are.
pub fn adjust_borrow_rate(
    config: &KernelConfig,
    base_rate: Decimal,
    volatility_index: Decimal,
    event_risk_factor: u8,
    effective_min_rate: Decimal,
) -> Result<Decimal, DomainError> {
    if base_rate.is_sign_negative() {
        return Err(DomainError::NegativeRate(base_rate));
    }
    if volatility_index.is_sign_negative() {
        return Err(DomainError::NegativeVolatility(volatility_index));
    }
    if event_risk_factor > MAX_EVENT_RISK {
        return Err(DomainError::EventRiskOutOfRange(event_risk_factor));
    }

    let multiplier = Decimal::ONE
        + checked_mul(volatility_index, config.vol_factor)?
        + checked_mul(Decimal::from(event_risk_factor), config.event_factor)?;
    let adjusted = checked_mul(base_rate, multiplier)?;

    Ok(adjusted.max(effective_min_rate))
}

/// The binding borrow rate floor: the system-wide minimum, raised by the
/// broker override and the per-ticker floor where present. Floors only ever
/// raise each other.
pub fn effective_minimum_rate(
    global_min_rate: Decimal,
    broker_override: Option<Decimal>,
    ticker_floor: Option<Decimal>,
) -> Decimal {
    let mut floor = global_min_rate;
    if let Some(broker) = broker_override {
        floor = floor.max(broker);
    }
    if let Some(ticker) = ticker_floor {
        floor = floor.max(ticker);
    }
    floor
}

// ================================================================================================
// Fee Components
// ================================================================================================

/// Time-prorated borrow cost:
/// `position_value × rate × loan_days / days_in_year`, rounded once.
pub fn compute_borrow_cost(
    config: &KernelConfig,
    position_value: Decimal,
    borrow_rate: Decimal,
    loan_days: u32,
) -> Result<Decimal, DomainError> {
    if position_value <= Decimal::ZERO {
        return Err(DomainError::NonPositivePositionValue(position_value));
    }
    if loan_days == 0 {
        return Err(DomainError::InvalidLoanDays(0));
    }
    if borrow_rate.is_sign_negative() {
        return Err(DomainError::NegativeRate(borrow_rate));
    }

    let annual = checked_mul(position_value, borrow_rate)?;
    let prorated = checked_mul(annual, Decimal::from(loan_days))?;
    let cost = prorated
        .checked_div(Decimal::from(config.days_in_year))
        .ok_or(DomainError::NumericOverflow)?;
    Ok(round_money(cost, config.scale))
}

/// Broker markup on the (already rounded) borrow cost, rounded once.
pub fn compute_markup(
    config: &KernelConfig,
    borrow_cost: Decimal,
    markup_percent: Decimal,
) -> Result<Decimal, DomainError> {
    if markup_percent.is_sign_negative() {
        return Err(DomainError::NegativeMarkup(markup_percent));
    }
    let markup = checked_mul(borrow_cost, markup_percent)?;
    Ok(round_money(markup, config.scale))
}

/// Transaction surcharge: flat amount, or a fraction of notional, rounded
/// once either way.
pub fn compute_transaction_fee(
    config: &KernelConfig,
    fee_type: TransactionFeeType,
    fee_value: Decimal,
    position_value: Decimal,
) -> Result<Decimal, DomainError> {
    if fee_value.is_sign_negative() {
        return Err(DomainError::NegativeTransactionFee(fee_value));
    }
    let fee = match fee_type {
        TransactionFeeType::Flat => fee_value,
        TransactionFeeType::Percentage => checked_mul(position_value, fee_value)?,
    };
    Ok(round_money(fee, config.scale))
}

// ================================================================================================
// Assembly
// ================================================================================================

/// Computes every component and sums the rounded parts into the total, so
/// `total_fee == borrow_cost + markup_amount + transaction_fee` holds
/// byte-exactly.
#[allow(clippy::too_many_arguments)]
pub fn assemble_breakdown(
    config: &KernelConfig,
    position_value: Decimal,
    loan_days: u32,
    adjusted_rate: Decimal,
    markup_percent: Decimal,
    fee_type: TransactionFeeType,
    fee_value: Decimal,
    data_sources: SourceFlags,
    calculated_at: DateTime<Utc>,
) -> Result<FeeBreakdown, DomainError> {
    let borrow_cost = compute_borrow_cost(config, position_value, adjusted_rate, loan_days)?;
    let markup_amount = compute_markup(config, borrow_cost, markup_percent)?;
    let transaction_fee = compute_transaction_fee(config, fee_type, fee_value, position_value)?;

    let total_fee = borrow_cost + markup_amount + transaction_fee;
    let time_factor = Decimal::from(loan_days) / Decimal::from(config.days_in_year);

    Ok(FeeBreakdown {
        borrow_rate_used: adjusted_rate,
        time_factor,
        borrow_cost,
        markup_amount,
        transaction_fee,
        total_fee,
        currency: config.currency.clone(),
        data_sources,
        calculated_at,
    })
}

fn checked_mul(lhs: Decimal, rhs: Decimal) -> Result<Decimal, DomainError> {
    lhs.checked_mul(rhs).ok_or(DomainError::NumericOverflow)
}
