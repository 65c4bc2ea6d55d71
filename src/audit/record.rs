use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::{
    breakdown::{FeeBreakdown, FeeRequest},
    domain::{ClientId, Ticker},
    signal::SignalBundle,
};

/// The caller-supplied numbers a record must reproduce the fee from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditInputs {
    pub position_value: Decimal,
    pub loan_days: u32,
}

/// What the calculation produced: a priced breakdown, or the reason it was
/// refused. Failures are audited with the offending inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Priced(FeeBreakdown),
    Failed { reason: String },
}

/// One append-only audit record.
///
/// `hash` covers the canonical serialization of every other field, including
/// `prev_hash`, chaining records per client partition. Field order is the
/// canonical order; reordering fields invalidates existing chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub client_id: ClientId,
    pub ticker: Ticker,
    pub inputs: AuditInputs,
    pub outcome: AuditOutcome,
    /// Snapshot of the signals the price was derived from; absent when the
    /// calculation failed before signals were assembled or was served from
    /// the calculation cache.
    pub signals: Option<SignalBundle>,
    pub prev_hash: String,
    pub hash: String,
    pub emitted_at: DateTime<Utc>,
}

/// A record before it is threaded onto its partition's hash chain. Drafts
/// are what calculations enqueue; the emitter worker owns the chain state
/// and seals them in completion order.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub id: String,
    pub client_id: ClientId,
    pub ticker: Ticker,
    pub inputs: AuditInputs,
    pub outcome: AuditOutcome,
    pub signals: Option<SignalBundle>,
    pub emitted_at: DateTime<Utc>,
}

impl AuditDraft {
    pub fn new(request: &FeeRequest, outcome: AuditOutcome, signals: Option<SignalBundle>) -> Self {
        Self {
            id: format!("{:032x}", rand::random::<u128>()),
            client_id: request.client_id.clone(),
            ticker: request.ticker.clone(),
            inputs: AuditInputs {
                position_value: request.position_value,
                loan_days: request.loan_days,
            },
            outcome,
            signals,
            emitted_at: Utc::now(),
        }
    }
}

/// Borrowed view of a record without its own hash, in canonical field order.
#[derive(Serialize)]
struct CanonicalRecord<'a> {
    id: &'a str,
    client_id: &'a ClientId,
    ticker: &'a Ticker,
    inputs: &'a AuditInputs,
    outcome: &'a AuditOutcome,
    signals: &'a Option<SignalBundle>,
    prev_hash: &'a str,
    emitted_at: &'a DateTime<Utc>,
}

/// The byte string the record's hash covers: canonical JSON of every field
/// except `hash` itself.
pub(crate) fn canonical_bytes(record: &AuditRecord) -> Vec<u8> {
    let canonical = CanonicalRecord {
        id: &record.id,
        client_id: &record.client_id,
        ticker: &record.ticker,
        inputs: &record.inputs,
        outcome: &record.outcome,
        signals: &record.signals,
        prev_hash: &record.prev_hash,
        emitted_at: &record.emitted_at,
    };
    serde_json::to_vec(&canonical).expect("audit record serialization is infallible")
}
