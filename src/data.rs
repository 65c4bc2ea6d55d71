pub mod breakdown;
pub mod domain;
pub mod signal;

pub use breakdown::{BorrowQuote, FeeBreakdown, FeeRequest};
pub use domain::{
    BorrowStatus, BrokerConfig, ClientId, CorporateEvent, MAX_EVENT_RISK, Ticker,
    TransactionFeeType,
};
pub use signal::{BorrowSignal, SignalBundle, SourceFlag, SourceFlags, VolatilitySignal};
