pub mod fingerprint;
pub mod formula;

pub use fingerprint::calc_fingerprint;
pub use formula::{
    adjust_borrow_rate, assemble_breakdown, compute_borrow_cost, compute_markup,
    compute_transaction_fee, effective_minimum_rate, round_money,
};
