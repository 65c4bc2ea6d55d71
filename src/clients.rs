pub mod event;
pub mod http;
pub mod market;
pub mod sec_lend;

pub use event::{EventApi, EventClient};
pub use market::{MarketApi, MarketClient};
pub use sec_lend::{SecLendApi, SecLendClient};
