pub mod tw_market;

pub use tw_market::{resolve_as_of_date, TradingCalendar};
