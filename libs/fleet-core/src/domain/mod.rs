pub mod errors;
pub mod models;

pub use errors::{ConfigError, ConfigResult, FleetError, MarketError, MarketResult, PricingError};
pub use models::{Id, NodeTag, PriceHuman, State, WorkNodeState};
