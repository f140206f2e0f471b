pub mod config;
pub mod descriptor;
pub mod logging;
pub mod market;
pub mod pricing;
pub mod shutdown;

pub use config::{BaseConfig, ConfigManager, ConfigSnapshot, TaskConfig};
pub use logging::{init_tracing, init_tracing_with_level};
pub use market::{HttpMarketApi, MarketApi, MockMarketApi};
pub use shutdown::ShutdownManager;
