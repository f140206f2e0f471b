//! Fleet supervisor core.
//!
//! Drives a fleet of compute-marketplace work nodes through their
//! lifecycle: per-node state machine, marketplace action layer, pricing,
//! descriptor building, config management, and the supervisor that ties
//! them together.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{Fleet, WorkNode};
pub use domain::{ConfigError, FleetError, MarketError, NodeTag, PricingError, State, WorkNodeState};
pub use infrastructure::{BaseConfig, ConfigManager, ConfigSnapshot, MarketApi, ShutdownManager, TaskConfig};
