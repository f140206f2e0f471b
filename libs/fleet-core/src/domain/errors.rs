//! Error taxonomy. `MarketError` distinguishes transient marketplace
//! trouble (worth retrying) from logical/permanent trouble (worth
//! recording and moving on); `ConfigError` and `PricingError` are their
//! own narrow taxonomies; `FleetError` is what a failed node loop surfaces
//! to the supervisor.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("transient marketplace error: {0}")]
    Transient(String),

    #[error("logical marketplace error: {0}")]
    Logical(String),

    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl MarketError {
    pub fn is_transient(&self) -> bool {
        matches!(self, MarketError::Transient(_) | MarketError::Transport(_))
    }
}

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("no predicted price available and no max_price configured for tag {0}")]
    NoPriceAvailable(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path}: {source}")]
    YamlError {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config {path} is missing required keys: {}", .keys.join(", "))]
    MissingKeys { path: String, keys: Vec<String> },

    #[error("no Ethereum key file found under {0}")]
    NoKeyFile(String),

    #[error("task config validation failed: {0}")]
    ValidationError(String),

    #[error("duplicate node tag '{0}' across task configs")]
    DuplicateTag(String),
}

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("reconciliation failed: {0}")]
    Reconciliation(String),
}

pub type MarketResult<T> = Result<T, MarketError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
