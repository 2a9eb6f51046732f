//! Error types for towerqa

use thiserror::Error;

/// Result type alias using the towerqa common Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading configuration or evaluating oracles
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid environment variable {name}: {reason}")]
    InvalidEnv { name: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
