//! Error types for the core library.

use thiserror::Error;

/// Inbound topic did not match the topic grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicParseError {
    #[error("empty topic")]
    Empty,

    #[error("unknown topic category {0:?}")]
    UnknownCategory(String),

    #[error("topic {0:?} has no device id segment")]
    MissingId(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
