use std::io;

use thiserror::Error;

use crate::runtime::RuntimeError;
use crate::topology::ValidationError;

/// Configuration surface errors, fatal at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("option {option} must be a positive integer")]
    NotPositive { option: String },
}

/// Top-level application errors unifying all layer errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("topology error: {0}")]
    Topology(#[from] ValidationError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}
