//! Unified error type for fare-radar.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
