//! Crate-level error type
//!
//! Each module owns a focused error enum; [`Error`] wraps them for callers
//! that assemble and drive a whole gateway.

use thiserror::Error;

use crate::config::ConfigError;
use crate::connection::ConnectionError;
use crate::endpoint::EndpointError;
use crate::media::ResourceError;
use crate::naming::NamingError;
use crate::pool::PoolError;
use crate::provider::ProviderError;
use crate::signal::SignalError;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Logging setup failed: {reason}")]
    Logging { reason: String },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl Error {
    pub fn logging(reason: impl Into<String>) -> Self {
        Self::Logging { reason: reason.into() }
    }
}
