use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed endpoint or test options. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A connection or handshake that a phase could not do without.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// A live transfer connection failed. Absorbed by the worker pool.
    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
