//! Error types for tally-rs.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum Error {
    /// The durable store rejected an append, read, removal or clear.
    /// Submissions that fail this way were not accepted.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_persistence(&self) -> bool {
        matches!(self, Error::Persistence(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
