//! Errors surfaced by the query runtime to its callers.

use arda_core::{ArdaError, FetchError, QueryKey};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// Retries exhausted. The entry keeps its last known data.
    #[error("Query {key} failed: {error}")]
    Fetch { key: QueryKey, error: FetchError },

    #[error("Cached value for {key} does not match the requested type: {reason}")]
    Decode { key: QueryKey, reason: String },

    #[error("Value for {key} could not be serialized: {reason}")]
    Serialize { key: QueryKey, reason: String },

    #[error("No mutation registered for {key}")]
    MutationNotRegistered { key: QueryKey },

    #[error("Mutation {key} failed: {error}")]
    Mutation { key: QueryKey, error: FetchError },
}

impl QueryError {
    /// The underlying fetch failure, if this error came from a fetcher.
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            QueryError::Fetch { error, .. } | QueryError::Mutation { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<QueryError> for ArdaError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Fetch { error, .. } | QueryError::Mutation { error, .. } => {
                ArdaError::Fetch(error)
            }
            other => ArdaError::Fetch(FetchError::decode(other.to_string())),
        }
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
