use std::sync::Arc;

use thiserror::Error;

use crate::esplora::FetchError;
use crate::types::EntityRef;

pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised while unifying, loading or fetching graph data.
///
/// Cloneable: a cell or a shared fetch hands the same failure to every waiter.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("conflicting value for {entity}.{field}")]
    Conflict {
        entity: EntityRef,
        field: &'static str,
    },
    #[error("{entity}.{field} may not regress")]
    MonotonicityViolation {
        entity: EntityRef,
        field: &'static str,
    },
    #[error("{entity}.{field} has {len} members but the count is {count}")]
    OversizedCollection {
        entity: EntityRef,
        field: &'static str,
        count: usize,
        len: usize,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },
    #[error("{entity}.{field} is not resolved")]
    Unresolved {
        entity: EntityRef,
        field: &'static str,
    },
    #[error("history fetch for {address} made no progress")]
    Stalled { address: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("store error: {0}")]
    Store(Arc<StoreError>),
}

impl GraphError {
    pub(crate) fn not_found(what: &'static str, key: impl ToString) -> Self {
        GraphError::NotFound {
            what,
            key: key.to_string(),
        }
    }

    /// Whether this error is a local data-integrity violation.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            GraphError::Conflict { .. }
                | GraphError::MonotonicityViolation { .. }
                | GraphError::OversizedCollection { .. }
        )
    }
}

/// Failures of the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("malformed response body for {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unrecognised request path: {0}")]
    UnknownPath(String),
}

impl From<StoreError> for GraphError {
    fn from(err: StoreError) -> Self {
        GraphError::Store(Arc::new(err))
    }
}

impl From<rusqlite::Error> for GraphError {
    fn from(err: rusqlite::Error) -> Self {
        GraphError::Store(Arc::new(StoreError::Sqlite(err)))
    }
}
