//! Query Execution Module
//!
//! Provides the execution plumbing shared by every operator:
//! - Error types reported through the pipe tree
//! - Timeout enforcement and cooperative cancellation
//! - The worker pool that drains leaf iterations

mod pool;
mod timeout;

pub use pool::WorkerPool;
pub use timeout::{CancelHandle, QueryTimeout, TimeoutError};

use crate::collections::SpillError;

/// Errors raised while evaluating a tuple expression
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Algebra node the evaluator cannot handle
    #[error("Unsupported tuple expression: {0}")]
    Unsupported(String),

    /// Failure while evaluating a value or a leaf
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Disk-backed set or sorter failure
    #[error("Spill error: {0}")]
    Spill(#[from] SpillError),

    /// Wall-clock budget exceeded
    #[error("Query timeout: {0}")]
    Timeout(#[from] TimeoutError),

    /// Work could not be scheduled or was abandoned mid-way
    #[error("Evaluation interrupted: {0}")]
    Interrupted(String),

    /// First failure of a query, with the failures reported after it
    #[error("{error} ({} suppressed)", suppressed.len())]
    Chained {
        error: Box<QueryError>,
        suppressed: Vec<QueryError>,
    },
}

impl QueryError {
    /// The first failure, looking through a chain
    pub fn root(&self) -> &QueryError {
        match self {
            QueryError::Chained { error, .. } => error.root(),
            other => other,
        }
    }

    pub fn suppressed(&self) -> &[QueryError] {
        match self {
            QueryError::Chained { suppressed, .. } => suppressed,
            _ => &[],
        }
    }
}

/// Errors raised by value expression evaluation
#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    /// Type or semantic mismatch; operators recover from these by policy
    #[error("Type error: {0}")]
    Type(String),

    /// Anything else; always reported
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl From<ExprError> for QueryError {
    fn from(err: ExprError) -> Self {
        match err {
            ExprError::Type(msg) => QueryError::Evaluation(msg),
            ExprError::Query(e) => e,
        }
    }
}

/// Result type for execution operations
pub type QueryResult<T> = Result<T, QueryError>;
