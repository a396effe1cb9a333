//! Operation persistence seam.
//!
//! The engine records operations through this trait best-effort: write
//! failures are logged and swallowed, and the in-memory operation map
//! stays authoritative. The bundled [`NullRepository`] discards
//! everything; deployments that need durable history plug in their own.

use crate::model::Operation;
use async_trait::async_trait;
use thiserror::Error;

/// A repository write failure.
#[derive(Debug, Error)]
#[error("operation repository error: {0}")]
pub struct RepositoryError(pub String);

/// Persistent store for operation history.
#[async_trait]
pub trait OperationRepository: Send + Sync {
    /// Record a freshly registered operation.
    async fn add(&self, operation: &Operation) -> Result<(), RepositoryError>;

    /// Record an operation's latest state, inserting if unknown.
    async fn update_or_add(&self, operation: &Operation) -> Result<(), RepositoryError>;
}

/// Repository that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRepository;

#[async_trait]
impl OperationRepository for NullRepository {
    async fn add(&self, _operation: &Operation) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn update_or_add(&self, _operation: &Operation) -> Result<(), RepositoryError> {
        Ok(())
    }
}
