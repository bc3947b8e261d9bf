use crate::error::BoxError;
use async_trait::async_trait;
use std::future::Future;

/// Undo work after a scope failed (or, for allocations with
/// `rollback_on_success`, after a normal exit).
#[async_trait]
pub trait Rollback: Send + Sync {
    async fn rollback(&self) -> Result<(), BoxError>;
}

/// Rollback that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRollback;

#[async_trait]
impl Rollback for NoRollback {
    async fn rollback(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Adapts an async closure into a [`Rollback`].
///
/// ```rust
/// use restrack::scope::{Rollback, RollbackFn};
/// use restrack::BoxError;
///
/// # async fn demo() {
/// let cleaner = RollbackFn::new(|| async { Ok::<(), BoxError>(()) });
/// assert!(cleaner.rollback().await.is_ok());
/// # }
/// ```
pub struct RollbackFn<F>(F);

impl<F> RollbackFn<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Rollback for RollbackFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    async fn rollback(&self) -> Result<(), BoxError> {
        (self.0)().await
    }
}
