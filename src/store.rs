use std::{sync::Arc, time::Duration};

use actix_web::{error::BlockingError, web};
use chrono::{DateTime, Utc};

use crate::{
    database::DatabaseError,
    models::{FeedbackFilter, NewFeedback, RawFeedback, Status},
};

/// Feedback collection. Implementations block, callers go through [`call`].
pub trait FeedbackStore: Send + Sync {
    /// Records matching `filter`, in no particular order.
    fn query(&self, filter: &FeedbackFilter) -> Result<Vec<RawFeedback>, DatabaseError>;

    fn find(&self, id: &str) -> Result<Option<RawFeedback>, DatabaseError>;

    /// Stores a new pending record with a server-assigned timestamp.
    fn insert(&self, feedback: NewFeedback) -> Result<RawFeedback, DatabaseError>;

    /// Returns `false` when no record has this id, or when `expected` is
    /// given and the record's current status differs from it.
    fn set_status(
        &self,
        id: &str,
        status: Status,
        expected: Option<Status>,
        moderator: &str,
        when: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    fn ping(&self) -> Result<(), DatabaseError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("store call was canceled")]
    Canceled(#[from] BlockingError),
}

/// Runs `f` against the store on the blocking pool, bounded by `timeout`.
/// A call that times out is abandoned.
pub async fn call<T, F>(
    store: &Arc<dyn FeedbackStore>,
    timeout: Duration,
    f: F,
) -> Result<T, StoreError>
where
    F: FnOnce(&dyn FeedbackStore) -> Result<T, DatabaseError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    let task = web::block(move || f(store.as_ref()));

    match tokio::time::timeout(timeout, task).await {
        Ok(result) => Ok(result??),
        Err(_) => {
            tracing::error!(?timeout, "feedback store timed out");
            Err(StoreError::Timeout(timeout))
        }
    }
}
