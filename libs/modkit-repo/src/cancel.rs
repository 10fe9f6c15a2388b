//! Cooperative cancellation for repository futures.
//!
//! Dropping a future already cancels it; this adapter is for callers that
//! propagate a [`CancellationToken`] instead.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{RepoError, RepoResult};

pub trait Cancellable<T>: Future<Output = RepoResult<T>> + Sized {
    /// Resolve to [`RepoError::Cancelled`] if `token` fires before the future completes.
    ///
    /// ```ignore
    /// let rows = repo
    ///     .get_all(&QueryConfig::default())
    ///     .with_cancellation(&token)
    ///     .await?;
    /// ```
    fn with_cancellation(
        self,
        token: &CancellationToken,
    ) -> impl Future<Output = RepoResult<T>> + Send
    where
        Self: Send,
        T: Send,
    {
        let token = token.clone();
        async move {
            tokio::select! {
                biased;
                () = token.cancelled() => Err(RepoError::Cancelled),
                res = self => res,
            }
        }
    }
}

impl<T, F> Cancellable<T> for F where F: Future<Output = RepoResult<T>> {}
