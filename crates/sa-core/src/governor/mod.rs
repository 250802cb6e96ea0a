//! Per-request parallelism limits for backend work.
//!
//! A single inbound RPC may fan out into several database queries. The
//! [`Governor`] bounds how many of those run at once *for one RPC*; it does
//! not limit how many RPCs the server accepts, and it is independent of the
//! connection pool size.
//!
//! The governor is configured once at startup and handed to the request
//! layer. Each RPC calls [`Governor::for_request`] to get its own
//! [`RequestLimiter`], which owns exactly `cap` tokens. A unit of backend work
//! holds one [`ParallelismToken`] for its whole duration; the token is
//! released when dropped, so success, error, panic and cancellation all give
//! it back exactly once.
//!
//! Tokens are scoped to the unit of work that acquired them. Work must not
//! wait on another RPC's limiter while holding a token.

use crate::{Error, Result};
use core::future::Future;
use futures::{StreamExt, TryStreamExt, stream};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Process-wide policy for per-request backend parallelism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Governor {
    cap: usize,
}

impl Governor {
    /// Creates a governor from the configured limit.
    ///
    /// Values below `1` are clamped to `1` rather than rejected: a request
    /// can always make progress one query at a time. Values above
    /// [`Semaphore::MAX_PERMITS`] (`usize::MAX >> 3`) are clamped down to it;
    /// every other positive value is kept as is.
    pub fn new(configured: i64) -> Self {
        let cap = usize::try_from(configured)
            .unwrap_or(0)
            .clamp(1, Semaphore::MAX_PERMITS);

        if i64::try_from(cap).ok() != Some(configured) {
            tracing::debug!(configured, effective = cap, "Parallelism limit clamped");
        }
        Self { cap }
    }

    /// The effective number of concurrent units allowed per request.
    pub const fn cap(&self) -> usize {
        self.cap
    }

    /// Creates the token set for one inbound RPC.
    pub fn for_request(&self) -> RequestLimiter {
        RequestLimiter {
            permits: Arc::new(Semaphore::new(self.cap)),
            cap: self.cap,
        }
    }
}

/// The tokens owned by a single RPC.
///
/// Cheap to clone; clones share the same tokens.
#[derive(Debug, Clone)]
pub struct RequestLimiter {
    permits: Arc<Semaphore>,
    cap: usize,
}

impl RequestLimiter {
    /// Waits until a token is free and takes it.
    ///
    /// Dropping the returned future before it resolves takes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestCancelled`] once the owning RPC has been
    /// cancelled through [`acquire_or_cancel`](Self::acquire_or_cancel).
    pub async fn acquire(&self) -> Result<ParallelismToken> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::RequestCancelled)?;
        Ok(ParallelismToken { _permit: permit })
    }

    /// Like [`acquire`](Self::acquire), but gives up as soon as `cancel` fires.
    ///
    /// Cancellation closes the limiter: every other unit of the same RPC that
    /// is still waiting, or that asks later, fails as well. Tokens already
    /// held stay valid until dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestCancelled`] if the RPC is cancelled first.
    pub async fn acquire_or_cancel(&self, cancel: &CancellationToken) -> Result<ParallelismToken> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.permits.close();
                Err(Error::RequestCancelled)
            }
            token = self.acquire() => token,
        }
    }

    /// Runs one unit of backend work while holding a token.
    pub async fn run<F, T, E>(&self, work: F) -> core::result::Result<T, E>
    where
        F: Future<Output = core::result::Result<T, E>>,
        E: From<Error>,
    {
        let _token = self.acquire().await?;
        work.await
    }

    /// Runs every unit with at most `cap` in flight, returning results in
    /// input order.
    ///
    /// Stops at the first error; units still running are dropped and their
    /// tokens released.
    pub async fn run_all<I, F, T, E>(&self, units: I) -> core::result::Result<Vec<T>, E>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = core::result::Result<T, E>>,
        E: From<Error>,
    {
        stream::iter(units.into_iter().map(|unit| self.run(unit)))
            .buffered(self.cap)
            .try_collect()
            .await
    }

    /// Tokens not currently held.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub const fn cap(&self) -> usize {
        self.cap
    }
}

/// A held unit of parallelism. Released on drop.
#[derive(Debug)]
#[must_use = "the token is released as soon as it is dropped"]
pub struct ParallelismToken {
    _permit: OwnedSemaphorePermit,
}
