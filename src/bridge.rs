//! Bridging driver futures onto the shared runtime
//!
//! Driver calls return boxed futures of their own. [`FutureBridge`] spawns
//! them on the runtime captured by the session, so completion callbacks never
//! run on a caller's thread and registering interest never blocks. Failures
//! come back unwrapped to their root cause.

use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinHandle};

use crate::error::{CqlError, DriverError, Result};

/// Spawns driver futures and continuations on a shared worker pool
#[derive(Debug, Clone)]
pub struct FutureBridge {
    handle: Handle,
}

impl FutureBridge {
    /// Create a bridge over a runtime handle
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Create a bridge over the runtime of the calling task
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| CqlError::invalid_state(format!("no runtime available: {}", e)))
    }

    /// The runtime handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Move a driver future onto the worker pool
    pub fn bridge<T>(&self, native: BoxFuture<'static, Result<T, DriverError>>) -> BridgedFuture<T>
    where
        T: Send + 'static,
    {
        BridgedFuture {
            join: self.handle.spawn(native),
        }
    }

    /// Spawn a continuation on the worker pool
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Wait for `future` from a thread outside the runtime, bounded by `timeout`
    ///
    /// On timeout the work keeps running in the background and
    /// [`CqlError::Timeout`] is returned. Calling this from a worker thread of
    /// a current-thread runtime blocks that runtime until the timeout.
    pub fn block_on_timeout<T, F>(&self, future: F, timeout: Duration) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.handle.spawn(async move {
            let _ = tx.send(future.await);
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(CqlError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(CqlError::Cancelled),
        }
    }
}

/// A driver future running on the worker pool
///
/// Dropping it detaches the work; [`cancel`](BridgedFuture::cancel) aborts it
/// and drops the driver future.
#[derive(Debug)]
pub struct BridgedFuture<T> {
    join: JoinHandle<Result<T, DriverError>>,
}

impl<T> BridgedFuture<T> {
    /// Abort the underlying driver future
    pub fn cancel(&self) {
        self.join.abort();
    }

    /// A handle that can abort the work from elsewhere
    pub fn abort_handle(&self) -> AbortHandle {
        self.join.abort_handle()
    }

    /// Whether the driver future has finished
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl<T> Future for BridgedFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.join).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(value))) => Poll::Ready(Ok(value)),
            Poll::Ready(Ok(Err(error))) => Poll::Ready(Err(error.into())),
            Poll::Ready(Err(join_error)) if join_error.is_cancelled() => {
                Poll::Ready(Err(CqlError::Cancelled))
            }
            Poll::Ready(Err(join_error)) => Poll::Ready(Err(CqlError::Driver(
                DriverError::Internal(format!("driver task failed: {}", join_error)),
            ))),
        }
    }
}
