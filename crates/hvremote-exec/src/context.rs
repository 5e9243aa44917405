//! Cancellation and deadlines for remote operations

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ExecError;

/// Per-operation context: an optional deadline plus a cancellation token
///
/// Cloning shares the token, so cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    deadline: Option<(Instant, Duration)>,
    cancel: CancellationToken,
}

impl ExecContext {
    /// Context without deadline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that expires `timeout` from now
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().timeout(timeout)
    }

    /// Set the deadline to `timeout` from now
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some((Instant::now() + timeout, timeout));
        self
    }

    /// Use an existing cancellation token
    #[must_use]
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Child context cancelled with this one but cancellable on its own
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    /// Context bounded by `timeout` unless a deadline is already set
    #[must_use]
    pub fn or_timeout(&self, timeout: Duration) -> Self {
        if self.deadline.is_some() {
            self.clone()
        } else {
            self.clone().timeout(timeout)
        }
    }

    /// Cancel every operation running under this context
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the context was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the deadline
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|(at, _)| at.saturating_duration_since(Instant::now()))
    }

    /// Drive `fut` unless the context is cancelled or its deadline passes
    ///
    /// On cancellation or timeout `fut` is dropped, releasing whatever it
    /// holds.
    ///
    /// # Errors
    /// Returns `ExecError::Cancelled`, `ExecError::Timeout` or the error of `fut`
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ExecError>
    where
        F: Future<Output = Result<T, ExecError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        let bounded = async {
            match self.deadline {
                Some((at, timeout)) => tokio::time::timeout_at(at, fut)
                    .await
                    .map_err(|_| ExecError::Timeout { timeout })?,
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ExecError::Cancelled),
            result = bounded => result,
        }
    }
}
