use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::ContextError;

/// Cancellation and deadline signal carried by a [`Request`](crate::Request).
///
/// The background context never completes. Cancellation takes precedence over
/// an elapsed deadline when both have fired.
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancellation: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Context {
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancellation: Some(token),
            deadline: None,
        }
    }

    /// Keeps the earlier of the existing deadline and `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation_token(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn err(&self) -> Option<ContextError> {
        if self
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline elapses.
    pub async fn done(&self) -> ContextError {
        match (&self.cancellation, self.deadline) {
            (Some(token), Some(deadline)) => {
                tokio::select! {
                    _ = token.cancelled() => ContextError::Canceled,
                    _ = sleep_until(deadline) => {
                        self.err().unwrap_or(ContextError::DeadlineExceeded)
                    }
                }
            }
            (Some(token), None) => {
                token.cancelled().await;
                ContextError::Canceled
            }
            (None, Some(deadline)) => {
                sleep_until(deadline).await;
                ContextError::DeadlineExceeded
            }
            (None, None) => std::future::pending().await,
        }
    }
}
