//! Cancellation context passed through cache fetches, builds and queries.
//!
//! A `Context` bundles three things: a cancellation token, an optional
//! deadline, and the tracing span that work done on the caller's behalf should
//! log under. Blocking code polls it with [`Context::check`]; async code waits
//! on [`Context::done`].

use crate::error::SymbolsError;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    span: tracing::Span,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            span: tracing::Span::current(),
        }
    }

    /// Replace the span carried by this context.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Derive a context that ends at `now + timeout` or when `self` ends,
    /// whichever comes first.
    ///
    /// A timeout too large to represent as an instant adds no deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = match (self.deadline, Instant::now().checked_add(timeout)) {
            (Some(existing), Some(candidate)) => Some(existing.min(candidate)),
            (existing, candidate) => existing.or(candidate),
        };
        Self {
            token: self.token.child_token(),
            deadline,
            span: self.span.clone(),
        }
    }

    /// Derive a context bounded only by `timeout`.
    ///
    /// Cancelling `self`, or `self` reaching its deadline, does not end the
    /// derived context. Only the span is inherited.
    pub fn isolated_with_timeout(&self, timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Instant::now().checked_add(timeout),
            span: self.span.clone(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Why this context ended, or `None` while it is still live.
    pub fn err(&self) -> Option<SymbolsError> {
        if self.token.is_cancelled() {
            return Some(SymbolsError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(SymbolsError::DeadlineExceeded),
            _ => None,
        }
    }

    /// `Err` once the context has ended. For polling in blocking loops.
    pub fn check(&self) -> crate::Result<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                let deadline = tokio::time::Instant::from_std(deadline);
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Error to report after [`Context::done`] resolved.
    pub(crate) fn done_err(&self) -> SymbolsError {
        self.err().unwrap_or(SymbolsError::Cancelled)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
