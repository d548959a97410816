//! Cooperative cancellation for executing commands.
//!
//! A [`CancellationToken`] is handed to every [`Command::execute`] call. The
//! processor cancels it when it is stopped or dropped. Cancellation is never
//! preemptive: a command observes it by polling [`is_cancelled`], by calling
//! [`check`] at a convenient point, or by racing its work against
//! [`cancelled`].
//!
//! [`Command::execute`]: crate::command::Command::execute
//! [`is_cancelled`]: CancellationToken::is_cancelled
//! [`check`]: CancellationToken::check
//! [`cancelled`]: CancellationToken::cancelled

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::command::CommandError;

struct TokenState {
    flag: AtomicBool,
    notify: Notify,
}

/// Token that signals cancellation to cooperative async work.
///
/// Cloning a token creates another handle to the same flag. Calling
/// [`cancel`](Self::cancel) on any clone affects all of them.
#[derive(Clone)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Creates a new token that is not cancelled.
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokenState {
                flag: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signals cancellation and wakes every task awaiting [`cancelled`](Self::cancelled).
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        if !self.state.flag.swap(true, Ordering::AcqRel) {
            self.state.notify.notify_waiters();
        }
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.state.flag.load(Ordering::Acquire)
    }

    /// Returns `Err(CommandError::Cancelled)` once cancelled, so execution can
    /// bail out with `?`.
    pub fn check(&self) -> Result<(), CommandError> {
        if self.is_cancelled() {
            Err(CommandError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the token is cancelled. Returns immediately if it
    /// already is.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            // Register interest before re-checking the flag so a cancel()
            // racing this call cannot be missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
