//! The command contract and a closure-backed implementation.
//!
//! A [`Command`] is a deferred unit of work with four capabilities: an
//! admission check, a cancellable async body, and two mutually exclusive
//! outcome callbacks. The scheduler owns each command once it is dequeued and
//! drops it after routing the outcome, so a single instance can never have
//! both callbacks fire, or either fire twice.
//!
//! Most game code declares one type per command. For ad hoc work,
//! [`FnCommand`] assembles a command from closures:
//!
//! ```
//! use tempo_command::prelude::*;
//!
//! let save = FnCommand::new("save", Priority::CRITICAL)
//!     .with_execute(|cancel| async move {
//!         cancel.check()?;
//!         Ok(())
//!     })
//!     .with_on_failed(|err| eprintln!("save failed: {err}"));
//!
//! assert_eq!(save.name(), "save");
//! assert_eq!(save.priority(), Priority::CRITICAL);
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::priority::Priority;

// ---------------------------------------------------------------------------
// CommandError
// ---------------------------------------------------------------------------

/// Errors a command's execution can end with. Routed to
/// [`Command::on_failed`]; never escapes the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Execution observed the cancellation token and stopped early.
    #[error("command cancelled")]
    Cancelled,

    /// Domain failure with a human-readable reason.
    #[error("command failed: {0}")]
    Failed(String),

    /// The command body panicked. Set by the scheduler, which contains the
    /// unwind and carries the rendered panic payload here.
    #[error("command panicked: {0}")]
    Panicked(String),

    /// Any other error raised by the command body.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CommandError {
    /// Shorthand for [`CommandError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        CommandError::Failed(reason.into())
    }

    /// Whether this error came from cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CommandError::Cancelled)
    }

    /// Whether the command body panicked instead of returning.
    pub fn is_panic(&self) -> bool {
        matches!(self, CommandError::Panicked(_))
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A unit of deferred, asynchronously executable work.
///
/// Implementations must keep [`can_execute`](Self::can_execute) pure and
/// non-blocking, and must not panic in [`on_complete`](Self::on_complete) or
/// [`on_failed`](Self::on_failed). The scheduler contains panics from the
/// body and the callbacks but treats them as programming errors and reports
/// them loudly. A panicking body is routed to `on_failed` with
/// [`CommandError::Panicked`].
#[async_trait]
pub trait Command: Send + Sync {
    /// Stable identifier for diagnostics. Not required to be unique.
    fn name(&self) -> &str;

    /// Scheduling priority. Lower runs first.
    fn priority(&self) -> Priority;

    /// Admission check evaluated right before execution. Returning `false`
    /// drops the command without invoking either callback.
    fn can_execute(&self) -> bool {
        true
    }

    /// Perform the work. Should return promptly once `cancel` fires.
    async fn execute(&self, cancel: &CancellationToken) -> Result<(), CommandError>;

    /// Called once after [`execute`](Self::execute) returns `Ok`.
    fn on_complete(&self) {}

    /// Called once after [`execute`](Self::execute) returns `Err`.
    fn on_failed(&self, _error: &CommandError) {}
}

impl fmt::Debug for dyn Command + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name())
            .field("priority", &self.priority())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// FnCommand
// ---------------------------------------------------------------------------

/// Boxed future returned by an [`FnCommand`] body.
pub type ExecuteFuture = Pin<Box<dyn Future<Output = Result<(), CommandError>> + Send>>;

type GuardFn = Box<dyn Fn() -> bool + Send + Sync>;
type ExecuteFn = Box<dyn Fn(CancellationToken) -> ExecuteFuture + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;
type FailedFn = Box<dyn Fn(&CommandError) + Send + Sync>;

/// A [`Command`] assembled from closures.
///
/// Every piece is optional: without a guard the command is always
/// admissible, and without a body it completes immediately.
pub struct FnCommand {
    name: String,
    priority: Priority,
    guard: Option<GuardFn>,
    body: Option<ExecuteFn>,
    complete: Option<CompleteFn>,
    failed: Option<FailedFn>,
}

impl FnCommand {
    /// Create a command that does nothing and always completes.
    pub fn new(name: impl Into<String>, priority: Priority) -> Self {
        Self {
            name: name.into(),
            priority,
            guard: None,
            body: None,
            complete: None,
            failed: None,
        }
    }

    /// Set the admission check.
    pub fn with_guard<F>(mut self, guard: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Box::new(guard));
        self
    }

    /// Set the async body. The closure receives an owned clone of the
    /// cancellation token so the returned future can be `'static`.
    pub fn with_execute<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        self.body = Some(Box::new(move |cancel| Box::pin(body(cancel))));
        self
    }

    /// Set the completion callback.
    pub fn with_on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.complete = Some(Box::new(callback));
        self
    }

    /// Set the failure callback.
    pub fn with_on_failed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CommandError) + Send + Sync + 'static,
    {
        self.failed = Some(Box::new(callback));
        self
    }
}

#[async_trait]
impl Command for FnCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn can_execute(&self) -> bool {
        self.guard.as_ref().map_or(true, |guard| guard())
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), CommandError> {
        match &self.body {
            Some(body) => body(cancel.clone()).await,
            None => Ok(()),
        }
    }

    fn on_complete(&self) {
        if let Some(callback) = &self.complete {
            callback();
        }
    }

    fn on_failed(&self, error: &CommandError) {
        if let Some(callback) = &self.failed {
            callback(error);
        }
    }
}

impl fmt::Debug for FnCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCommand")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
