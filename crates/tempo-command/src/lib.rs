//! Tempo Command -- deferred, prioritized units of work.
//!
//! This crate defines what the scheduler runs and where it waits:
//!
//! - [`Command`](command::Command): the four-capability contract (admission
//!   check, cancellable async body, completion and failure callbacks).
//! - [`Priority`](priority::Priority): ordinal priority with five named bands.
//!   Lower values run first.
//! - [`CommandQueue`](queue::CommandQueue): passive storage that yields
//!   commands in priority-then-FIFO order, plus a thread-safe
//!   [`SharedCommandQueue`](queue::SharedCommandQueue) handle for producers.
//! - [`CancellationToken`](cancel::CancellationToken): cooperative
//!   cancellation passed into every execution.
//!
//! Execution itself lives in the `tempo-scheduler` crate.
//!
//! # Quick Start
//!
//! ```
//! use tempo_command::prelude::*;
//!
//! let queue = SharedCommandQueue::new();
//! queue.enqueue(FnCommand::new("submit_guess", Priority::NORMAL));
//! queue.enqueue(FnCommand::new("save", Priority::CRITICAL));
//!
//! assert_eq!(queue.total_commands_count(), 2);
//! assert_eq!(queue.peek_name().as_deref(), Some("save"));
//! ```

#![deny(unsafe_code)]

pub mod cancel;
pub mod command;
pub mod priority;
pub mod queue;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::cancel::CancellationToken;
    pub use crate::command::{Command, CommandError, ExecuteFuture, FnCommand};
    pub use crate::priority::{Priority, PriorityBand};
    pub use crate::queue::{CommandQueue, QueueError, QueuedCommandInfo, SharedCommandQueue};
}

/// Re-exported so implementors can write `#[tempo_command::async_trait]`
/// without a direct dependency.
pub use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
