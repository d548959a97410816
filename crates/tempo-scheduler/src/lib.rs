//! Tempo Scheduler -- tick-driven, budgeted command execution.
//!
//! This crate builds on [`tempo_command`] to provide the scheduler: a
//! [`CommandProcessor`](processor::CommandProcessor) that, on every external
//! tick, drains at most `max_commands_per_frame` commands from a shared
//! priority queue, executes them one after another, and routes each outcome
//! to the command's completion or failure callback.
//!
//! The processor never spawns work of its own. Whoever composes the
//! application owns it, hands [`SharedCommandQueue`](tempo_command::queue::SharedCommandQueue)
//! clones to producers, and calls [`tick`](processor::CommandProcessor::tick)
//! from its frame loop (or lets a [`TickDriver`](driver::TickDriver) do it).
//!
//! # Quick Start
//!
//! ```
//! use tempo_scheduler::prelude::*;
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # rt.block_on(async {
//! let queue = SharedCommandQueue::new();
//! let processor = CommandProcessor::new(queue.clone(), ProcessorConfig::default()).unwrap();
//! processor.start();
//!
//! queue.enqueue(
//!     FnCommand::new("submit_guess", Priority::NORMAL)
//!         .with_execute(|cancel| async move { cancel.check() }),
//! );
//!
//! let report = processor.tick().await;
//! assert_eq!(report.completed, 1);
//! # });
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod driver;
pub mod fault;
pub mod processor;
pub mod report;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced when configuring the scheduler.
///
/// Command failures are not represented here: they are contained per command
/// and surface only through callbacks and [`TickReport`](report::TickReport).
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The admission budget must allow at least one command per tick.
    #[error("max_commands_per_frame must be at least 1, got {0}")]
    InvalidBudget(usize),

    /// A tick driver needs a non-zero period.
    #[error("tick period must be greater than zero")]
    InvalidPeriod,

    /// The JSON configuration could not be parsed.
    #[error("invalid processor config: {0}")]
    Config(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the command crate for convenience.
pub use tempo_command;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common scheduler usage.
pub mod prelude {
    pub use tempo_command::prelude::*;

    pub use crate::config::{ProcessorConfig, SkipPolicy, DEFAULT_MAX_COMMANDS_PER_FRAME};
    pub use crate::driver::TickDriver;
    pub use crate::fault::{CallbackFault, CallbackKind, FaultReporter, TracingFaultReporter};
    pub use crate::processor::CommandProcessor;
    pub use crate::report::{DispatchOutcome, DispatchRecord, ProcessorStats, TickReport};
    pub use crate::ProcessorError;
}
