//! Per-tick and cumulative dispatch diagnostics.

use std::time::Duration;

use serde::Serialize;
use tempo_command::priority::Priority;

/// What happened to one dequeued command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DispatchOutcome {
    /// Executed and returned `Ok`; `on_complete` was invoked.
    Completed,
    /// Executed and returned `Err`; `on_failed` was invoked.
    Failed { error: String },
    /// Admission check returned `false`; nothing was invoked.
    Skipped,
}

/// One dequeued command within a tick, in dispatch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchRecord {
    pub name: String,
    pub priority: Priority,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
    /// Whether the body panicked. The outcome is then `Failed`.
    pub panicked: bool,
    /// Whether the outcome callback panicked.
    pub callback_fault: bool,
}

impl DispatchRecord {
    /// Whether the command was actually executed.
    pub fn was_executed(&self) -> bool {
        !matches!(self.outcome, DispatchOutcome::Skipped)
    }
}

// ---------------------------------------------------------------------------
// TickReport
// ---------------------------------------------------------------------------

/// Summary of one [`CommandProcessor::tick`](crate::processor::CommandProcessor::tick).
///
/// `dispatched` counts executed commands (completed + failed). Skipped
/// commands were dequeued and dropped without execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// Tick number, starting at 1. Counts every tick delivered to the
    /// processor, including idle ones.
    pub tick: u64,
    /// `false` if the processor was stopped (or already ticking) and did nothing.
    pub ran: bool,
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Bodies that panicked; also counted in `failed`.
    pub panics: usize,
    /// Callbacks that panicked and were contained.
    pub callback_faults: usize,
    /// Commands still queued when the tick returned.
    pub remaining: usize,
    /// Wall-clock time spent in the tick.
    pub elapsed: Duration,
    /// Every dequeued command, in order.
    pub records: Vec<DispatchRecord>,
}

impl TickReport {
    pub(crate) fn idle(tick: u64, remaining: usize) -> Self {
        Self {
            tick,
            remaining,
            ..Default::default()
        }
    }

    /// Names of executed commands, in dispatch order.
    pub fn executed_names(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.was_executed())
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Names of commands dropped by their admission check.
    pub fn skipped_names(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| !r.was_executed())
            .map(|r| r.name.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ProcessorStats
// ---------------------------------------------------------------------------

/// Totals accumulated over the processor's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    /// Ticks that drained the queue (processor running).
    pub ticks_run: u64,
    /// Ticks ignored because the processor was stopped or busy.
    pub idle_ticks: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub panics: u64,
    pub callback_faults: u64,
}

impl ProcessorStats {
    pub(crate) fn absorb(&mut self, report: &TickReport) {
        if !report.ran {
            self.idle_ticks += 1;
            return;
        }
        self.ticks_run += 1;
        self.dispatched += report.dispatched as u64;
        self.completed += report.completed as u64;
        self.failed += report.failed as u64;
        self.skipped += report.skipped as u64;
        self.panics += report.panics as u64;
        self.callback_faults += report.callback_faults as u64;
    }
}
