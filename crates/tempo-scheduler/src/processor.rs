//! The tick-driven command processor.
//!
//! The [`CommandProcessor`] is the only concurrency-aware piece of the
//! pipeline. On every tick delivered while it is running it:
//!
//! 1. Dequeues the next command (priority, then FIFO).
//! 2. Drops it silently if its admission check fails.
//! 3. Executes it under the current session's [`CancellationToken`] and
//!    awaits the result.
//! 4. Routes `Ok` to `on_complete` and `Err` to `on_failed`. Execution errors
//!    are contained to the command. Panics in the body or a callback are
//!    caught and reported; a panicking body fails with
//!    [`CommandError::Panicked`].
//!
//! It stops once `max_commands_per_frame` commands have been dispatched or
//! the queue is empty, whichever comes first. Leftover commands carry over to
//! the next tick, which bounds the work a single tick can do no matter how
//! large the backlog grows.
//!
//! Commands within a tick run sequentially. A command that never returns
//! blocks the tick; there is no timeout.
//!
//! # Lifecycle
//!
//! The processor starts stopped. [`start`](CommandProcessor::start) issues a
//! fresh session token; [`stop`](CommandProcessor::stop) cancels it. Stopping
//! never aborts the command currently executing: it finishes, its callback
//! runs, and the tick ends before the next dequeue. The queue is left intact.
//!
//! # Example
//!
//! ```
//! use tempo_scheduler::prelude::*;
//!
//! # tokio_test_block_on(async {
//! let queue = SharedCommandQueue::new();
//! let processor = CommandProcessor::new(queue.clone(), ProcessorConfig::with_budget(2)).unwrap();
//!
//! queue.enqueue(FnCommand::new("analytics", Priority::BACKGROUND));
//! queue.enqueue(FnCommand::new("save", Priority::CRITICAL));
//! queue.enqueue(FnCommand::new("animate", Priority::NORMAL));
//!
//! processor.start();
//! let report = processor.tick().await;
//! assert_eq!(report.executed_names(), ["save", "animate"]);
//! assert_eq!(report.remaining, 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::Mutex;
use tempo_command::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{ProcessorConfig, SkipPolicy};
use crate::fault::{
    panic_payload_to_string, CallbackFault, CallbackKind, FaultReporter, TracingFaultReporter,
};
use crate::report::{DispatchOutcome, DispatchRecord, ProcessorStats, TickReport};
use crate::ProcessorError;

// ---------------------------------------------------------------------------
// TickGuard
// ---------------------------------------------------------------------------

/// Clears the in-tick flag when the tick ends, including when the tick future
/// is dropped mid-await.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// CommandProcessor
// ---------------------------------------------------------------------------

/// Drains a [`SharedCommandQueue`] under a per-tick admission budget.
///
/// All methods take `&self`, so the processor can live in an `Arc` shared
/// by the tick source and by commands that need to stop it.
pub struct CommandProcessor {
    /// The queue this processor drains. Producers hold clones.
    queue: SharedCommandQueue,
    /// Whether ticks are currently acted on.
    running: AtomicBool,
    /// Set while a tick is draining; guards against re-entrant ticks.
    ticking: AtomicBool,
    /// Current admission budget. Always at least 1.
    max_commands_per_frame: AtomicUsize,
    skip_policy: Mutex<SkipPolicy>,
    /// Cancellation token for the current running session.
    session: Mutex<CancellationToken>,
    fault_reporter: Arc<dyn FaultReporter>,
    tick_counter: AtomicU64,
    last_report: Mutex<TickReport>,
    stats: Mutex<ProcessorStats>,
}

impl CommandProcessor {
    /// Create a stopped processor over `queue`.
    ///
    /// Returns [`ProcessorError::InvalidBudget`] if the config's budget is 0.
    pub fn new(queue: SharedCommandQueue, config: ProcessorConfig) -> Result<Self, ProcessorError> {
        config.validate()?;
        Ok(Self {
            queue,
            running: AtomicBool::new(false),
            ticking: AtomicBool::new(false),
            max_commands_per_frame: AtomicUsize::new(config.max_commands_per_frame),
            skip_policy: Mutex::new(config.skip_policy),
            session: Mutex::new(CancellationToken::new()),
            fault_reporter: Arc::new(TracingFaultReporter),
            tick_counter: AtomicU64::new(0),
            last_report: Mutex::new(TickReport::default()),
            stats: Mutex::new(ProcessorStats::default()),
        })
    }

    /// Replace the default [`TracingFaultReporter`].
    pub fn with_fault_reporter(mut self, reporter: Arc<dyn FaultReporter>) -> Self {
        self.fault_reporter = reporter;
        self
    }

    // -- lifecycle ----------------------------------------------------------

    /// Begin acting on ticks. No-op if already running.
    ///
    /// A restart after [`stop`](Self::stop) issues a new session token, so
    /// commands dispatched from now on are not born cancelled.
    pub fn start(&self) {
        let mut session = self.session.lock();
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("command processor already running");
            return;
        }
        if session.is_cancelled() {
            *session = CancellationToken::new();
        }
        info!(
            max_commands_per_frame = self.max_commands_per_frame(),
            "command processor started"
        );
    }

    /// Stop acting on ticks and cancel the session token. No-op if stopped.
    ///
    /// Safe to call from inside an executing command: that command runs to
    /// completion and the current tick ends before the next dequeue. Queued
    /// commands are kept.
    pub fn stop(&self) {
        let session = self.session.lock();
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        session.cancel();
        info!(
            pending = self.queue.total_commands_count(),
            "command processor stopped"
        );
    }

    /// Whether ticks are currently acted on.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // -- configuration ------------------------------------------------------

    /// Current per-tick admission budget.
    pub fn max_commands_per_frame(&self) -> usize {
        self.max_commands_per_frame.load(Ordering::Relaxed)
    }

    /// Change the per-tick budget. Takes effect at the start of the next tick.
    pub fn set_max_commands_per_frame(&self, max: usize) -> Result<(), ProcessorError> {
        if max == 0 {
            return Err(ProcessorError::InvalidBudget(max));
        }
        let previous = self.max_commands_per_frame.swap(max, Ordering::Relaxed);
        debug!(previous, max, "admission budget changed");
        Ok(())
    }

    /// Current skip policy.
    pub fn skip_policy(&self) -> SkipPolicy {
        *self.skip_policy.lock()
    }

    /// Change whether inadmissible commands consume budget.
    pub fn set_skip_policy(&self, policy: SkipPolicy) {
        *self.skip_policy.lock() = policy;
    }

    /// The effective configuration.
    pub fn config(&self) -> ProcessorConfig {
        ProcessorConfig {
            max_commands_per_frame: self.max_commands_per_frame(),
            skip_policy: self.skip_policy(),
        }
    }

    // -- queue access -------------------------------------------------------

    /// A producer handle to the queue this processor drains.
    pub fn queue(&self) -> SharedCommandQueue {
        self.queue.clone()
    }

    /// Discard every queued command (no callbacks). Use on shutdown or
    /// game-state reset. Returns how many were dropped.
    pub fn clear_queue(&self) -> usize {
        self.queue.clear()
    }

    /// The token handed to commands dispatched in the current session.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.session.lock().clone()
    }

    // -- diagnostics --------------------------------------------------------

    /// Number of ticks delivered so far, idle ones included.
    pub fn tick_count(&self) -> u64 {
        self.tick_counter.load(Ordering::Relaxed)
    }

    /// Report of the most recent tick that ran. Idle ticks are not recorded.
    pub fn last_report(&self) -> TickReport {
        self.last_report.lock().clone()
    }

    /// Totals since construction.
    pub fn stats(&self) -> ProcessorStats {
        self.stats.lock().clone()
    }

    // -- ticking ------------------------------------------------------------

    /// Handle one tick.
    ///
    /// Does nothing (and returns a report with `ran == false`) while stopped,
    /// or if another tick on this processor has not returned yet. Never fails:
    /// command errors and callback panics are contained and reported.
    pub async fn tick(&self) -> TickReport {
        let tick = self.tick_counter.fetch_add(1, Ordering::Relaxed) + 1;

        if !self.is_running() {
            return self.finish_idle(tick);
        }
        if self.ticking.swap(true, Ordering::AcqRel) {
            warn!(tick, "tick delivered while the previous tick is still draining; ignored");
            return self.finish_idle(tick);
        }
        let _guard = TickGuard(&self.ticking);

        let started = Instant::now();
        let budget = self.max_commands_per_frame();
        let skip_policy = self.skip_policy();
        let mut report = TickReport {
            tick,
            ran: true,
            ..Default::default()
        };
        let mut processed = 0usize;

        while processed < budget {
            if !self.is_running() {
                debug!(tick, "processor stopped mid-tick; leaving the rest queued");
                break;
            }

            let command = {
                let mut queue = self.queue.lock();
                if !queue.has_commands() {
                    break;
                }
                queue
                    .dequeue()
                    .expect("queue reported pending commands but dequeue found none")
            };

            if !command.can_execute() {
                debug!(
                    tick,
                    command = command.name(),
                    priority = %command.priority(),
                    "command not admissible; dropped"
                );
                report.skipped += 1;
                report.records.push(DispatchRecord {
                    name: command.name().to_owned(),
                    priority: command.priority(),
                    outcome: DispatchOutcome::Skipped,
                    panicked: false,
                    callback_fault: false,
                });
                if skip_policy == SkipPolicy::Counted {
                    processed += 1;
                }
                continue;
            }

            let record = self.dispatch(tick, command.as_ref()).await;
            report.dispatched += 1;
            match record.outcome {
                DispatchOutcome::Completed => report.completed += 1,
                DispatchOutcome::Failed { .. } => report.failed += 1,
                DispatchOutcome::Skipped => {}
            }
            if record.panicked {
                report.panics += 1;
            }
            if record.callback_fault {
                report.callback_faults += 1;
            }
            report.records.push(record);
            processed += 1;
        }

        report.remaining = self.queue.total_commands_count();
        report.elapsed = started.elapsed();

        debug!(
            tick,
            dispatched = report.dispatched,
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            remaining = report.remaining,
            elapsed = ?report.elapsed,
            "tick finished"
        );

        self.stats.lock().absorb(&report);
        *self.last_report.lock() = report.clone();
        report
    }

    /// Run `count` ticks back to back. Returns the total number of commands
    /// executed across them.
    pub async fn run_ticks(&self, count: u64) -> u64 {
        let mut total = 0u64;
        for _ in 0..count {
            total += self.tick().await.dispatched as u64;
        }
        total
    }

    // -- internal helpers ---------------------------------------------------

    /// Execute one admitted command and route its outcome.
    async fn dispatch(&self, tick: u64, command: &dyn Command) -> DispatchRecord {
        let cancel = self.cancellation_token();
        let mut panicked = false;
        let result = match AssertUnwindSafe(command.execute(&cancel))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_payload_to_string(&*payload);
                self.fault_reporter.report(&CallbackFault {
                    command: command.name().to_owned(),
                    priority: command.priority(),
                    callback: CallbackKind::Execute,
                    message: message.clone(),
                });
                panicked = true;
                Err(CommandError::Panicked(message))
            }
        };

        let (outcome, callback_fault) = match result {
            Ok(()) => {
                debug!(
                    tick,
                    command = command.name(),
                    priority = %command.priority(),
                    "command completed"
                );
                let fault = self.invoke_callback(command, CallbackKind::Complete, || {
                    command.on_complete()
                });
                (DispatchOutcome::Completed, fault)
            }
            Err(error) => {
                warn!(
                    tick,
                    command = command.name(),
                    priority = %command.priority(),
                    cancelled = error.is_cancelled(),
                    error = %error,
                    "command execution failed"
                );
                let fault = self.invoke_callback(command, CallbackKind::Failed, || {
                    command.on_failed(&error)
                });
                (
                    DispatchOutcome::Failed {
                        error: error.to_string(),
                    },
                    fault,
                )
            }
        };

        DispatchRecord {
            name: command.name().to_owned(),
            priority: command.priority(),
            outcome,
            panicked,
            callback_fault,
        }
    }

    /// Run a callback, containing any panic. Returns `true` if it panicked.
    fn invoke_callback<F>(&self, command: &dyn Command, kind: CallbackKind, callback: F) -> bool
    where
        F: FnOnce(),
    {
        match catch_unwind(AssertUnwindSafe(callback)) {
            Ok(()) => false,
            Err(payload) => {
                let fault = CallbackFault {
                    command: command.name().to_owned(),
                    priority: command.priority(),
                    callback: kind,
                    message: panic_payload_to_string(&*payload),
                };
                self.fault_reporter.report(&fault);
                true
            }
        }
    }

    fn finish_idle(&self, tick: u64) -> TickReport {
        let report = TickReport::idle(tick, self.queue.total_commands_count());
        self.stats.lock().absorb(&report);
        report
    }
}

impl Drop for CommandProcessor {
    fn drop(&mut self) {
        self.session.get_mut().cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(budget: usize) -> (SharedCommandQueue, CommandProcessor) {
        let queue = SharedCommandQueue::new();
        let processor =
            CommandProcessor::new(queue.clone(), ProcessorConfig::with_budget(budget)).unwrap();
        (queue, processor)
    }

    #[derive(Default)]
    struct CollectingReporter {
        faults: Mutex<Vec<CallbackFault>>,
    }

    impl FaultReporter for CollectingReporter {
        fn report(&self, fault: &CallbackFault) {
            self.faults.lock().push(fault.clone());
        }
    }

    // -- 1. Construction and lifecycle --------------------------------------

    #[test]
    fn new_processor_is_stopped() {
        let (_queue, processor) = processor(10);
        assert!(!processor.is_running());
        assert_eq!(processor.tick_count(), 0);
        assert_eq!(processor.max_commands_per_frame(), 10);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let result = CommandProcessor::new(SharedCommandQueue::new(), ProcessorConfig::with_budget(0));
        assert!(matches!(result, Err(ProcessorError::InvalidBudget(0))));
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let (_queue, processor) = processor(1);
        processor.start();
        processor.start();
        assert!(processor.is_running());
        processor.stop();
        processor.stop();
        assert!(!processor.is_running());
    }

    #[test]
    fn stop_cancels_session_and_restart_issues_fresh_token() {
        let (_queue, processor) = processor(1);
        processor.start();
        let first = processor.cancellation_token();
        processor.stop();
        assert!(first.is_cancelled());

        processor.start();
        assert!(!processor.cancellation_token().is_cancelled());
    }

    #[test]
    fn drop_cancels_session() {
        let (_queue, processor) = processor(1);
        processor.start();
        let token = processor.cancellation_token();
        drop(processor);
        assert!(token.is_cancelled());
    }

    // -- 2. Ticking ---------------------------------------------------------

    #[tokio::test]
    async fn stopped_processor_ignores_ticks() {
        let (queue, processor) = processor(10);
        queue.enqueue(FnCommand::new("a", Priority::NORMAL));

        let report = processor.tick().await;
        assert!(!report.ran);
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.remaining, 1);
        assert_eq!(processor.tick_count(), 1);
        assert_eq!(processor.stats().idle_ticks, 1);
    }

    #[tokio::test]
    async fn empty_queue_tick_runs_and_dispatches_nothing() {
        let (_queue, processor) = processor(10);
        processor.start();
        let report = processor.tick().await;
        assert!(report.ran);
        assert_eq!(report.dispatched, 0);
        assert!(report.records.is_empty());
    }

    #[tokio::test]
    async fn callbacks_follow_outcome() {
        let (queue, processor) = processor(10);
        let completes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));

        let counting = |name: &str, fail: bool| {
            let c = completes.clone();
            let f = failures.clone();
            FnCommand::new(name, Priority::NORMAL)
                .with_execute(move |_| async move {
                    if fail {
                        Err(CommandError::failed("nope"))
                    } else {
                        Ok(())
                    }
                })
                .with_on_complete(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .with_on_failed(move |_| {
                    f.fetch_add(1, Ordering::SeqCst);
                })
        };
        queue.enqueue(counting("ok", false));
        queue.enqueue(counting("bad", true));

        processor.start();
        let report = processor.tick().await;

        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(completes.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(
            report.records[1].outcome,
            DispatchOutcome::Failed {
                error: "command failed: nope".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn callback_panic_is_contained_and_reported() {
        let reporter = Arc::new(CollectingReporter::default());
        let queue = SharedCommandQueue::new();
        let processor = CommandProcessor::new(queue.clone(), ProcessorConfig::default())
            .unwrap()
            .with_fault_reporter(reporter.clone());

        queue.enqueue(
            FnCommand::new("explodes", Priority::HIGH).with_on_complete(|| panic!("kaboom")),
        );
        queue.enqueue(FnCommand::new("after", Priority::HIGH));

        processor.start();
        let report = processor.tick().await;

        assert_eq!(report.executed_names(), ["explodes", "after"]);
        assert_eq!(report.callback_faults, 1);
        assert!(report.records[0].callback_fault);
        assert!(!report.records[1].callback_fault);

        let faults = reporter.faults.lock();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].command, "explodes");
        assert_eq!(faults[0].callback, CallbackKind::Complete);
        assert_eq!(faults[0].message, "kaboom");
    }

    #[tokio::test]
    async fn failure_callback_panic_is_contained() {
        let reporter = Arc::new(CollectingReporter::default());
        let queue = SharedCommandQueue::new();
        let processor = CommandProcessor::new(queue.clone(), ProcessorConfig::default())
            .unwrap()
            .with_fault_reporter(reporter.clone());

        queue.enqueue(
            FnCommand::new("double-fault", Priority::NORMAL)
                .with_execute(|_| async { Err::<(), _>(CommandError::failed("first")) })
                .with_on_failed(|_| panic!("second")),
        );

        processor.start();
        let report = processor.tick().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.callback_faults, 1);
        assert_eq!(reporter.faults.lock()[0].callback, CallbackKind::Failed);
        assert_eq!(processor.stats().callback_faults, 1);
    }

    #[tokio::test]
    async fn budget_change_applies_to_next_tick() {
        let (queue, processor) = processor(1);
        for i in 0..5 {
            queue.enqueue(FnCommand::new(format!("c{i}"), Priority::NORMAL));
        }
        processor.start();

        assert_eq!(processor.tick().await.dispatched, 1);
        processor.set_max_commands_per_frame(3).unwrap();
        assert_eq!(processor.tick().await.dispatched, 3);
        assert_eq!(queue.total_commands_count(), 1);

        assert!(matches!(
            processor.set_max_commands_per_frame(0),
            Err(ProcessorError::InvalidBudget(0))
        ));
        assert_eq!(processor.max_commands_per_frame(), 3);
    }

    #[tokio::test]
    async fn run_ticks_totals_dispatches() {
        let (queue, processor) = processor(2);
        for i in 0..7 {
            queue.enqueue(FnCommand::new(format!("c{i}"), Priority::LOW));
        }
        processor.start();

        assert_eq!(processor.run_ticks(3).await, 6);
        assert_eq!(processor.run_ticks(3).await, 1);
        assert_eq!(processor.tick_count(), 6);
        assert_eq!(processor.stats().ticks_run, 6);
    }

    #[tokio::test]
    async fn last_report_and_stats_are_recorded() {
        let (queue, processor) = processor(10);
        queue.enqueue(FnCommand::new("a", Priority::NORMAL));
        queue.enqueue(FnCommand::new("b", Priority::NORMAL).with_guard(|| false));
        processor.start();

        let report = processor.tick().await;
        let last = processor.last_report();
        assert_eq!(last.tick, report.tick);
        assert_eq!(last.executed_names(), ["a"]);
        assert_eq!(last.skipped_names(), ["b"]);

        let stats = processor.stats();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn config_reflects_runtime_changes() {
        let (_queue, processor) = processor(4);
        processor.set_skip_policy(SkipPolicy::Counted);
        processor.set_max_commands_per_frame(6).unwrap();
        assert_eq!(
            processor.config(),
            ProcessorConfig {
                max_commands_per_frame: 6,
                skip_policy: SkipPolicy::Counted,
            }
        );
    }

    #[tokio::test]
    async fn clear_queue_drops_without_callbacks() {
        let (queue, processor) = processor(4);
        let called = Arc::new(AtomicUsize::new(0));
        let c = called.clone();
        queue.enqueue(FnCommand::new("x", Priority::NORMAL).with_on_complete(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(processor.clear_queue(), 1);

        processor.start();
        assert_eq!(processor.tick().await.dispatched, 0);
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn processor_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CommandProcessor>();
    }
}
