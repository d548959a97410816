//! Priority-partitioned command queue.
//!
//! The [`CommandQueue`] keeps one FIFO per priority value in an ordered map.
//! Priorities are sparse in practice (a handful of bands), so selecting the
//! next command is a lookup of the first non-empty band rather than a heap
//! operation. Bands are created on first use and removed as soon as they
//! drain, which keeps the first map entry always non-empty.
//!
//! Ordering guarantee: [`dequeue`](CommandQueue::dequeue) always returns the
//! command with the lowest priority value, and among equal priorities the one
//! enqueued first. [`iter`](CommandQueue::iter) and
//! [`snapshot`](CommandQueue::snapshot) report the same order without
//! mutating anything.
//!
//! # Example
//!
//! ```
//! use tempo_command::prelude::*;
//!
//! let mut queue = CommandQueue::new();
//! queue.enqueue(FnCommand::new("analytics", Priority::BACKGROUND));
//! queue.enqueue(FnCommand::new("save", Priority::CRITICAL));
//! queue.enqueue(FnCommand::new("animate", Priority::NORMAL));
//!
//! let order: Vec<&str> = queue.iter().map(|c| c.name()).collect();
//! assert_eq!(order, ["save", "animate", "analytics"]);
//!
//! assert_eq!(queue.dequeue().unwrap().name(), "save");
//! assert_eq!(queue.total_commands_count(), 2);
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::command::Command;
use crate::priority::Priority;

// ---------------------------------------------------------------------------
// QueueError
// ---------------------------------------------------------------------------

/// Errors produced by queue operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// [`CommandQueue::dequeue`] was called with nothing queued. Callers are
    /// expected to check [`CommandQueue::has_commands`] first.
    #[error("dequeue called on an empty command queue")]
    Empty,
}

// ---------------------------------------------------------------------------
// QueuedCommandInfo
// ---------------------------------------------------------------------------

/// Read-only description of a queued command, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedCommandInfo {
    /// The command's name.
    pub name: String,
    /// Priority captured at enqueue time.
    pub priority: Priority,
    /// Enqueue sequence number, unique within the queue's lifetime.
    pub sequence: u64,
}

struct QueueEntry {
    sequence: u64,
    command: Box<dyn Command>,
}

// ---------------------------------------------------------------------------
// CommandQueue
// ---------------------------------------------------------------------------

/// Commands awaiting dispatch, ordered by priority then insertion.
///
/// The queue never executes anything and never invokes callbacks; it is
/// passive storage with ordering logic.
pub struct CommandQueue {
    bands: BTreeMap<Priority, VecDeque<QueueEntry>>,
    total: usize,
    next_sequence: u64,
}

impl CommandQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            bands: BTreeMap::new(),
            total: 0,
            next_sequence: 0,
        }
    }

    /// Append a command to the FIFO for its priority.
    pub fn enqueue<C>(&mut self, command: C)
    where
        C: Command + 'static,
    {
        self.enqueue_boxed(Box::new(command));
    }

    /// Append an already boxed command.
    ///
    /// The priority is read once here. A command whose
    /// [`priority`](Command::priority) changes later keeps its original slot.
    pub fn enqueue_boxed(&mut self, command: Box<dyn Command>) {
        let priority = command.priority();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        trace!(
            command = command.name(),
            %priority,
            sequence,
            "command enqueued"
        );

        self.bands
            .entry(priority)
            .or_default()
            .push_back(QueueEntry { sequence, command });
        self.total += 1;
    }

    /// Remove and return the next command.
    ///
    /// Returns [`QueueError::Empty`] if nothing is queued.
    pub fn dequeue(&mut self) -> Result<Box<dyn Command>, QueueError> {
        let mut band = self.bands.first_entry().ok_or(QueueError::Empty)?;
        let entry = band
            .get_mut()
            .pop_front()
            .expect("empty priority band left in the queue");
        if band.get().is_empty() {
            band.remove();
        }
        self.total -= 1;
        Ok(entry.command)
    }

    /// The command [`dequeue`](Self::dequeue) would return next, if any.
    pub fn peek(&self) -> Option<&dyn Command> {
        self.bands
            .values()
            .next()
            .and_then(|band| band.front())
            .map(|entry| entry.command.as_ref())
    }

    /// Discard every queued command without invoking any callback.
    ///
    /// Returns how many commands were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.total;
        self.bands.clear();
        self.total = 0;
        if dropped > 0 {
            debug!(dropped, "command queue cleared");
        }
        dropped
    }

    /// Lazily iterate queued commands in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Command> + '_ {
        self.entries().map(|entry| entry.command.as_ref())
    }

    /// Owned description of every queued command, in dispatch order.
    pub fn snapshot(&self) -> Vec<QueuedCommandInfo> {
        self.bands
            .iter()
            .flat_map(|(priority, band)| {
                band.iter().map(move |entry| QueuedCommandInfo {
                    name: entry.command.name().to_owned(),
                    priority: *priority,
                    sequence: entry.sequence,
                })
            })
            .collect()
    }

    /// Number of queued commands across all priorities.
    pub fn total_commands_count(&self) -> usize {
        self.total
    }

    /// Alias for [`total_commands_count`](Self::total_commands_count).
    pub fn len(&self) -> usize {
        self.total
    }

    /// Whether anything is queued.
    pub fn has_commands(&self) -> bool {
        self.total > 0
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Number of commands queued at exactly `priority`.
    pub fn count_for(&self, priority: Priority) -> usize {
        self.bands.get(&priority).map_or(0, VecDeque::len)
    }

    /// Priorities that currently have queued commands, in dispatch order.
    pub fn active_priorities(&self) -> Vec<Priority> {
        self.bands.keys().copied().collect()
    }

    fn entries(&self) -> impl Iterator<Item = &QueueEntry> + '_ {
        self.bands.values().flat_map(|band| band.iter())
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("total", &self.total)
            .field(
                "bands",
                &self
                    .bands
                    .iter()
                    .map(|(p, band)| (p.0, band.len()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SharedCommandQueue
// ---------------------------------------------------------------------------

/// Cloneable handle to a [`CommandQueue`] shared between producers and the
/// processor.
///
/// Producers may enqueue from any thread or task while a tick drains the
/// queue. Every method takes the lock for the duration of the call only;
/// callers holding [`lock`](Self::lock) must release the guard before
/// awaiting.
#[derive(Clone, Default)]
pub struct SharedCommandQueue {
    inner: Arc<Mutex<CommandQueue>>,
}

impl SharedCommandQueue {
    /// Create a handle to a new, empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing queue.
    pub fn from_queue(queue: CommandQueue) -> Self {
        Self {
            inner: Arc::new(Mutex::new(queue)),
        }
    }

    /// Enqueue a command.
    pub fn enqueue<C>(&self, command: C)
    where
        C: Command + 'static,
    {
        self.inner.lock().enqueue(command);
    }

    /// Enqueue an already boxed command.
    pub fn enqueue_boxed(&self, command: Box<dyn Command>) {
        self.inner.lock().enqueue_boxed(command);
    }

    /// Whether anything is queued.
    pub fn has_commands(&self) -> bool {
        self.inner.lock().has_commands()
    }

    /// Number of queued commands.
    pub fn total_commands_count(&self) -> usize {
        self.inner.lock().total_commands_count()
    }

    /// Name of the command that would be dispatched next.
    pub fn peek_name(&self) -> Option<String> {
        self.inner.lock().peek().map(|c| c.name().to_owned())
    }

    /// Diagnostics snapshot in dispatch order.
    pub fn snapshot(&self) -> Vec<QueuedCommandInfo> {
        self.inner.lock().snapshot()
    }

    /// Discard everything queued. Returns how many commands were dropped.
    pub fn clear(&self) -> usize {
        self.inner.lock().clear()
    }

    /// Exclusive access to the underlying queue.
    pub fn lock(&self) -> MutexGuard<'_, CommandQueue> {
        self.inner.lock()
    }

    /// Whether two handles refer to the same queue.
    pub fn same_queue(&self, other: &SharedCommandQueue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SharedCommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedCommandQueue")
            .field(&*self.inner.lock())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::FnCommand;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cmd(name: &str, priority: Priority) -> FnCommand {
        FnCommand::new(name, priority)
    }

    fn drain_names(queue: &mut CommandQueue) -> Vec<String> {
        let mut names = Vec::new();
        while queue.has_commands() {
            names.push(queue.dequeue().unwrap().name().to_owned());
        }
        names
    }

    // -- 1. Empty queue -----------------------------------------------------

    #[test]
    fn new_queue_is_empty() {
        let queue = CommandQueue::new();
        assert!(!queue.has_commands());
        assert!(queue.is_empty());
        assert_eq!(queue.total_commands_count(), 0);
        assert!(queue.peek().is_none());
        assert_eq!(queue.iter().count(), 0);
    }

    #[test]
    fn dequeue_on_empty_is_an_error() {
        let mut queue = CommandQueue::new();
        assert_eq!(queue.dequeue().unwrap_err(), QueueError::Empty);
    }

    // -- 2. Ordering --------------------------------------------------------

    #[test]
    fn lower_priority_value_dequeues_first() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd("low", Priority::LOW));
        queue.enqueue(cmd("critical", Priority::CRITICAL));
        queue.enqueue(cmd("background", Priority::BACKGROUND));
        queue.enqueue(cmd("high", Priority::HIGH));
        queue.enqueue(cmd("normal", Priority::NORMAL));

        assert_eq!(
            drain_names(&mut queue),
            ["critical", "high", "normal", "low", "background"]
        );
    }

    #[test]
    fn equal_priorities_are_fifo() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd("a", Priority::HIGH));
        queue.enqueue(cmd("b", Priority::HIGH));
        queue.enqueue(cmd("c", Priority::HIGH));

        assert_eq!(drain_names(&mut queue), ["a", "b", "c"]);
    }

    #[test]
    fn values_between_bands_sort_by_value() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd("normal", Priority::NORMAL));
        queue.enqueue(cmd("thirty", Priority(30)));
        queue.enqueue(cmd("high", Priority::HIGH));

        assert_eq!(drain_names(&mut queue), ["high", "thirty", "normal"]);
    }

    #[test]
    fn later_higher_priority_jumps_ahead_of_leftovers() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd("old-normal", Priority::NORMAL));
        queue.enqueue(cmd("old-low", Priority::LOW));
        queue.dequeue().unwrap();

        queue.enqueue(cmd("new-critical", Priority::CRITICAL));
        queue.enqueue(cmd("new-low", Priority::LOW));

        assert_eq!(
            drain_names(&mut queue),
            ["new-critical", "old-low", "new-low"]
        );
    }

    // -- 3. Peek, iter, snapshot --------------------------------------------

    #[test]
    fn peek_matches_dequeue_and_does_not_remove() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd("normal", Priority::NORMAL));
        queue.enqueue(cmd("high", Priority::HIGH));

        assert_eq!(queue.peek().map(|c| c.name()), Some("high"));
        assert_eq!(queue.total_commands_count(), 2);
        assert_eq!(queue.dequeue().unwrap().name(), "high");
        assert_eq!(queue.peek().map(|c| c.name()), Some("normal"));
    }

    #[test]
    fn iter_matches_dequeue_order() {
        let mut queue = CommandQueue::new();
        for (i, p) in [50u32, 0, 200, 50, 10, 0].into_iter().enumerate() {
            queue.enqueue(cmd(&format!("c{i}"), Priority(p)));
        }

        let listed: Vec<String> = queue.iter().map(|c| c.name().to_owned()).collect();
        assert_eq!(queue.total_commands_count(), 6);
        assert_eq!(listed, drain_names(&mut queue));
    }

    #[test]
    fn snapshot_reports_priority_and_sequence() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd("a", Priority::LOW));
        queue.enqueue(cmd("b", Priority::CRITICAL));
        queue.enqueue(cmd("c", Priority::LOW));

        let snap = queue.snapshot();
        let summary: Vec<(&str, u32, u64)> = snap
            .iter()
            .map(|i| (i.name.as_str(), i.priority.0, i.sequence))
            .collect();
        assert_eq!(summary, [("b", 0, 1), ("a", 100, 0), ("c", 100, 2)]);
    }

    // -- 4. Counts and bands ------------------------------------------------

    #[test]
    fn empty_bands_are_removed() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd("a", Priority::HIGH));
        queue.enqueue(cmd("b", Priority::LOW));
        assert_eq!(queue.active_priorities(), [Priority::HIGH, Priority::LOW]);

        queue.dequeue().unwrap();
        assert_eq!(queue.active_priorities(), [Priority::LOW]);
        assert_eq!(queue.count_for(Priority::HIGH), 0);
        assert_eq!(queue.count_for(Priority::LOW), 1);
    }

    #[test]
    fn clear_discards_without_callbacks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut queue = CommandQueue::new();
        for i in 0..4 {
            let c1 = calls.clone();
            let c2 = calls.clone();
            queue.enqueue(
                cmd(&format!("c{i}"), Priority(i * 10))
                    .with_on_complete(move || {
                        c1.fetch_add(1, Ordering::SeqCst);
                    })
                    .with_on_failed(move |_| {
                        c2.fetch_add(1, Ordering::SeqCst);
                    }),
            );
        }

        assert_eq!(queue.clear(), 4);
        assert!(!queue.has_commands());
        assert!(queue.active_priorities().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn sequence_numbers_keep_growing_after_clear() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd("a", Priority::NORMAL));
        queue.clear();
        queue.enqueue(cmd("b", Priority::NORMAL));
        assert_eq!(queue.snapshot()[0].sequence, 1);
    }

    // -- 5. Shared handle ---------------------------------------------------

    #[test]
    fn shared_handles_see_the_same_queue() {
        let producer = SharedCommandQueue::new();
        let consumer = producer.clone();
        assert!(producer.same_queue(&consumer));

        producer.enqueue(cmd("x", Priority::NORMAL));
        assert!(consumer.has_commands());
        assert_eq!(consumer.peek_name().as_deref(), Some("x"));
        assert_eq!(consumer.lock().dequeue().unwrap().name(), "x");
        assert_eq!(producer.total_commands_count(), 0);
    }

    #[test]
    fn concurrent_producers_do_not_lose_commands() {
        let shared = SharedCommandQueue::new();
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let q = shared.clone();
                std::thread::spawn(move || {
                    for i in 0..250u32 {
                        q.enqueue(cmd(&format!("t{t}-{i}"), Priority(t * 10)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(shared.total_commands_count(), 1000);

        // Per-producer FIFO survives the interleaving.
        let snap = shared.snapshot();
        for t in 0..4u32 {
            let names: Vec<&str> = snap
                .iter()
                .filter(|i| i.priority == Priority(t * 10))
                .map(|i| i.name.as_str())
                .collect();
            let expected: Vec<String> = (0..250).map(|i| format!("t{t}-{i}")).collect();
            assert_eq!(names, expected);
        }
    }
}
