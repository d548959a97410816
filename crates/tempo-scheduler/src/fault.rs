//! Reporting of command faults.
//!
//! Neither a command body nor its `on_complete`/`on_failed` callbacks may
//! panic. When one does, the processor catches the unwind, builds a
//! [`CallbackFault`] and hands it to its [`FaultReporter`] so the programming
//! error is surfaced loudly instead of tearing down the tick. The default
//! reporter logs at `error` level.

use std::any::Any;
use std::fmt;

use tempo_command::priority::Priority;
use tracing::error;

/// Which part of the command faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// The async body.
    Execute,
    Complete,
    Failed,
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackKind::Execute => f.write_str("execute"),
            CallbackKind::Complete => f.write_str("on_complete"),
            CallbackKind::Failed => f.write_str("on_failed"),
        }
    }
}

/// A panic raised by a command body or callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{callback} of command '{command}' ({priority}) panicked: {message}")]
pub struct CallbackFault {
    /// Name of the faulting command.
    pub command: String,
    /// Its priority.
    pub priority: Priority,
    /// Where the panic was raised.
    pub callback: CallbackKind,
    /// The panic payload, rendered as text.
    pub message: String,
}

/// Receives command faults. Implementations must not panic.
pub trait FaultReporter: Send + Sync {
    fn report(&self, fault: &CallbackFault);
}

/// Logs every fault through `tracing` at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFaultReporter;

impl FaultReporter for TracingFaultReporter {
    fn report(&self, fault: &CallbackFault) {
        error!(
            command = %fault.command,
            priority = %fault.priority,
            callback = %fault.callback,
            message = %fault.message,
            "command panicked; commands must never panic"
        );
    }
}

/// Render a panic payload as text.
pub(crate) fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
