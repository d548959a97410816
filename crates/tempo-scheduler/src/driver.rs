//! Periodic tick source.
//!
//! The processor is passive; something has to call
//! [`tick`](crate::processor::CommandProcessor::tick) on a cadence. Hosts with
//! their own frame loop call it directly. [`TickDriver`] covers the rest: it
//! ticks an `Arc<CommandProcessor>` from a `tokio` interval until its shutdown
//! token is cancelled.
//!
//! A tick that overruns the period delays the following ones instead of
//! triggering a catch-up burst, so a slow command cannot cause back-to-back
//! ticks.

use std::sync::Arc;
use std::time::Duration;

use tempo_command::cancel::CancellationToken;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, trace};

use crate::processor::CommandProcessor;
use crate::ProcessorError;

/// Drives a [`CommandProcessor`] at a fixed period.
pub struct TickDriver {
    processor: Arc<CommandProcessor>,
    period: Duration,
    shutdown: CancellationToken,
}

impl TickDriver {
    /// Create a driver ticking every `period`.
    ///
    /// Returns [`ProcessorError::InvalidPeriod`] for a zero period.
    pub fn new(processor: Arc<CommandProcessor>, period: Duration) -> Result<Self, ProcessorError> {
        if period.is_zero() {
            return Err(ProcessorError::InvalidPeriod);
        }
        Ok(Self {
            processor,
            period,
            shutdown: CancellationToken::new(),
        })
    }

    /// Driver ticking at `hz` ticks per second.
    pub fn with_rate(processor: Arc<CommandProcessor>, hz: u32) -> Result<Self, ProcessorError> {
        if hz == 0 {
            return Err(ProcessorError::InvalidPeriod);
        }
        Self::new(processor, Duration::from_secs(1) / hz)
    }

    /// Token that stops the driver when cancelled. The processor itself is
    /// left in whatever state it was in.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The tick period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Tick until shutdown. Returns the number of ticks delivered.
    ///
    /// The first tick fires immediately.
    pub async fn run(self) -> u64 {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period = ?self.period, "tick driver started");

        let mut delivered = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let report = self.processor.tick().await;
            delivered += 1;
            trace!(
                tick = report.tick,
                dispatched = report.dispatched,
                remaining = report.remaining,
                "driver tick"
            );
        }

        info!(delivered, "tick driver shut down");
        delivered
    }

    /// Spawn [`run`](Self::run) on the current tokio runtime.
    pub fn spawn(self) -> (CancellationToken, JoinHandle<u64>) {
        let shutdown = self.shutdown_token();
        (shutdown, tokio::spawn(self.run()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
