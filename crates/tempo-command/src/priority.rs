//! Scheduling priority for queued commands.
//!
//! Lower numeric values are scheduled first. Five named bands cover the common
//! cases, but any `u32` is a legal priority and sorts by its raw value, so a
//! command at `Priority(30)` runs after every `HIGH` command and before every
//! `NORMAL` one.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Ordinal scheduling priority. Lower value = higher precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u32);

impl Priority {
    /// Must run before anything else (e.g. persisting game state).
    pub const CRITICAL: Priority = Priority(0);
    /// Player-facing work that should not wait behind normal traffic.
    pub const HIGH: Priority = Priority(10);
    /// Default priority for gameplay commands.
    pub const NORMAL: Priority = Priority(50);
    /// Deferrable work.
    pub const LOW: Priority = Priority(100);
    /// Work that only runs when nothing else is pending.
    pub const BACKGROUND: Priority = Priority(200);

    /// The raw ordinal value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// The named band this priority falls into.
    ///
    /// A value belongs to the band whose threshold is the greatest one not
    /// exceeding it, so `Priority(30)` is `High` and `Priority(500)` is
    /// `Background`.
    pub fn band(self) -> PriorityBand {
        match self.0 {
            v if v >= Self::BACKGROUND.0 => PriorityBand::Background,
            v if v >= Self::LOW.0 => PriorityBand::Low,
            v if v >= Self::NORMAL.0 => PriorityBand::Normal,
            v if v >= Self::HIGH.0 => PriorityBand::High,
            _ => PriorityBand::Critical,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<u32> for Priority {
    fn from(value: u32) -> Self {
        Priority(value)
    }
}

impl From<PriorityBand> for Priority {
    fn from(band: PriorityBand) -> Self {
        band.priority()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.band().name(), self.0)
    }
}

// ---------------------------------------------------------------------------
// PriorityBand
// ---------------------------------------------------------------------------

/// Named priority ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBand {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

impl PriorityBand {
    /// All bands in scheduling order.
    pub const ALL: [PriorityBand; 5] = [
        PriorityBand::Critical,
        PriorityBand::High,
        PriorityBand::Normal,
        PriorityBand::Low,
        PriorityBand::Background,
    ];

    /// The priority at the start of this band.
    pub fn priority(self) -> Priority {
        match self {
            PriorityBand::Critical => Priority::CRITICAL,
            PriorityBand::High => Priority::HIGH,
            PriorityBand::Normal => Priority::NORMAL,
            PriorityBand::Low => Priority::LOW,
            PriorityBand::Background => Priority::BACKGROUND,
        }
    }

    /// Lowercase name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            PriorityBand::Critical => "critical",
            PriorityBand::High => "high",
            PriorityBand::Normal => "normal",
            PriorityBand::Low => "low",
            PriorityBand::Background => "background",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
