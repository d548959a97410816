//! Processor configuration.
//!
//! The processor has one real tunable, the per-tick admission budget, plus the
//! policy deciding whether inadmissible commands consume that budget. Both can
//! be loaded from JSON so a host can keep them next to its other settings:
//!
//! ```
//! use tempo_scheduler::config::{ProcessorConfig, SkipPolicy};
//!
//! let config = ProcessorConfig::from_json_str(r#"{ "max_commands_per_frame": 4 }"#).unwrap();
//! assert_eq!(config.max_commands_per_frame, 4);
//! assert_eq!(config.skip_policy, SkipPolicy::Free);
//! ```

use serde::{Deserialize, Serialize};

use crate::ProcessorError;

/// Budget used when none is configured.
pub const DEFAULT_MAX_COMMANDS_PER_FRAME: usize = 10;

// ---------------------------------------------------------------------------
// SkipPolicy
// ---------------------------------------------------------------------------

/// Whether a command dropped by its admission check counts against the
/// per-tick budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// Dropped commands are free. Only executed commands consume budget, so a
    /// burst of inadmissible commands cannot starve admissible ones.
    #[default]
    Free,
    /// Every dequeued command consumes budget, bounding dequeues per tick.
    Counted,
}

// ---------------------------------------------------------------------------
// ProcessorConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`CommandProcessor`](crate::processor::CommandProcessor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Maximum number of commands dispatched per tick. Must be at least 1.
    pub max_commands_per_frame: usize,
    /// How inadmissible commands interact with the budget.
    pub skip_policy: SkipPolicy,
}

impl ProcessorConfig {
    /// Config with the given budget and default skip policy.
    pub fn with_budget(max_commands_per_frame: usize) -> Self {
        Self {
            max_commands_per_frame,
            ..Default::default()
        }
    }

    /// Check the config for values the processor cannot run with.
    pub fn validate(&self) -> Result<(), ProcessorError> {
        if self.max_commands_per_frame == 0 {
            return Err(ProcessorError::InvalidBudget(self.max_commands_per_frame));
        }
        Ok(())
    }

    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ProcessorError> {
        let config: ProcessorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_commands_per_frame: DEFAULT_MAX_COMMANDS_PER_FRAME,
            skip_policy: SkipPolicy::Free,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
