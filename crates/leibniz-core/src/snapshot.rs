//! The calculation snapshot, its run status, and the control commands.
//!
//! [`CalculationSnapshot`] is both the persisted record and the status
//! projection returned to callers. Its JSON shape is fixed:
//!
//! ```json
//! { "piText": "3.0418396189294032", "status": "running", "iteration": 10 }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sentinel pi text meaning "no accumulated terms".
pub const PI_TEXT_ZERO: &str = "0";

/// Run status of the calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationStatus {
    /// The periodic step is armed and the series is advancing.
    Running,
    /// Progress is kept; a `start` resumes from the current iteration.
    Paused,
    /// Progress is kept for display; a `start` begins a fresh run.
    #[default]
    Stopped,
}

impl CalculationStatus {
    /// The lowercase wire name of this status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for CalculationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The complete record of calculation progress.
///
/// `iteration` is the sole source of truth for progress; `pi_text` is the
/// rendered approximation after `iteration` terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationSnapshot {
    /// Decimal text of the current pi approximation (`"0"` when empty).
    #[serde(alias = "pi")]
    pub pi_text: String,
    /// Current run status.
    pub status: CalculationStatus,
    /// Number of Leibniz terms folded into `pi_text`.
    pub iteration: u64,
}

impl Default for CalculationSnapshot {
    fn default() -> Self {
        Self {
            pi_text: String::from(PI_TEXT_ZERO),
            status: CalculationStatus::Stopped,
            iteration: 0,
        }
    }
}

/// An operator command accepted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Start a fresh run, or resume a paused one.
    Start,
    /// Halt the periodic step, keeping progress resumable.
    Pause,
    /// Halt the periodic step; the next start begins from zero.
    Stop,
    /// Discard all progress and return to the default snapshot.
    Reset,
}

impl Command {
    /// The lowercase wire name of this command.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command name that is not one of `start`, `pause`, `stop`, `reset`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command '{0}', expected one of: start, pause, stop, reset")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "pause" => Ok(Self::Pause),
            "stop" => Ok(Self::Stop),
            "reset" => Ok(Self::Reset),
            other => Err(UnknownCommand(other.to_owned())),
        }
    }
}
