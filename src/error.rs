//! Cadence error types

use thiserror::Error;

use crate::pipeline::RunId;

/// Errors that can occur in the cadence pipeline.
///
/// Team-local failures never surface here: a crashed or blocked stage
/// degrades in place inside its `StageResult`. Only run-fatal conditions
/// (bad configuration, lost channels) become errors.
#[derive(Debug, Error)]
pub enum CadenceError {
    /// Team identifier not in the roster
    #[error("Unknown team: {0}")]
    UnknownTeam(String),

    /// A run was requested with no teams selected
    #[error("Team selection is empty")]
    EmptySelection,

    /// Run not found in the registry
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// Status channel closed before the run reached a terminal state
    #[error("Run status channel closed")]
    ChannelClosed,

    /// Scheduler-level failure, not scoped to a single team
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}
