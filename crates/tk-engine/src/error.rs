use tk_compiler::EntryError;

use crate::host::HostError;

/// Errors surfaced by engine operations and command dispatch.
///
/// Host-boundary failures inside periodic work are logged where they happen
/// and never reach the caller; these variants are what an explicit command
/// can fail with.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Rule table write failed: {0}")]
    RuleTableWrite(#[source] HostError),

    #[error("Prayer time source failed: {0}")]
    TimeSource(String),

    #[error("Alarm scheduling failed: {0}")]
    Scheduler(#[source] HostError),

    #[error("Storage failed: {0}")]
    Storage(#[source] HostError),

    #[error("Invalid duration: {minutes} minutes (expected 1..={max})")]
    InvalidDuration { minutes: i64, max: u32 },

    #[error("No location configured")]
    NoLocation,

    #[error("Invalid site: {0}")]
    InvalidSite(#[from] EntryError),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Tool origin is not configured; strict rules would block the extension's own pages")]
    MissingToolOrigin,

    #[error("Malformed command: {0}")]
    MalformedCommand(String),
}
