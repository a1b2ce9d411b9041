//! Error types for the patch engine.

use thiserror::Error;

use crate::PatchCommand;

/// Errors raised while applying an edit stream.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Malformed edit stream framing.
    #[error("{0}")]
    Common(#[from] rpak_common::Error),

    /// A handler made no forward progress although its inputs were available.
    #[error("patch command {command:?} made no progress after {executed} commands")]
    Stuck { command: PatchCommand, executed: u32 },

    /// A stream ended while a command, or the destination, still needed data.
    #[error("patch {stream} ended after {executed} of {command_count} commands")]
    Truncated {
        stream: &'static str,
        executed: u32,
        command_count: u32,
    },

    /// The patch source ran dry while a command still needed source bytes.
    #[error("patch source exhausted after {executed} of {command_count} commands")]
    SourceExhausted { executed: u32, command_count: u32 },

    /// Commands remain that would write past the reconstructed region.
    #[error("patch writes past the end of the destination with {remaining} commands left")]
    Overrun { remaining: u32 },
}

/// Result type for patch operations.
pub type Result<T> = std::result::Result<T, PatchError>;
