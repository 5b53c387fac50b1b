//! Error taxonomy (spec.md §7) and the exit-code mapping for §6.

use std::fmt;
use std::io;

use thiserror::Error;

/// The five error kinds from spec.md §7, minus `Done`/`Stop` which are
/// orderly termination requests rather than errors (see [`ControlFlow`]).
#[derive(Debug, Error)]
pub enum HexpeekError {
    /// Malformed command, ambiguous command, invalid number, forbidden
    /// combination, insufficient file mode, EOF when pedantic.
    #[error("{0}")]
    User(String),

    /// A read/write/seek/truncate/sync/open failed and is not recoverable
    /// locally.
    #[error("{0}")]
    Io(String),

    /// Backup header or record failed structural validation, a size
    /// mismatch was found during recovery, or a counter would overflow.
    #[error("{0}")]
    State(String),

    /// A comparison found differences. Informational; surfaced as an exit
    /// code only in batch mode.
    #[error("difference found at offset {at:#x}")]
    Diff { at: i64 },
}

impl HexpeekError {
    pub fn user(msg: impl Into<String>) -> Self {
        HexpeekError::User(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        HexpeekError::State(msg.into())
    }

    /// The exit code this error should produce in batch (`-x`) mode, per
    /// spec.md §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            HexpeekError::Diff { .. } => 1,
            HexpeekError::User(_) => 4,
            HexpeekError::Io(_) | HexpeekError::State(_) => 5,
        }
    }
}

impl From<io::Error> for HexpeekError {
    fn from(e: io::Error) -> Self {
        HexpeekError::Io(e.to_string())
    }
}

impl From<nix::Error> for HexpeekError {
    fn from(e: nix::Error) -> Self {
        HexpeekError::Io(e.to_string())
    }
}

/// Orderly termination requests. Not errors (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    /// `quit`/`q`: leave the session normally, exit code 0.
    Quit,
    /// `stop`: leave the session, exit code 2.
    Stop,
}

impl ControlFlow {
    pub fn exit_code(&self) -> i32 {
        match self {
            ControlFlow::Quit => 0,
            ControlFlow::Stop => 2,
        }
    }
}

impl fmt::Display for ControlFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlFlow::Quit => write!(f, "quit"),
            ControlFlow::Stop => write!(f, "stop"),
        }
    }
}

/// Outcome of executing a single command: either it produced a value, it
/// asked to end the session, or it failed.
pub type CmdResult<T> = Result<T, CmdOutcome>;

#[derive(Debug)]
pub enum CmdOutcome {
    Err(HexpeekError),
    Done(ControlFlow),
}

impl From<HexpeekError> for CmdOutcome {
    fn from(e: HexpeekError) -> Self {
        CmdOutcome::Err(e)
    }
}

impl From<io::Error> for CmdOutcome {
    fn from(e: io::Error) -> Self {
        CmdOutcome::Err(e.into())
    }
}

impl From<nix::Error> for CmdOutcome {
    fn from(e: nix::Error) -> Self {
        CmdOutcome::Err(e.into())
    }
}
