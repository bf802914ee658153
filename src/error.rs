//! Error types for the profiler
//!
//! A corrupted call stack is fatal and kept apart from configuration and
//! I/O failures so callers can tell "stop feeding events" from "fix the
//! setup and retry".

use thiserror::Error;

use crate::call_site::CallSite;
use crate::event::ContextId;

/// Errors that can occur while profiling
#[derive(Error, Debug)]
pub enum ProfilerError {
    /// A return did not close the context's innermost open call
    #[error("corrupted call stack on {context}: return from {call_site} does not match the innermost call")]
    CorruptedStack {
        context: ContextId,
        call_site: CallSite,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] nix::errno::Errno),

    #[error("Malformed event on line {line}: {message}")]
    Replay { line: usize, message: String },
}

impl ProfilerError {
    /// Fatal errors invalidate all timing data of the session
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProfilerError::CorruptedStack { .. })
    }
}

/// Result type for profiler operations
pub type Result<T> = std::result::Result<T, ProfilerError>;
