//! The crate-wide error type.
//!
//! Mirrors the taxonomy of `libafl::Error`: a flat enum with named constructor
//! functions rather than a `thiserror`-derived hierarchy, because every variant
//! here already carries the context it needs and none of them wrap a foreign
//! error type that would benefit from `#[from]`.

use std::fmt;

/// Something went wrong running the worker.
#[derive(Debug)]
pub enum Error {
    /// A CLI or environment option failed validation.
    Config(String),
    /// The manager rejected our capability set during the check handshake.
    CapabilityMismatch(String),
    /// A manager RPC failed or the manager is unreachable.
    Rpc(String),
    /// The executor child process could not be talked to; recoverable by the
    /// caller via respawn.
    Executor(String),
    /// A peer sent us something our own pipeline could not have produced,
    /// e.g. a program that fails to deserialize. Always a bug, always fatal.
    InvariantViolation(String),
    /// Any other I/O failure (file probes, log sinks, etc).
    Io(std::io::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn capability_mismatch(msg: impl Into<String>) -> Self {
        Error::CapabilityMismatch(msg.into())
    }

    pub fn rpc(msg: impl Into<String>) -> Self {
        Error::Rpc(msg.into())
    }

    pub fn executor(msg: impl Into<String>) -> Self {
        Error::Executor(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolation(msg.into())
    }

    /// True for the categories that must terminate the process immediately.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Executor(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(m) => write!(f, "configuration error: {m}"),
            Error::CapabilityMismatch(m) => write!(f, "capability mismatch: {m}"),
            Error::Rpc(m) => write!(f, "manager rpc failed: {m}"),
            Error::Executor(m) => write!(f, "executor transport error: {m}"),
            Error::InvariantViolation(m) => write!(f, "invariant violation (peer bug): {m}"),
            Error::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
