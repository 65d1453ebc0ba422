//! Kernel error types.
//!
//! Every fallible kernel operation returns [`KResult`]. Nothing here is
//! fatal: the syscall layer turns each variant into the caller-visible
//! sentinel (`NOPROC`, `NOTHREAD`, `NOFILE` or `-1`).

use core::fmt;

/// Kernel error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No free process, thread or stream slot.
    ResourceExhausted,
    /// Out-of-range id, invalid port, malformed mode.
    InvalidArgument,
    /// Operation not legal in the target's current state.
    IllegalState,
    /// The other half of a pipe or socket is closed.
    BrokenPeer,
    /// A bounded wait elapsed.
    TimedOut,
    /// Called from outside any execution context.
    NoContext,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::ResourceExhausted => write!(f, "resource exhausted"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
            KernelError::IllegalState => write!(f, "illegal state"),
            KernelError::BrokenPeer => write!(f, "broken peer"),
            KernelError::TimedOut => write!(f, "timed out"),
            KernelError::NoContext => write!(f, "no execution context"),
        }
    }
}

/// Result alias used throughout the kernel.
pub type KResult<T> = core::result::Result<T, KernelError>;
