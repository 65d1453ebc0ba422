//! Execution-context provider interface.
//!
//! The kernel core never switches contexts itself. It asks a [`Scheduler`]
//! to spawn, wake and park [`Context`]s, and to tell it which context is
//! running. Scheduling is cooperative: a context only gives up the CPU
//! when it sleeps.

pub mod context;
#[cfg(feature = "std")]
pub mod hosted;

use alloc::boxed::Box;
use core::time::Duration;

use crate::error::KResult;

pub use context::{Context, ContextFlags, ContextId, ContextRef, ContextState};
#[cfg(feature = "std")]
pub use hosted::HostScheduler;

/// Entry point run by a freshly spawned context.
pub type ContextEntry = Box<dyn FnOnce() + Send + 'static>;

/// Execution-context provider.
pub trait Scheduler: Send + Sync {
    /// Create `context` running `entry`. The context does not run until
    /// the first [`wakeup`](Scheduler::wakeup).
    fn spawn(&self, context: ContextRef, entry: ContextEntry) -> KResult<()>;

    /// Bind the calling unit of execution to `context`.
    fn adopt(&self, context: ContextRef);

    /// Make `context` runnable. Returns false if it already exited.
    ///
    /// A wakeup delivered before the matching `sleep` is not lost.
    fn wakeup(&self, context: &ContextRef) -> bool;

    /// Park the calling context until woken. May return spuriously.
    fn sleep(&self, context: &ContextRef);

    /// Park the calling context until woken or `timeout` elapses.
    fn sleep_timeout(&self, context: &ContextRef, timeout: Duration);

    /// Terminate the calling context. Any kernel lock must already be
    /// released.
    fn exit_current(&self, context: &ContextRef) -> !;

    /// The calling context, if the caller is one.
    fn current(&self) -> Option<ContextRef>;

    /// Monotonic time since the provider started.
    fn now(&self) -> Duration;
}
