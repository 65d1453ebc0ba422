//! Process and Thread Management
//!
//! This module provides the process table (exec, exit, wait), the thread
//! table (create, join, detach, interrupt, exit) and the process-info
//! snapshot stream.

pub mod info;
pub mod manager;
pub mod table;
pub mod thread;

use crate::kernel::Kernel;

pub use info::{InfoStream, ProcInfo};
pub use table::{Process, ProcessState, ProcessTable};
pub use thread::{ProcessThread, ThreadInfo, ThreadState, ThreadTable};

/// Process ID type (index into the process table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub usize);

impl ProcessId {
    /// Bootstrap/idle process ID (always 0)
    pub const IDLE: ProcessId = ProcessId(0);

    /// Init process ID (always 1)
    pub const INIT: ProcessId = ProcessId(1);

    /// Processes that never get a parent.
    pub fn is_parentless(&self) -> bool {
        self.0 <= Self::INIT.0
    }
}

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread ID type (index into the thread table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub usize);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entry point of a process main thread or of a thread.
///
/// Receives the kernel and the task's own copy of its argument blob; the
/// return value becomes the exit value.
pub type Task = fn(&Kernel, &[u8]) -> i32;
