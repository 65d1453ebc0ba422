//! Kernel configuration constants.
//!
//! This module contains the default sizes of every fixed-capacity table.
//! A [`KernelConfig`] built from these values is handed to
//! [`Kernel::boot`](crate::Kernel::boot); tests shrink individual limits to
//! reach the exhaustion paths.

use core::time::Duration;

/// Maximum number of processes (process table slots).
pub const MAX_PROC: usize = 1024;

/// Maximum number of threads across all processes (thread table slots).
pub const MAX_THREADS: usize = 1024;

/// Open-stream slots per process.
pub const MAX_FILEID: usize = 16;

/// Stream table slots shared by the whole kernel.
pub const MAX_FILES: usize = 512;

/// Bytes buffered by one pipe direction (8 KB).
pub const PIPE_BUFFER_SIZE: usize = 8 * 1024;

/// Highest valid socket port.
pub const MAX_PORT: u16 = 1023;

/// The "no port" sentinel. Never a valid port for `Socket`.
pub const NOPORT: u16 = 0;

/// Connect timeout used by the syscall layer when the caller passes zero.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Argument bytes copied into each process-info record.
pub const PROCINFO_MAX_ARGS_SIZE: usize = 128;

/// Per-instance kernel limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Process table capacity.
    pub max_proc: usize,
    /// Thread table capacity.
    pub max_threads: usize,
    /// Open-stream slots per process.
    pub max_fileid: usize,
    /// Stream table capacity.
    pub max_files: usize,
    /// Pipe buffer capacity in bytes.
    pub pipe_buffer_size: usize,
    /// Highest valid socket port.
    pub max_port: u16,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            max_proc: MAX_PROC,
            max_threads: MAX_THREADS,
            max_fileid: MAX_FILEID,
            max_files: MAX_FILES,
            pipe_buffer_size: PIPE_BUFFER_SIZE,
            max_port: MAX_PORT,
        }
    }
}

impl KernelConfig {
    pub fn with_max_proc(mut self, n: usize) -> Self {
        self.max_proc = n;
        self
    }

    pub fn with_max_threads(mut self, n: usize) -> Self {
        self.max_threads = n;
        self
    }

    pub fn with_max_fileid(mut self, n: usize) -> Self {
        self.max_fileid = n;
        self
    }

    pub fn with_max_files(mut self, n: usize) -> Self {
        self.max_files = n;
        self
    }

    pub fn with_pipe_buffer_size(mut self, n: usize) -> Self {
        self.pipe_buffer_size = n;
        self
    }

    pub fn with_max_port(mut self, port: u16) -> Self {
        self.max_port = port;
        self
    }

    /// Whether `port` may be bound by `Socket`.
    pub fn is_valid_port(&self, port: u16) -> bool {
        port != NOPORT && port <= self.max_port
    }
}
