//! KPIO Kernel Core
//!
//! The process, thread and IPC layer of the KPIO teaching kernel.
//!
//! # Architecture
//!
//! - `scheduler`: the execution-context provider interface (`Scheduler`,
//!   `Context`) plus a hosted provider backed by OS threads
//! - `sync`: wait-set condition variable used for every blocking call
//! - `process`: process table, exec/exit/wait, thread table and join/detach
//! - `stream`: reference-counted stream table and per-variant dispatch
//! - `ipc`: pipes and the listen/accept/connect socket rendezvous
//! - `syscall`: the sentinel-returning system call surface
//!
//! All table mutations are serialized by the single kernel lock owned by
//! [`Kernel`]. Sockets use a second, narrower lock of their own.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod config;
pub mod error;
pub mod ipc;
pub mod kernel;
pub mod process;
pub mod scheduler;
pub mod stream;
pub mod sync;
pub mod syscall;

#[cfg(all(test, feature = "std"))]
mod tests;

pub use config::KernelConfig;
pub use error::{KResult, KernelError};
pub use kernel::Kernel;
pub use process::{ProcessId, Task, ThreadId};
pub use stream::Fid;
