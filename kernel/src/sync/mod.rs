//! Synchronization primitives built on the execution-context provider.

pub mod condvar;

pub use condvar::CondVar;
