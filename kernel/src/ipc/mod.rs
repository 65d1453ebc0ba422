//! Inter-Process Communication (IPC) module.
//!
//! Byte-stream IPC between processes: bounded pipes, and sockets that
//! pair up through a listen/accept/connect rendezvous. A connected socket
//! pair is two pipes, one per direction.

pub mod pipe;
pub mod socket;

pub use pipe::{Pipe, PipeFids};
pub use socket::{ShutdownMode, SocketId, SocketLayer, SocketType};
