//! Anonymous pipes.
//!
//! A pipe is one bounded byte buffer shared by two stream-table entries:
//! the read half and the write half. Each half has its own open flag.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use spin::Mutex;

use crate::error::{KResult, KernelError};
use crate::kernel::Kernel;
use crate::scheduler::{ContextRef, Scheduler};
use crate::stream::{Fid, FileOps, StreamObject};
use crate::sync::CondVar;

/// Pipe buffer state.
struct PipeBuffer {
    /// Buffered bytes, oldest first.
    data: VecDeque<u8>,

    /// Maximum number of buffered bytes.
    capacity: usize,

    /// Read half still open.
    read_open: bool,

    /// Write half still open.
    write_open: bool,

    /// Set when data was discarded or a write hit a closed reader.
    error: bool,
}

/// A unidirectional byte pipe.
pub struct Pipe {
    sched: Arc<dyn Scheduler>,
    buffer: Mutex<PipeBuffer>,
    /// Signaled when bytes arrive or the writer closes.
    has_data: CondVar,
    /// Signaled when bytes are consumed or the reader closes.
    has_space: CondVar,
}

impl Pipe {
    /// Create an open pipe holding at most `capacity` bytes.
    pub fn new(sched: Arc<dyn Scheduler>, capacity: usize) -> Arc<Self> {
        Arc::new(Pipe {
            sched,
            buffer: Mutex::new(PipeBuffer {
                data: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
                read_open: true,
                write_open: true,
                error: false,
            }),
            has_data: CondVar::new(),
            has_space: CondVar::new(),
        })
    }

    /// Read up to `buf.len()` bytes.
    ///
    /// Blocks while the buffer is empty and the write half is open.
    /// Returns `Ok(0)` at end of stream.
    pub fn read(&self, me: &ContextRef, buf: &mut [u8]) -> KResult<usize> {
        let mut b = self.buffer.lock();
        loop {
            if !b.read_open {
                return Err(KernelError::IllegalState);
            }
            if buf.is_empty() {
                return Ok(0);
            }
            if !b.data.is_empty() {
                let n = buf.len().min(b.data.len());
                for (dst, src) in buf.iter_mut().zip(b.data.drain(..n)) {
                    *dst = src;
                }
                self.has_space.broadcast(&*self.sched);
                return Ok(n);
            }
            if !b.write_open {
                return Ok(0);
            }
            b = self.has_data.wait(&*self.sched, me, &self.buffer, b);
        }
    }

    /// Write up to `buf.len()` bytes.
    ///
    /// Blocks while the buffer is full and the read half is open, then
    /// writes as much as fits. Fails with `BrokenPeer` once the read half
    /// is closed.
    pub fn write(&self, me: &ContextRef, buf: &[u8]) -> KResult<usize> {
        let mut b = self.buffer.lock();
        loop {
            if !b.write_open {
                return Err(KernelError::IllegalState);
            }
            if !b.read_open {
                b.error = true;
                return Err(KernelError::BrokenPeer);
            }
            if buf.is_empty() {
                return Ok(0);
            }
            let space = b.capacity - b.data.len();
            if space > 0 {
                let n = buf.len().min(space);
                b.data.extend(&buf[..n]);
                self.has_data.broadcast(&*self.sched);
                return Ok(n);
            }
            b = self.has_space.wait(&*self.sched, me, &self.buffer, b);
        }
    }

    /// Close the read half. Unread bytes are discarded.
    ///
    /// Returns `BrokenPeer` if the pipe's error flag is set; the half is
    /// closed either way.
    pub fn close_reader(&self) -> KResult<()> {
        let mut b = self.buffer.lock();
        if b.read_open {
            b.read_open = false;
            if !b.data.is_empty() {
                log::debug!("[KPIO Pipe] reader closed with {} unread bytes", b.data.len());
                b.data.clear();
                b.error = true;
            }
            self.has_space.broadcast(&*self.sched);
            self.has_data.broadcast(&*self.sched);
        }
        if b.error {
            Err(KernelError::BrokenPeer)
        } else {
            Ok(())
        }
    }

    /// Close the write half. Readers drain what is left and then see end
    /// of stream.
    pub fn close_writer(&self) -> KResult<()> {
        let mut b = self.buffer.lock();
        if b.write_open {
            b.write_open = false;
            self.has_data.broadcast(&*self.sched);
            self.has_space.broadcast(&*self.sched);
        }
        if b.error {
            Err(KernelError::BrokenPeer)
        } else {
            Ok(())
        }
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_read_open(&self) -> bool {
        self.buffer.lock().read_open
    }

    pub fn is_write_open(&self) -> bool {
        self.buffer.lock().write_open
    }

    pub fn has_error(&self) -> bool {
        self.buffer.lock().error
    }
}

fn reader_read(obj: &StreamObject, me: &ContextRef, buf: &mut [u8]) -> KResult<usize> {
    match obj {
        StreamObject::PipeReader(pipe) => pipe.read(me, buf),
        _ => Err(KernelError::IllegalState),
    }
}

fn reader_close(obj: &StreamObject) -> KResult<()> {
    match obj {
        StreamObject::PipeReader(pipe) => pipe.close_reader(),
        _ => Err(KernelError::IllegalState),
    }
}

fn writer_write(obj: &StreamObject, me: &ContextRef, buf: &[u8]) -> KResult<usize> {
    match obj {
        StreamObject::PipeWriter(pipe) => pipe.write(me, buf),
        _ => Err(KernelError::IllegalState),
    }
}

fn writer_close(obj: &StreamObject) -> KResult<()> {
    match obj {
        StreamObject::PipeWriter(pipe) => pipe.close_writer(),
        _ => Err(KernelError::IllegalState),
    }
}

/// Read-half dispatch: no write.
pub static READER_OPS: FileOps = FileOps {
    open: None,
    read: Some(reader_read),
    write: None,
    close: Some(reader_close),
};

/// Write-half dispatch: no read.
pub static WRITER_OPS: FileOps = FileOps {
    open: None,
    read: None,
    write: Some(writer_write),
    close: Some(writer_close),
};

/// The two stream ids of a new pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeFids {
    pub read: Fid,
    pub write: Fid,
}

impl Kernel {
    /// Create a pipe in the calling process. Either both halves are
    /// installed or neither is.
    pub fn pipe(&self) -> KResult<PipeFids> {
        let pipe = Pipe::new(self.scheduler_arc(), self.config().pipe_buffer_size);
        let fids = self.open_streams(vec![
            StreamObject::PipeReader(pipe.clone()),
            StreamObject::PipeWriter(pipe),
        ])?;
        log::debug!("[KPIO Pipe] pipe created: read {} write {}", fids[0], fids[1]);
        Ok(PipeFids {
            read: fids[0],
            write: fids[1],
        })
    }
}
