//! System call surface.
//!
//! Thin wrappers over the [`Kernel`] API that speak in plain integers: ids
//! are `i32`, failures are the sentinels [`NOPROC`], [`NOTHREAD`],
//! [`NOFILE`] or `-1`. Nothing here panics on bad input.

use core::time::Duration;

use crate::config::DEFAULT_CONNECT_TIMEOUT;
use crate::error::{KResult, KernelError};
use crate::ipc::socket::ShutdownMode;
use crate::kernel::Kernel;
use crate::process::{ProcessId, Task, ThreadId};
use crate::scheduler::ContextFlags;
use crate::stream::Fid;

/// No such process.
pub const NOPROC: i32 = -1;

/// No such thread.
pub const NOTHREAD: i32 = -1;

/// No such stream.
pub const NOFILE: i32 = -1;

/// System call numbers, used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallNumber {
    // ==========================================
    // Processes (0-9)
    // ==========================================
    Exec = 0,
    Exit = 1,
    WaitChild = 2,
    GetPid = 3,
    GetPPid = 4,

    // ==========================================
    // Threads (10-19)
    // ==========================================
    CreateThread = 10,
    ThreadSelf = 11,
    ThreadJoin = 12,
    ThreadDetach = 13,
    ThreadExit = 14,
    ThreadInterrupt = 15,
    ThreadIsInterrupted = 16,
    ThreadClearInterrupt = 17,

    // ==========================================
    // Streams (20-29)
    // ==========================================
    Read = 20,
    Write = 21,
    Close = 22,
    Dup2 = 23,
    Pipe = 24,
    OpenInfo = 25,

    // ==========================================
    // Sockets (30-39)
    // ==========================================
    Socket = 30,
    Listen = 31,
    Accept = 32,
    Connect = 33,
    ShutDown = 34,
}

#[inline]
fn trace(k: &Kernel, call: SyscallNumber) {
    #[cfg(feature = "trace-syscalls")]
    if let Some(ctx) = k.scheduler().current() {
        log::trace!(
            "[KPIO Syscall] pid {} tid {:?}: {:?}",
            ctx.owner(),
            ctx.thread(),
            call
        );
    }
}

fn status<T>(result: KResult<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(_) => -1,
    }
}

fn to_fid(raw: i32) -> KResult<Fid> {
    usize::try_from(raw)
        .map(Fid)
        .map_err(|_| KernelError::InvalidArgument)
}

fn to_tid(raw: i32) -> KResult<ThreadId> {
    usize::try_from(raw)
        .map(ThreadId)
        .map_err(|_| KernelError::InvalidArgument)
}

fn to_port(raw: i32) -> KResult<u16> {
    u16::try_from(raw).map_err(|_| KernelError::InvalidArgument)
}

fn fid_or_nofile(result: KResult<Fid>) -> i32 {
    result.map_or(NOFILE, |fid| fid.0 as i32)
}

// ── Processes ───────────────────────────────────────────────

/// Start a child process running `task`. Returns its pid or [`NOPROC`].
pub fn sys_exec(k: &Kernel, task: Task, args: &[u8]) -> i32 {
    trace(k, SyscallNumber::Exec);
    k.exec(Some(task), args).map_or(NOPROC, |pid| pid.0 as i32)
}

/// Terminate the calling process.
pub fn sys_exit(k: &Kernel, exit_value: i32) -> ! {
    trace(k, SyscallNumber::Exit);
    k.exit(exit_value)
}

/// Reap child `cpid`, or any child if `cpid` is [`NOPROC`]. Stores the
/// exit value in `status` and returns the reaped pid, or [`NOPROC`].
pub fn sys_wait_child(k: &Kernel, cpid: i32, status: Option<&mut i32>) -> i32 {
    trace(k, SyscallNumber::WaitChild);
    let target = if cpid == NOPROC {
        None
    } else {
        match usize::try_from(cpid) {
            Ok(pid) => Some(ProcessId(pid)),
            Err(_) => return NOPROC,
        }
    };
    match k.wait_child(target) {
        Ok((pid, exit_value)) => {
            if let Some(status) = status {
                *status = exit_value;
            }
            pid.0 as i32
        }
        Err(_) => NOPROC,
    }
}

pub fn sys_get_pid(k: &Kernel) -> i32 {
    trace(k, SyscallNumber::GetPid);
    k.get_pid().map_or(NOPROC, |pid| pid.0 as i32)
}

/// Parent pid, or [`NOPROC`] for idle and init.
pub fn sys_get_ppid(k: &Kernel) -> i32 {
    trace(k, SyscallNumber::GetPPid);
    match k.get_ppid() {
        Ok(Some(ppid)) => ppid.0 as i32,
        _ => NOPROC,
    }
}

// ── Threads ─────────────────────────────────────────────────

/// Start a thread in the calling process. Returns its tid or [`NOTHREAD`].
pub fn sys_create_thread(k: &Kernel, task: Task, args: &[u8]) -> i32 {
    trace(k, SyscallNumber::CreateThread);
    k.create_thread(task, args)
        .map_or(NOTHREAD, |tid| tid.0 as i32)
}

pub fn sys_thread_self(k: &Kernel) -> i32 {
    trace(k, SyscallNumber::ThreadSelf);
    k.thread_self().map_or(NOTHREAD, |tid| tid.0 as i32)
}

/// Wait for thread `tid`. On success returns 0 and, if the thread exited
/// rather than being detached, stores its exit value in `exit_value`.
pub fn sys_thread_join(k: &Kernel, tid: i32, exit_value: Option<&mut i32>) -> i32 {
    trace(k, SyscallNumber::ThreadJoin);
    match to_tid(tid).and_then(|tid| k.thread_join(tid)) {
        Ok(value) => {
            if let (Some(out), Some(value)) = (exit_value, value) {
                *out = value;
            }
            0
        }
        Err(_) => -1,
    }
}

pub fn sys_thread_detach(k: &Kernel, tid: i32) -> i32 {
    trace(k, SyscallNumber::ThreadDetach);
    status(to_tid(tid).and_then(|tid| k.thread_detach(tid)))
}

/// Terminate the calling thread. The main thread takes the whole process
/// down with it.
pub fn sys_thread_exit(k: &Kernel, exit_value: i32) -> ! {
    trace(k, SyscallNumber::ThreadExit);
    let Some(me) = k.scheduler().current() else {
        log::error!("[KPIO Thread] thread exit outside any execution context");
        panic!("thread exit outside any execution context");
    };
    if me.flags().contains(ContextFlags::MAIN) {
        k.exit(exit_value)
    }
    k.thread_exit(exit_value);
    k.scheduler().exit_current(&me)
}

pub fn sys_thread_interrupt(k: &Kernel, tid: i32) -> i32 {
    trace(k, SyscallNumber::ThreadInterrupt);
    status(to_tid(tid).and_then(|tid| k.thread_interrupt(tid)))
}

/// 1 if the calling thread's interrupt flag is set, else 0.
pub fn sys_thread_is_interrupted(k: &Kernel) -> i32 {
    trace(k, SyscallNumber::ThreadIsInterrupted);
    k.thread_is_interrupted().map_or(0, i32::from)
}

pub fn sys_thread_clear_interrupt(k: &Kernel) {
    trace(k, SyscallNumber::ThreadClearInterrupt);
    let _ = k.thread_clear_interrupt();
}

// ── Streams ─────────────────────────────────────────────────

/// Stream ids of a pipe as returned by [`sys_pipe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeT {
    pub read: i32,
    pub write: i32,
}

impl Default for PipeT {
    fn default() -> Self {
        PipeT {
            read: NOFILE,
            write: NOFILE,
        }
    }
}

/// Create a pipe, storing both ids in `pipe`. Returns 0 or -1.
pub fn sys_pipe(k: &Kernel, pipe: &mut PipeT) -> i32 {
    trace(k, SyscallNumber::Pipe);
    match k.pipe() {
        Ok(fids) => {
            pipe.read = fids.read.0 as i32;
            pipe.write = fids.write.0 as i32;
            0
        }
        Err(_) => -1,
    }
}

/// Returns the number of bytes read (0 at end of stream) or -1.
pub fn sys_read(k: &Kernel, fid: i32, buf: &mut [u8]) -> i32 {
    trace(k, SyscallNumber::Read);
    to_fid(fid)
        .and_then(|fid| k.read(fid, buf))
        .map_or(-1, |n| n as i32)
}

/// Returns the number of bytes written or -1.
pub fn sys_write(k: &Kernel, fid: i32, buf: &[u8]) -> i32 {
    trace(k, SyscallNumber::Write);
    to_fid(fid)
        .and_then(|fid| k.write(fid, buf))
        .map_or(-1, |n| n as i32)
}

pub fn sys_close(k: &Kernel, fid: i32) -> i32 {
    trace(k, SyscallNumber::Close);
    status(to_fid(fid).and_then(|fid| k.close(fid)))
}

pub fn sys_dup2(k: &Kernel, old: i32, new: i32) -> i32 {
    trace(k, SyscallNumber::Dup2);
    status(to_fid(old).and_then(|old| k.dup2(old, to_fid(new)?)))
}

/// Open a process-info stream. Returns its id or [`NOFILE`].
pub fn sys_open_info(k: &Kernel) -> i32 {
    trace(k, SyscallNumber::OpenInfo);
    fid_or_nofile(k.open_info())
}

// ── Sockets ─────────────────────────────────────────────────

/// Create a socket bound to `port`. Returns its id or [`NOFILE`].
pub fn sys_socket(k: &Kernel, port: i32) -> i32 {
    trace(k, SyscallNumber::Socket);
    fid_or_nofile(to_port(port).and_then(|port| k.socket(port)))
}

pub fn sys_listen(k: &Kernel, sock: i32) -> i32 {
    trace(k, SyscallNumber::Listen);
    status(to_fid(sock).and_then(|sock| k.listen(sock)))
}

/// Wait for a connection on `lsock`. Returns the new peer's id or
/// [`NOFILE`].
pub fn sys_accept(k: &Kernel, lsock: i32) -> i32 {
    trace(k, SyscallNumber::Accept);
    fid_or_nofile(to_fid(lsock).and_then(|lsock| k.accept(lsock)))
}

/// Connect `sock` to the listener on `port`, waiting at most
/// `timeout_ms` milliseconds (0 selects the default timeout).
pub fn sys_connect(k: &Kernel, sock: i32, port: i32, timeout_ms: u64) -> i32 {
    trace(k, SyscallNumber::Connect);
    let timeout = if timeout_ms == 0 {
        DEFAULT_CONNECT_TIMEOUT
    } else {
        Duration::from_millis(timeout_ms)
    };
    status(
        to_fid(sock)
            .and_then(|sock| Ok((sock, to_port(port)?)))
            .and_then(|(sock, port)| k.connect(sock, port, timeout)),
    )
}

/// Shut down part of a peer connection; `how` is 1 (read), 2 (write) or
/// 3 (both).
pub fn sys_shutdown(k: &Kernel, sock: i32, how: i32) -> i32 {
    trace(k, SyscallNumber::ShutDown);
    status(
        to_fid(sock)
            .and_then(|sock| Ok((sock, ShutdownMode::from_raw(how)?)))
            .and_then(|(sock, mode)| k.shutdown(sock, mode)),
    )
}
