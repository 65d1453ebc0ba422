//! Kernel instance.
//!
//! [`Kernel`] is a cheap, clonable handle. It owns the kernel lock, which
//! guards the process, thread and stream tables together, the socket
//! layer and the execution-context provider everything runs on.

use alloc::sync::Arc;
use spin::{Mutex, MutexGuard};

use crate::config::KernelConfig;
use crate::error::{KResult, KernelError};
use crate::ipc::socket::SocketLayer;
use crate::process::{ProcessId, ProcessTable, Task, ThreadTable};
use crate::scheduler::{Context, ContextFlags, ContextRef, Scheduler};
use crate::stream::FileTable;
use crate::sync::CondVar;

/// Everything protected by the kernel lock.
pub struct KernelState {
    pub procs: ProcessTable,
    pub threads: ThreadTable,
    pub files: FileTable,
}

struct KernelInner {
    config: KernelConfig,
    sched: Arc<dyn Scheduler>,
    state: Mutex<KernelState>,
    /// Signaled when init becomes a zombie.
    shutdown: CondVar,
    sockets: Arc<SocketLayer>,
}

/// Handle to a running kernel.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    /// Bring up a kernel on `sched`.
    ///
    /// The calling unit of execution becomes the idle process (pid 0); init
    /// (pid 1) starts running `init` with `args`. Halts if either process
    /// does not get its reserved pid.
    pub fn boot(config: KernelConfig, sched: Arc<dyn Scheduler>, init: Task, args: &[u8]) -> Kernel {
        let kernel = Kernel {
            inner: Arc::new(KernelInner {
                state: Mutex::new(KernelState {
                    procs: ProcessTable::new(config.max_proc, config.max_fileid),
                    threads: ThreadTable::new(config.max_threads),
                    files: FileTable::new(config.max_files),
                }),
                shutdown: CondVar::new(),
                sockets: SocketLayer::new(sched.clone(), config),
                sched,
                config,
            }),
        };

        let idle = Context::new(ProcessId::IDLE, None, ContextFlags::MAIN);
        kernel.scheduler().adopt(idle);

        match kernel.exec(None, &[]) {
            Ok(ProcessId::IDLE) => {}
            other => {
                log::error!("[KPIO Proc] idle process did not get pid 0: {:?}", other);
                panic!("idle process did not get pid 0");
            }
        }
        match kernel.exec(Some(init), args) {
            Ok(ProcessId::INIT) => {}
            other => {
                log::error!("[KPIO Proc] init process did not get pid 1: {:?}", other);
                panic!("init process did not get pid 1");
            }
        }

        log::info!(
            "[KPIO Proc] kernel up: {} procs, {} threads, {} streams",
            kernel.config().max_proc,
            kernel.config().max_threads,
            kernel.config().max_files
        );
        kernel
    }

    /// Block the idle process until init has exited; returns init's exit
    /// value.
    pub fn wait_for_shutdown(&self) -> KResult<i32> {
        let me = self.current_context()?;
        let mut st = self.lock();
        loop {
            match st.procs.get(ProcessId::INIT) {
                Some(init) if init.is_zombie() => {
                    log::info!("[KPIO Proc] init exited with {}", init.exit_value);
                    return Ok(init.exit_value);
                }
                Some(_) => {}
                None => return Err(KernelError::IllegalState),
            }
            st = self
                .inner
                .shutdown
                .wait(self.scheduler(), &me, self.state_lock(), st);
        }
    }

    pub(crate) fn signal_shutdown(&self) {
        self.inner.shutdown.broadcast(self.scheduler());
    }

    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        &*self.inner.sched
    }

    pub(crate) fn scheduler_arc(&self) -> Arc<dyn Scheduler> {
        self.inner.sched.clone()
    }

    pub(crate) fn sockets(&self) -> &Arc<SocketLayer> {
        &self.inner.sockets
    }

    /// Acquire the kernel lock.
    pub(crate) fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.inner.state.lock()
    }

    pub(crate) fn state_lock(&self) -> &Mutex<KernelState> {
        &self.inner.state
    }

    /// The calling execution context.
    pub fn current_context(&self) -> KResult<ContextRef> {
        self.scheduler().current().ok_or(KernelError::NoContext)
    }

    /// Number of live or zombie processes, idle and init included.
    pub fn process_count(&self) -> usize {
        self.lock().procs.count()
    }

    /// Number of thread slots not on the free list.
    pub fn thread_slots_in_use(&self) -> usize {
        self.lock().threads.in_use()
    }

    /// Number of open stream-table entries.
    pub fn open_file_count(&self) -> usize {
        self.lock().files.in_use()
    }

    /// Number of sockets not yet closed.
    pub fn socket_count(&self) -> usize {
        self.sockets().count()
    }
}
