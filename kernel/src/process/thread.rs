//! Thread Table
//!
//! One [`ProcessThread`] slot per live thread across all processes. A slot
//! carries a join reference count: the thread itself holds one share until
//! it exits and every blocked joiner holds one until it has read the exit
//! value. The slot is reclaimed when the count reaches zero.
//!
//! Slot lifecycle:
//!
//! ```text
//! Free -> Active -> Exiting -> Free
//!           |                   ^
//!           +-- detached -------+   (joiners released, only the own share left)
//! ```

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::{ProcessId, Task, ThreadId};
use crate::error::{KResult, KernelError};
use crate::kernel::{Kernel, KernelState};
use crate::scheduler::{Context, ContextFlags, ContextRef, Scheduler};
use crate::sync::CondVar;

/// Thread slot state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Slot is on the free list
    Free,
    /// Thread is running
    Active,
    /// Thread has exited; joiners are still reading its exit value
    Exiting,
}

/// Process thread control block
pub struct ProcessThread {
    pub state: ThreadState,
    /// Owning process
    pub owner: Option<ProcessId>,
    /// Generation of the owner's process slot
    pub owner_generation: u64,
    /// Execution context running this thread
    pub context: Option<ContextRef>,
    pub task: Option<Task>,
    /// Argument blob, owned by this thread
    pub args: Vec<u8>,
    pub detached: bool,
    /// Exit value, set on exit
    pub exit_value: Option<i32>,
    /// Join reference count
    pub refcount: usize,
    /// Bumped every time the slot is reclaimed
    pub generation: u64,
    /// Signaled on exit and on detach
    pub join_signal: Arc<CondVar>,
}

impl ProcessThread {
    fn free(generation: u64) -> Self {
        ProcessThread {
            state: ThreadState::Free,
            owner: None,
            owner_generation: 0,
            context: None,
            task: None,
            args: Vec::new(),
            detached: false,
            exit_value: None,
            refcount: 0,
            generation,
            join_signal: Arc::new(CondVar::new()),
        }
    }
}

/// Snapshot of a thread slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    pub state: ThreadState,
    pub owner: Option<ProcessId>,
    pub detached: bool,
    pub exit_value: Option<i32>,
    pub refcount: usize,
}

/// Global thread table
pub struct ThreadTable {
    slots: Vec<ProcessThread>,
    free: Vec<ThreadId>,
}

impl ThreadTable {
    pub fn new(capacity: usize) -> Self {
        ThreadTable {
            slots: (0..capacity).map(|_| ProcessThread::free(0)).collect(),
            free: (0..capacity).rev().map(ThreadId).collect(),
        }
    }

    /// Claim a slot for a new thread of `owner` (in its process slot
    /// generation `owner_generation`) with one (own) share.
    pub fn acquire(
        &mut self,
        owner: ProcessId,
        owner_generation: u64,
        task: Option<Task>,
        args: &[u8],
    ) -> Option<ThreadId> {
        let tid = self.free.pop()?;
        let slot = &mut self.slots[tid.0];
        slot.state = ThreadState::Active;
        slot.owner = Some(owner);
        slot.owner_generation = owner_generation;
        slot.task = task;
        slot.args = args.to_vec();
        slot.detached = false;
        slot.exit_value = None;
        slot.refcount = 1;
        Some(tid)
    }

    pub fn bind_context(&mut self, tid: ThreadId, context: ContextRef) {
        if let Some(slot) = self.get_mut(tid) {
            slot.context = Some(context);
        }
    }

    /// Clear a slot and return it to the free list.
    pub fn reclaim(&mut self, tid: ThreadId) {
        let Some(slot) = self.slots.get_mut(tid.0) else {
            return;
        };
        if slot.state == ThreadState::Free {
            return;
        }
        *slot = ProcessThread::free(slot.generation.wrapping_add(1));
        self.free.push(tid);
    }

    /// Drop one join share; reclaims the slot when none remain.
    ///
    /// Returns true if the slot was reclaimed.
    pub fn release_share(&mut self, tid: ThreadId) -> bool {
        let Some(slot) = self.get_mut(tid) else {
            return false;
        };
        slot.refcount = slot.refcount.saturating_sub(1);
        if slot.refcount == 0 {
            self.reclaim(tid);
            true
        } else {
            false
        }
    }

    /// A non-free slot.
    pub fn get(&self, tid: ThreadId) -> Option<&ProcessThread> {
        self.slots
            .get(tid.0)
            .filter(|t| t.state != ThreadState::Free)
    }

    pub fn get_mut(&mut self, tid: ThreadId) -> Option<&mut ProcessThread> {
        self.slots
            .get_mut(tid.0)
            .filter(|t| t.state != ThreadState::Free)
    }

    /// The slot `ctx` runs on, unless it has since been reclaimed.
    pub fn slot_of(&self, ctx: &Context) -> Option<(ThreadId, &ProcessThread)> {
        let tid = ctx.thread()?;
        self.get(tid)
            .filter(|t| t.generation == ctx.thread_generation())
            .map(|t| (tid, t))
    }

    /// Number of running threads owned by `pid` in its process slot
    /// generation `generation`.
    pub fn count_owned(&self, pid: ProcessId, generation: u64) -> usize {
        self.slots
            .iter()
            .filter(|t| {
                t.state == ThreadState::Active
                    && t.owner == Some(pid)
                    && t.owner_generation == generation
            })
            .count()
    }

    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Mark the thread of `me` exited with `exit_value`, wake every joiner
    /// and drop the thread's own share.
    ///
    /// Only the first call for a given slot generation has any effect.
    pub(crate) fn finish(&mut self, sched: &dyn Scheduler, me: &Context, exit_value: i32) {
        let Some((tid, _)) = self.slot_of(me) else {
            return;
        };
        let Some(slot) = self.get_mut(tid) else {
            return;
        };
        if slot.state != ThreadState::Active {
            return;
        }
        slot.state = ThreadState::Exiting;
        slot.exit_value = Some(exit_value);
        slot.task = None;
        slot.args = Vec::new();
        slot.context = None;
        let joiners = slot.join_signal.broadcast(sched);
        log::debug!(
            "[KPIO Thread] thread {} exited with {} ({} joiners)",
            tid,
            exit_value,
            joiners
        );
        self.release_share(tid);
    }
}

impl Kernel {
    /// Create a new thread in the calling process.
    pub fn create_thread(&self, task: Task, args: &[u8]) -> KResult<ThreadId> {
        let me = self.current_context()?;
        let pid = me.owner();

        let mut st = self.lock();
        let owner_generation = st
            .procs
            .owner_of(&me)
            .filter(|p| p.is_alive())
            .map(|p| p.generation)
            .ok_or(KernelError::IllegalState)?;
        let tid = st
            .threads
            .acquire(pid, owner_generation, Some(task), args)
            .ok_or_else(|| {
                log::warn!("[KPIO Thread] thread table exhausted");
                KernelError::ResourceExhausted
            })?;
        let generation = st.threads.get(tid).map_or(0, |t| t.generation);

        let ctx = Context::with_generations(
            pid,
            owner_generation,
            Some(tid),
            generation,
            ContextFlags::empty(),
        );
        let kernel = self.clone();
        if let Err(e) = self
            .scheduler()
            .spawn(ctx.clone(), Box::new(move || kernel.start_thread()))
        {
            st.threads.reclaim(tid);
            return Err(e);
        }
        st.threads.bind_context(tid, ctx.clone());
        self.scheduler().wakeup(&ctx);

        log::debug!("[KPIO Thread] process {} created thread {}", pid, tid);
        Ok(tid)
    }

    // Runs on the new context: call the task, then leave through ThreadExit.
    fn start_thread(&self) {
        let Some(me) = self.scheduler().current() else {
            return;
        };
        let entry = {
            let st = self.lock();
            st.threads
                .slot_of(&me)
                .and_then(|(_, t)| t.task.map(|task| (task, t.args.clone())))
        };
        if let Some((task, args)) = entry {
            let exit_value = task(self, &args);
            self.thread_exit(exit_value);
        }
        self.scheduler().exit_current(&me);
    }

    /// Thread-table index of the calling thread. Fails once the thread's
    /// slot has been reclaimed.
    pub fn thread_self(&self) -> KResult<ThreadId> {
        let me = self.current_context()?;
        let st = self.lock();
        st.threads
            .slot_of(&me)
            .map(|(tid, _)| tid)
            .ok_or(KernelError::IllegalState)
    }

    /// Wait for `tid` to exit.
    ///
    /// Returns `Ok(Some(value))` with the target's exit value, or
    /// `Ok(None)` if a `thread_detach` released this joiner first.
    pub fn thread_join(&self, tid: ThreadId) -> KResult<Option<i32>> {
        let me = self.current_context()?;
        let sched = self.scheduler();

        let mut st = self.lock();
        let target = st.threads.get_mut(tid).ok_or(KernelError::InvalidArgument)?;
        if target.owner != Some(me.owner())
            || target.owner_generation != me.owner_generation()
            || target.state != ThreadState::Active
        {
            return Err(KernelError::InvalidArgument);
        }
        let is_self = me.thread() == Some(tid) && me.thread_generation() == target.generation;
        if is_self || target.detached {
            return Err(KernelError::IllegalState);
        }

        target.refcount += 1;
        let generation = target.generation;
        let signal = target.join_signal.clone();

        loop {
            let Some(target) = st.threads.get(tid).filter(|t| t.generation == generation) else {
                return Ok(None);
            };
            if target.state == ThreadState::Exiting {
                let value = target.exit_value;
                st.threads.release_share(tid);
                return Ok(value);
            }
            if target.detached {
                return Ok(None);
            }
            st = signal.wait(sched, &me, self.state_lock(), st);
        }
    }

    /// Detach `tid`: it can no longer be joined and current joiners are
    /// released.
    pub fn thread_detach(&self, tid: ThreadId) -> KResult<()> {
        let mut st = self.lock();
        let target = st.threads.get_mut(tid).ok_or(KernelError::InvalidArgument)?;
        if target.state != ThreadState::Active {
            return Err(KernelError::IllegalState);
        }
        if target.detached {
            return Ok(());
        }
        target.join_signal.broadcast(self.scheduler());
        target.detached = true;
        target.refcount = 1;
        log::debug!("[KPIO Thread] thread {} detached", tid);
        Ok(())
    }

    /// Exit bookkeeping for the calling thread. Does not stop the
    /// context; see [`syscall::sys_thread_exit`](crate::syscall::sys_thread_exit).
    /// Calling it again from the same thread does nothing.
    pub fn thread_exit(&self, exit_value: i32) {
        let Ok(me) = self.current_context() else {
            return;
        };
        let mut st = self.lock();
        st.threads.finish(self.scheduler(), &me, exit_value);
    }

    /// Set the interrupt flag of `tid` and wake it.
    pub fn thread_interrupt(&self, tid: ThreadId) -> KResult<()> {
        let st = self.lock();
        let target = st
            .threads
            .get(tid)
            .filter(|t| t.state == ThreadState::Active)
            .ok_or(KernelError::InvalidArgument)?;
        let ctx = target.context.clone().ok_or(KernelError::IllegalState)?;
        ctx.set_flags(ContextFlags::INTERRUPTED);
        self.scheduler().wakeup(&ctx);
        Ok(())
    }

    /// Interrupt flag of the calling thread.
    pub fn thread_is_interrupted(&self) -> KResult<bool> {
        Ok(self.current_context()?.is_interrupted())
    }

    pub fn thread_clear_interrupt(&self) -> KResult<()> {
        self.current_context()?
            .clear_flags(ContextFlags::INTERRUPTED);
        Ok(())
    }

    /// Snapshot of a thread slot.
    pub fn thread_info(&self, tid: ThreadId) -> Option<ThreadInfo> {
        let st = self.lock();
        st.threads.get(tid).map(|t| ThreadInfo {
            state: t.state,
            owner: t.owner,
            detached: t.detached,
            exit_value: t.exit_value,
            refcount: t.refcount,
        })
    }
}
