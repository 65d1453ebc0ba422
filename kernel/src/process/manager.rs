//! Process Manager
//!
//! Process creation, exit and reaping on top of the process table.
//!
//! A process is `Alive` from `exec` until `exit`, then a `Zombie` until a
//! waiter reaps it. Exiting processes hand their children to init, so
//! every zombie has exactly one reaper.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;

use super::{ProcessId, ProcessState, Task};
use crate::error::{KResult, KernelError};
use crate::kernel::{Kernel, KernelState};
use crate::scheduler::{Context, ContextFlags, Scheduler};
use crate::stream::{self, StreamObject};

impl Kernel {
    /// Create a process running `task` with its own copy of `args`.
    ///
    /// The new process is a child of the caller (unless it is idle or init)
    /// and inherits every open stream of the caller. A process without a
    /// task never runs; only the idle process is created that way. A
    /// caller whose process has already exited cannot exec.
    pub fn exec(&self, task: Option<Task>, args: &[u8]) -> KResult<ProcessId> {
        let caller = self.scheduler().current();

        let mut guard = self.lock();
        let st = &mut *guard;
        let pid = st.procs.acquire().ok_or_else(|| {
            log::warn!("[KPIO Proc] process table exhausted");
            KernelError::ResourceExhausted
        })?;

        if !pid.is_parentless() {
            let Some(me) = caller.as_ref() else {
                let closes = release_unstarted(st, pid);
                drop(guard);
                stream::close_all(closes);
                return Err(KernelError::NoContext);
            };
            if !st.procs.owner_of(me).is_some_and(|p| p.is_alive()) {
                log::debug!("[KPIO Proc] exec from exited pid {} refused", me.owner());
                let closes = release_unstarted(st, pid);
                drop(guard);
                stream::close_all(closes);
                return Err(KernelError::IllegalState);
            }
            let parent = me.owner();
            st.procs.link_child(parent, pid);
            let fidt = st
                .procs
                .get(parent)
                .map(|p| p.fidt.clone())
                .unwrap_or_default();
            for fcb in fidt.iter().flatten() {
                st.files.incref(*fcb);
            }
            if let Some(child) = st.procs.get_mut(pid) {
                if !fidt.is_empty() {
                    child.fidt = fidt;
                }
            }
        }

        if let Some(child) = st.procs.get_mut(pid) {
            child.main_task = task;
            child.args = args.to_vec();
            child.argl = args.len();
        }

        if let Some(task) = task {
            if let Err(e) = self.start_process(st, pid, task, args) {
                let closes = release_unstarted(st, pid);
                drop(guard);
                stream::close_all(closes);
                return Err(e);
            }
        }

        log::debug!(
            "[KPIO Proc] exec pid {} (parent {:?}, {} arg bytes)",
            pid,
            caller.map(|c| c.owner()),
            args.len()
        );
        Ok(pid)
    }

    // Give `pid` its main thread and make it runnable.
    fn start_process(&self, st: &mut KernelState, pid: ProcessId, task: Task, args: &[u8]) -> KResult<()> {
        let owner_generation = st.procs.get(pid).map_or(0, |p| p.generation);
        let tid = st
            .threads
            .acquire(pid, owner_generation, Some(task), args)
            .ok_or_else(|| {
                log::warn!("[KPIO Proc] no thread slot for pid {}", pid);
                KernelError::ResourceExhausted
            })?;
        let generation = st.threads.get(tid).map_or(0, |t| t.generation);

        let ctx = Context::with_generations(
            pid,
            owner_generation,
            Some(tid),
            generation,
            ContextFlags::MAIN,
        );
        let kernel = self.clone();
        if let Err(e) = self
            .scheduler()
            .spawn(ctx.clone(), Box::new(move || kernel.start_main_thread()))
        {
            st.threads.reclaim(tid);
            return Err(e);
        }
        st.threads.bind_context(tid, ctx.clone());
        if let Some(proc) = st.procs.get_mut(pid) {
            proc.main_thread = Some(tid);
        }
        self.scheduler().wakeup(&ctx);
        Ok(())
    }

    // Runs on a new main thread: call the task, then exit with its value.
    fn start_main_thread(&self) {
        let Some(me) = self.scheduler().current() else {
            return;
        };
        let entry = {
            let st = self.lock();
            st.procs
                .owner_of(&me)
                .and_then(|p| p.main_task.map(|task| (task, p.args.clone())))
        };
        let exit_value = match entry {
            Some((task, args)) => task(self, &args),
            None => 0,
        };
        self.exit(exit_value)
    }

    /// Terminate the calling process with `exit_value`.
    ///
    /// Init first reaps every remaining child. Open streams are released,
    /// children move to init and the parent is signaled. Never returns.
    pub fn exit(&self, exit_value: i32) -> ! {
        let Some(me) = self.scheduler().current() else {
            log::error!("[KPIO Proc] exit called outside any execution context");
            panic!("exit outside any execution context");
        };
        let pid = me.owner();

        if pid == ProcessId::INIT {
            while self.wait_child(None).is_ok() {}
        }

        let mut closes = Vec::new();
        {
            let mut guard = self.lock();
            let st = &mut *guard;
            st.threads.finish(self.scheduler(), &me, exit_value);

            match st.procs.owner_of_mut(&me) {
                Some(proc) if proc.is_alive() => {
                    proc.args = Vec::new();
                    let fidt: Vec<_> = proc.fidt.iter_mut().filter_map(|e| e.take()).collect();
                    let children = mem::take(&mut proc.children);
                    let exited = mem::take(&mut proc.exited);
                    let parent = proc.parent;
                    proc.state = ProcessState::Zombie;
                    proc.exit_value = exit_value;
                    proc.main_thread = None;

                    for fcb in fidt {
                        if let Some(object) = st.files.decref(fcb) {
                            closes.push(object);
                        }
                    }
                    adopt_orphans(st, self.scheduler(), children, exited);

                    if let Some(parent) = parent.and_then(|p| st.procs.get_mut(p)) {
                        parent.exited.push_front(pid);
                        parent.child_exit.broadcast(self.scheduler());
                    }
                    log::debug!("[KPIO Proc] pid {} exited with {}", pid, exit_value);
                }
                _ => {
                    log::debug!("[KPIO Proc] late exit of a thread of pid {}", pid);
                }
            }

            if pid == ProcessId::INIT {
                self.signal_shutdown();
            }
        }

        stream::close_all(closes);
        self.scheduler().exit_current(&me)
    }

    /// Wait for a child to exit and reap it.
    ///
    /// `Some(pid)` waits for that child, which must be a child of the
    /// caller. `None` waits for any child and fails at once if the caller
    /// has none. Returns the reaped pid and its exit value.
    pub fn wait_child(&self, cpid: Option<ProcessId>) -> KResult<(ProcessId, i32)> {
        let me = self.current_context()?;

        let mut guard = self.lock();
        loop {
            let proc = guard.procs.owner_of(&me).ok_or(KernelError::IllegalState)?;
            let ready = match cpid {
                Some(child) => {
                    if !proc.children.contains(&child) {
                        return Err(KernelError::InvalidArgument);
                    }
                    guard
                        .procs
                        .get(child)
                        .is_some_and(|c| c.is_zombie())
                        .then_some(child)
                }
                None => {
                    if proc.children.is_empty() {
                        return Err(KernelError::IllegalState);
                    }
                    proc.exited.front().copied()
                }
            };

            if let Some(child) = ready {
                return Ok(reap(&mut guard, child));
            }

            let signal = proc.child_exit.clone();
            guard = signal.wait(self.scheduler(), &me, self.state_lock(), guard);
        }
    }

    /// Pid of the calling process. Fails once that process has been
    /// reaped.
    pub fn get_pid(&self) -> KResult<ProcessId> {
        let me = self.current_context()?;
        let st = self.lock();
        st.procs
            .owner_of(&me)
            .map(|_| me.owner())
            .ok_or(KernelError::IllegalState)
    }

    /// Parent of the calling process, `None` for idle and init.
    pub fn get_ppid(&self) -> KResult<Option<ProcessId>> {
        let me = self.current_context()?;
        let st = self.lock();
        st.procs
            .owner_of(&me)
            .map(|p| p.parent)
            .ok_or(KernelError::IllegalState)
    }
}

// Consume a zombie's status and free its slot.
fn reap(st: &mut KernelState, child: ProcessId) -> (ProcessId, i32) {
    let exit_value = st.procs.get(child).map_or(0, |c| c.exit_value);
    st.procs.unlink_child(child);
    st.procs.release(child);
    log::debug!("[KPIO Proc] reaped pid {} ({})", child, exit_value);
    (child, exit_value)
}

// Hand an exiting process's children to init.
fn adopt_orphans(
    st: &mut KernelState,
    sched: &dyn Scheduler,
    children: Vec<ProcessId>,
    exited: VecDeque<ProcessId>,
) {
    if children.is_empty() {
        return;
    }
    for &child in children.iter() {
        if let Some(c) = st.procs.get_mut(child) {
            c.parent = Some(ProcessId::INIT);
        }
    }
    let Some(init) = st.procs.get_mut(ProcessId::INIT) else {
        log::error!("[KPIO Proc] orphans left without init");
        return;
    };
    init.children.extend(children);
    if !exited.is_empty() {
        init.exited.extend(exited);
        init.child_exit.broadcast(sched);
    }
}

// Undo a partially built process. Returns the streams to close.
fn release_unstarted(st: &mut KernelState, pid: ProcessId) -> Vec<Arc<StreamObject>> {
    st.procs.unlink_child(pid);
    let fidt: Vec<_> = st
        .procs
        .get_mut(pid)
        .map(|p| p.fidt.iter_mut().filter_map(|e| e.take()).collect())
        .unwrap_or_default();
    let closes = fidt
        .into_iter()
        .filter_map(|fcb| st.files.decref(fcb))
        .collect();
    st.procs.release(pid);
    closes
}
