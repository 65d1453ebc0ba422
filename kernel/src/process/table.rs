//! Process Table
//!
//! Fixed-capacity arena of process control blocks indexed by
//! [`ProcessId`], with an explicit free list of indices. Each slot carries
//! a generation that is bumped whenever the slot is released.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use super::{ProcessId, Task, ThreadId};
use crate::scheduler::Context;
use crate::stream::FcbId;
use crate::sync::CondVar;

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Slot is on the free list
    Free,
    /// Process is running
    Alive,
    /// Process has exited but not yet been reaped
    Zombie,
}

/// Process control block
pub struct Process {
    /// Process state
    pub state: ProcessState,
    /// Parent process, `None` for idle/init and free slots
    pub parent: Option<ProcessId>,
    /// Unreaped children, alive or zombie (unordered)
    pub children: Vec<ProcessId>,
    /// Zombie children waiting to be reaped, most recent at the front
    pub exited: VecDeque<ProcessId>,
    /// Open-stream table; each entry holds one stream reference
    pub fidt: Vec<Option<FcbId>>,
    /// Main thread entry point
    pub main_task: Option<Task>,
    /// Argument blob, owned by this process
    pub args: Vec<u8>,
    /// Argument length as passed to `Exec` (kept after the blob is released)
    pub argl: usize,
    /// Thread-table slot of the main thread
    pub main_thread: Option<ThreadId>,
    /// Exit value (valid once zombie)
    pub exit_value: i32,
    /// Signaled whenever a child exits
    pub child_exit: Arc<CondVar>,
    /// Bumped every time the slot is released
    pub generation: u64,
}

impl Process {
    fn free(max_fileid: usize, generation: u64) -> Self {
        Process {
            state: ProcessState::Free,
            parent: None,
            children: Vec::new(),
            exited: VecDeque::new(),
            fidt: vec![None; max_fileid],
            main_task: None,
            args: Vec::new(),
            argl: 0,
            main_thread: None,
            exit_value: 0,
            child_exit: Arc::new(CondVar::new()),
            generation,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state == ProcessState::Alive
    }

    pub fn is_zombie(&self) -> bool {
        self.state == ProcessState::Zombie
    }

    /// Number of open-stream entries.
    pub fn open_streams(&self) -> usize {
        self.fidt.iter().filter(|f| f.is_some()).count()
    }
}

/// Global process table
pub struct ProcessTable {
    slots: Vec<Process>,
    /// Free slot indices; the lowest pid is popped first.
    free: Vec<ProcessId>,
    count: usize,
    max_fileid: usize,
}

impl ProcessTable {
    /// Create a table with `capacity` free slots.
    pub fn new(capacity: usize, max_fileid: usize) -> Self {
        let slots = (0..capacity).map(|_| Process::free(max_fileid, 0)).collect();
        let free = (0..capacity).rev().map(ProcessId).collect();
        ProcessTable {
            slots,
            free,
            count: 0,
            max_fileid,
        }
    }

    /// Pop a slot off the free list and mark it alive.
    pub fn acquire(&mut self) -> Option<ProcessId> {
        let pid = self.free.pop()?;
        self.slots[pid.0].state = ProcessState::Alive;
        self.count += 1;
        Some(pid)
    }

    /// Clear a slot and return it to the free list.
    pub fn release(&mut self, pid: ProcessId) {
        let Some(slot) = self.slots.get_mut(pid.0) else {
            return;
        };
        if slot.state == ProcessState::Free {
            return;
        }
        debug_assert_eq!(slot.open_streams(), 0, "freed process still holds streams");
        *slot = Process::free(self.max_fileid, slot.generation.wrapping_add(1));
        self.free.push(pid);
        self.count -= 1;
    }

    /// A live or zombie process.
    pub fn get(&self, pid: ProcessId) -> Option<&Process> {
        self.slots
            .get(pid.0)
            .filter(|p| p.state != ProcessState::Free)
    }

    /// A live or zombie process, mutably.
    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.slots
            .get_mut(pid.0)
            .filter(|p| p.state != ProcessState::Free)
    }

    /// The process `ctx` belongs to, unless its slot has since been
    /// released (and possibly reused).
    pub fn owner_of(&self, ctx: &Context) -> Option<&Process> {
        self.get(ctx.owner())
            .filter(|p| p.generation == ctx.owner_generation())
    }

    pub fn owner_of_mut(&mut self, ctx: &Context) -> Option<&mut Process> {
        self.get_mut(ctx.owner())
            .filter(|p| p.generation == ctx.owner_generation())
    }

    /// Get count of non-free processes
    pub fn count(&self) -> usize {
        self.count
    }

    /// Iterate over all non-free processes in pid order.
    pub fn iter(&self) -> impl Iterator<Item = (ProcessId, &Process)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state != ProcessState::Free)
            .map(|(i, p)| (ProcessId(i), p))
    }

    /// Move `child` into `parent`'s child list.
    pub fn link_child(&mut self, parent: ProcessId, child: ProcessId) {
        if let Some(p) = self.get_mut(parent) {
            p.children.push(child);
        }
        if let Some(c) = self.get_mut(child) {
            c.parent = Some(parent);
        }
    }

    /// Remove `child` from both of its parent's lists.
    pub fn unlink_child(&mut self, child: ProcessId) {
        let Some(parent) = self.get(child).and_then(|c| c.parent) else {
            return;
        };
        if let Some(p) = self.get_mut(parent) {
            if let Some(pos) = p.children.iter().position(|&c| c == child) {
                p.children.swap_remove(pos);
            }
            p.exited.retain(|&c| c != child);
        }
        if let Some(c) = self.get_mut(child) {
            c.parent = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ContextFlags;

    #[test]
    fn test_pids_allocated_lowest_first() {
        let mut table = ProcessTable::new(4, 2);
        assert_eq!(table.acquire(), Some(ProcessId(0)));
        assert_eq!(table.acquire(), Some(ProcessId(1)));
        assert_eq!(table.acquire(), Some(ProcessId(2)));
        assert_eq!(table.count(), 3);
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        let mut table = ProcessTable::new(2, 2);
        let a = table.acquire().unwrap();
        let b = table.acquire().unwrap();
        assert_eq!(table.acquire(), None);

        table.release(a);
        assert!(table.get(a).is_none());
        assert_eq!(table.acquire(), Some(a));
        assert!(table.get(b).is_some());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut table = ProcessTable::new(2, 2);
        let a = table.acquire().unwrap();
        table.release(a);
        table.release(a);
        assert_eq!(table.count(), 0);
        assert_eq!(table.acquire(), Some(a));
        assert_eq!(table.acquire(), Some(ProcessId(1)));
        assert_eq!(table.acquire(), None);
    }

    #[test]
    fn test_owner_lookup_rejects_reused_slot() {
        let mut table = ProcessTable::new(2, 2);
        let pid = table.acquire().unwrap();
        let ctx = Context::new(pid, None, ContextFlags::empty());
        assert!(table.owner_of(&ctx).is_some());

        table.release(pid);
        assert_eq!(table.acquire(), Some(pid));
        assert!(table.owner_of(&ctx).is_none());
        assert!(table.owner_of_mut(&ctx).is_none());

        let fresh = Context::with_generations(pid, 1, None, 0, ContextFlags::empty());
        assert!(table.owner_of(&fresh).is_some());
    }

    #[test]
    fn test_link_and_unlink_child() {
        let mut table = ProcessTable::new(4, 2);
        let parent = table.acquire().unwrap();
        let child = table.acquire().unwrap();
        table.link_child(parent, child);
        table.get_mut(parent).unwrap().exited.push_front(child);

        assert_eq!(table.get(child).unwrap().parent, Some(parent));
        assert_eq!(table.get(parent).unwrap().children, vec![child]);

        table.unlink_child(child);
        assert!(table.get(parent).unwrap().children.is_empty());
        assert!(table.get(parent).unwrap().exited.is_empty());
        assert_eq!(table.get(child).unwrap().parent, None);
    }
}
