//! Execution context control block.
//!
//! A [`Context`] is the scheduler-owned record of one schedulable unit.
//! The kernel core only reads its owner, its thread-table index and its
//! flags; everything else belongs to the provider.
//!
//! Owner and thread index are recorded together with the generation the
//! slot had when the context was bound to it. A context that outlives its
//! process or its thread slot therefore never resolves to the slot's next
//! occupant.

use alloc::sync::Arc;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use spin::Mutex;

use crate::process::{ProcessId, ThreadId};

/// Unique execution context identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u64);

impl ContextId {
    /// Generate a new unique context ID
    pub fn new() -> Self {
        static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

bitflags! {
    /// Context flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContextFlags: u32 {
        /// Sticky advisory interrupt, set by `ThreadInterrupt`.
        const INTERRUPTED = 0b0000_0001;
        /// Main thread of its process (runs the process starter).
        const MAIN = 0b0000_0010;
    }
}

/// Context state as seen by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Spawned, never woken.
    Init,
    /// Runnable.
    Ready,
    /// Parked in `sleep`.
    Sleeping,
    /// Terminal; never runs again.
    Exited,
}

/// Execution context control block.
#[derive(Debug)]
pub struct Context {
    id: ContextId,
    owner: ProcessId,
    owner_generation: u64,
    thread: Option<ThreadId>,
    thread_generation: u64,
    flags: AtomicU32,
    state: Mutex<ContextState>,
}

/// Shared handle to a context.
pub type ContextRef = Arc<Context>;

impl Context {
    /// Create a context owned by `owner`, bound to thread-table slot `thread`.
    /// Both slots are taken to be in their first generation.
    pub fn new(owner: ProcessId, thread: Option<ThreadId>, flags: ContextFlags) -> ContextRef {
        Self::with_generations(owner, 0, thread, 0, flags)
    }

    /// Create a context bound to a specific generation of its process slot
    /// and thread slot.
    pub fn with_generations(
        owner: ProcessId,
        owner_generation: u64,
        thread: Option<ThreadId>,
        thread_generation: u64,
        flags: ContextFlags,
    ) -> ContextRef {
        Arc::new(Context {
            id: ContextId::new(),
            owner,
            owner_generation,
            thread,
            thread_generation,
            flags: AtomicU32::new(flags.bits()),
            state: Mutex::new(ContextState::Init),
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Owning process.
    pub fn owner(&self) -> ProcessId {
        self.owner
    }

    /// Generation of the owner's process slot at bind time.
    pub fn owner_generation(&self) -> u64 {
        self.owner_generation
    }

    /// Index into the thread table, if this context runs a kernel thread.
    pub fn thread(&self) -> Option<ThreadId> {
        self.thread
    }

    /// Generation of the thread slot at bind time.
    pub fn thread_generation(&self) -> u64 {
        self.thread_generation
    }

    pub fn flags(&self) -> ContextFlags {
        ContextFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, flags: ContextFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear_flags(&self, flags: ContextFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flags().contains(ContextFlags::INTERRUPTED)
    }

    pub fn state(&self) -> ContextState {
        *self.state.lock()
    }

    /// Move to `state` unless the context already exited.
    ///
    /// Returns the previous state.
    pub fn transition(&self, state: ContextState) -> ContextState {
        let mut current = self.state.lock();
        let previous = *current;
        if previous != ContextState::Exited {
            *current = state;
        }
        previous
    }

    /// Whether `self` and `other` are the same context.
    pub fn same(&self, other: &Context) -> bool {
        self.id == other.id
    }
}
