//! Stream Table
//!
//! A fixed-capacity table of reference-counted file control blocks (FCBs).
//! Every process holds an open-stream table (FIDT) of [`FcbId`]s; each
//! non-empty FIDT entry owns one reference on its FCB. When the last
//! reference goes away the FCB returns to the free list and its
//! [`StreamObject`] is handed back to the caller to be closed once the
//! kernel lock has been dropped.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::{KResult, KernelError};
use crate::ipc::pipe::{Pipe, READER_OPS, WRITER_OPS};
use crate::ipc::socket::{SocketRef, SOCKET_OPS};
use crate::kernel::Kernel;
use crate::process::info::{InfoStream, INFO_OPS};
use crate::scheduler::ContextRef;

/// Index into a process's open-stream table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fid(pub usize);

impl core::fmt::Display for Fid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into the global FCB table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FcbId(pub usize);

/// Per-variant dispatch table. An unset entry means the operation is not
/// supported by that kind of stream.
pub struct FileOps {
    pub open: Option<fn(&StreamObject) -> KResult<()>>,
    pub read: Option<fn(&StreamObject, &ContextRef, &mut [u8]) -> KResult<usize>>,
    pub write: Option<fn(&StreamObject, &ContextRef, &[u8]) -> KResult<usize>>,
    pub close: Option<fn(&StreamObject) -> KResult<()>>,
}

/// Stream payload
pub enum StreamObject {
    /// Read half of a pipe
    PipeReader(Arc<Pipe>),
    /// Write half of a pipe
    PipeWriter(Arc<Pipe>),
    /// Socket endpoint
    Socket(SocketRef),
    /// Process-table snapshot
    Info(InfoStream),
}

impl StreamObject {
    pub fn ops(&self) -> &'static FileOps {
        match self {
            StreamObject::PipeReader(_) => &READER_OPS,
            StreamObject::PipeWriter(_) => &WRITER_OPS,
            StreamObject::Socket(_) => &SOCKET_OPS,
            StreamObject::Info(_) => &INFO_OPS,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            StreamObject::PipeReader(_) => "pipe reader",
            StreamObject::PipeWriter(_) => "pipe writer",
            StreamObject::Socket(_) => "socket",
            StreamObject::Info(_) => "procinfo",
        }
    }

    pub fn open(&self) -> KResult<()> {
        match self.ops().open {
            Some(open) => open(self),
            None => Ok(()),
        }
    }

    pub fn read(&self, me: &ContextRef, buf: &mut [u8]) -> KResult<usize> {
        let read = self.ops().read.ok_or(KernelError::IllegalState)?;
        read(self, me, buf)
    }

    pub fn write(&self, me: &ContextRef, buf: &[u8]) -> KResult<usize> {
        let write = self.ops().write.ok_or(KernelError::IllegalState)?;
        write(self, me, buf)
    }

    pub fn close(&self) -> KResult<()> {
        match self.ops().close {
            Some(close) => close(self),
            None => Ok(()),
        }
    }
}

/// FCB slot state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FcbState {
    Free,
    Open,
}

struct Fcb {
    state: FcbState,
    refcount: usize,
    /// `None` between `reserve` and `install`
    object: Option<Arc<StreamObject>>,
}

impl Fcb {
    const fn free() -> Self {
        Fcb {
            state: FcbState::Free,
            refcount: 0,
            object: None,
        }
    }
}

/// Global FCB table
pub struct FileTable {
    slots: Vec<Fcb>,
    free: Vec<FcbId>,
}

impl FileTable {
    pub fn new(capacity: usize) -> Self {
        FileTable {
            slots: (0..capacity).map(|_| Fcb::free()).collect(),
            free: (0..capacity).rev().map(FcbId).collect(),
        }
    }

    /// Reserve `n` FCBs and `n` empty entries of `fidt`, binding each pair.
    ///
    /// All-or-nothing: on failure nothing is taken. Each reserved FCB has
    /// refcount 1 (the FIDT entry) and no object until [`install`](Self::install).
    pub fn reserve(&mut self, fidt: &mut [Option<FcbId>], n: usize) -> Option<Vec<(Fid, FcbId)>> {
        let fids: Vec<Fid> = fidt
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_none())
            .map(|(i, _)| Fid(i))
            .take(n)
            .collect();
        if fids.len() < n || self.free.len() < n {
            log::warn!("[KPIO Stream] cannot reserve {} streams", n);
            return None;
        }

        let mut reserved = Vec::with_capacity(n);
        for fid in fids {
            let fcb = self.free.pop()?;
            let slot = &mut self.slots[fcb.0];
            slot.state = FcbState::Open;
            slot.refcount = 1;
            slot.object = None;
            fidt[fid.0] = Some(fcb);
            reserved.push((fid, fcb));
        }
        Some(reserved)
    }

    /// Undo a [`reserve`](Self::reserve) whose objects were never installed.
    pub fn unreserve(&mut self, fidt: &mut [Option<FcbId>], reserved: &[(Fid, FcbId)]) {
        for &(fid, fcb) in reserved {
            fidt[fid.0] = None;
            let _ = self.decref(fcb);
        }
    }

    pub fn install(&mut self, fcb: FcbId, object: Arc<StreamObject>) {
        if let Some(slot) = self.slot_mut(fcb) {
            slot.object = Some(object);
        }
    }

    pub fn incref(&mut self, fcb: FcbId) {
        if let Some(slot) = self.slot_mut(fcb) {
            slot.refcount += 1;
        }
    }

    /// Drop one reference. On the last one the slot is freed and its
    /// object is returned so the caller can close it outside the lock.
    #[must_use]
    pub fn decref(&mut self, fcb: FcbId) -> Option<Arc<StreamObject>> {
        let slot = self.slot_mut(fcb)?;
        slot.refcount -= 1;
        if slot.refcount > 0 {
            return None;
        }
        let object = slot.object.take();
        *slot = Fcb::free();
        self.free.push(fcb);
        object
    }

    pub fn get(&self, fcb: FcbId) -> Option<Arc<StreamObject>> {
        self.slots
            .get(fcb.0)
            .filter(|s| s.state == FcbState::Open)
            .and_then(|s| s.object.clone())
    }

    pub fn refcount(&self, fcb: FcbId) -> usize {
        self.slots.get(fcb.0).map_or(0, |s| s.refcount)
    }

    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn slot_mut(&mut self, fcb: FcbId) -> Option<&mut Fcb> {
        self.slots
            .get_mut(fcb.0)
            .filter(|s| s.state == FcbState::Open)
    }
}

/// Close every object whose last reference was dropped.
pub(crate) fn close_all(objects: Vec<Arc<StreamObject>>) {
    for object in objects {
        if let Err(e) = object.close() {
            log::debug!("[KPIO Stream] {} closed with {}", object.kind(), e);
        }
    }
}

// ── Generic stream calls ────────────────────────────────────

impl Kernel {
    /// Install `objects` in fresh FIDT entries of the calling process,
    /// which must not have exited.
    pub(crate) fn open_streams(&self, objects: Vec<StreamObject>) -> KResult<Vec<Fid>> {
        let me = self.current_context()?;
        let objects: Vec<Arc<StreamObject>> = objects.into_iter().map(Arc::new).collect();
        for object in objects.iter() {
            object.open()?;
        }

        let mut guard = self.lock();
        let st = &mut *guard;
        let proc = st
            .procs
            .owner_of_mut(&me)
            .filter(|p| p.is_alive())
            .ok_or(KernelError::IllegalState)?;
        let reserved = st
            .files
            .reserve(&mut proc.fidt, objects.len())
            .ok_or(KernelError::ResourceExhausted)?;
        let mut fids = Vec::with_capacity(reserved.len());
        for (&(fid, fcb), object) in reserved.iter().zip(objects) {
            st.files.install(fcb, object);
            fids.push(fid);
        }
        Ok(fids)
    }

    /// The object behind `fid` in the calling process.
    pub fn stream(&self, fid: Fid) -> KResult<Arc<StreamObject>> {
        let me = self.current_context()?;
        let st = self.lock();
        let fcb = st
            .procs
            .owner_of(&me)
            .and_then(|p| p.fidt.get(fid.0).copied().flatten())
            .ok_or(KernelError::InvalidArgument)?;
        st.files.get(fcb).ok_or(KernelError::IllegalState)
    }

    /// Read from `fid`; may block.
    pub fn read(&self, fid: Fid, buf: &mut [u8]) -> KResult<usize> {
        let me = self.current_context()?;
        self.stream(fid)?.read(&me, buf)
    }

    /// Write to `fid`; may block.
    pub fn write(&self, fid: Fid, buf: &[u8]) -> KResult<usize> {
        let me = self.current_context()?;
        self.stream(fid)?.write(&me, buf)
    }

    /// Drop the calling process's reference on `fid`.
    pub fn close(&self, fid: Fid) -> KResult<()> {
        let me = self.current_context()?;
        let object = {
            let mut guard = self.lock();
            let st = &mut *guard;
            let entry = st
                .procs
                .owner_of_mut(&me)
                .and_then(|p| p.fidt.get_mut(fid.0))
                .ok_or(KernelError::InvalidArgument)?;
            let fcb = entry.take().ok_or(KernelError::InvalidArgument)?;
            st.files.decref(fcb)
        };
        match object {
            Some(object) => object.close(),
            None => Ok(()),
        }
    }

    /// Make `new` refer to the same stream as `old`, closing whatever
    /// `new` referred to before.
    pub fn dup2(&self, old: Fid, new: Fid) -> KResult<()> {
        let me = self.current_context()?;
        let replaced = {
            let mut guard = self.lock();
            let st = &mut *guard;
            let proc = st
                .procs
                .owner_of_mut(&me)
                .filter(|p| p.is_alive())
                .ok_or(KernelError::IllegalState)?;
            if new.0 >= proc.fidt.len() {
                return Err(KernelError::InvalidArgument);
            }
            let fcb = proc
                .fidt
                .get(old.0)
                .copied()
                .flatten()
                .ok_or(KernelError::InvalidArgument)?;
            if old == new {
                return Ok(());
            }
            let previous = proc.fidt[new.0].replace(fcb);
            st.files.incref(fcb);
            previous.and_then(|prev| st.files.decref(prev))
        };
        if let Some(object) = replaced {
            close_all(alloc::vec![object]);
        }
        Ok(())
    }
}
