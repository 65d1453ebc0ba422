//! Local sockets.
//!
//! Sockets never leave the kernel. A listener owns a port; a connector
//! queues a request on the listener and waits to be admitted. Accept pops
//! a request, creates the server-side socket and splices the two sockets
//! together with a pair of pipes, one per direction.
//!
//! ```text
//! Unbound --listen--> Listener
//! Unbound --accept/connect--> Peer
//! ```
//!
//! The socket layer has its own lock. It is never taken while the kernel
//! lock is held, and the kernel lock is never taken while it is held.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::time::Duration;
use hashbrown::HashMap;
use spin::Mutex;

use super::pipe::Pipe;
use crate::config::KernelConfig;
use crate::error::{KResult, KernelError};
use crate::kernel::Kernel;
use crate::scheduler::{ContextRef, Scheduler};
use crate::stream::{Fid, FileOps, StreamObject};
use crate::sync::CondVar;

/// Socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RequestId(u64);

/// Socket type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Unbound,
    Listener,
    Peer,
}

/// Which half of a peer connection to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Read = 1,
    Write = 2,
    Both = 3,
}

impl ShutdownMode {
    pub fn from_raw(raw: i32) -> KResult<Self> {
        match raw {
            1 => Ok(ShutdownMode::Read),
            2 => Ok(ShutdownMode::Write),
            3 => Ok(ShutdownMode::Both),
            _ => Err(KernelError::InvalidArgument),
        }
    }
}

enum SocketKind {
    Unbound,
    Listener {
        /// Pending connect requests, oldest first.
        queue: VecDeque<RequestId>,
        accept_signal: Arc<CondVar>,
    },
    Peer {
        incoming: Arc<Pipe>,
        outgoing: Arc<Pipe>,
    },
}

struct SocketEntry {
    port: u16,
    kind: SocketKind,
    /// Cleared by a full shutdown.
    active: bool,
}

impl SocketEntry {
    fn socket_type(&self) -> SocketType {
        match self.kind {
            SocketKind::Unbound => SocketType::Unbound,
            SocketKind::Listener { .. } => SocketType::Listener,
            SocketKind::Peer { .. } => SocketType::Peer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestStatus {
    Pending,
    Admitted,
    Refused,
}

struct ConnectRequest {
    connector: SocketId,
    status: RequestStatus,
    signal: Arc<CondVar>,
}

struct SocketState {
    sockets: HashMap<SocketId, SocketEntry>,
    /// Listener bound to each port.
    ports: Vec<Option<SocketId>>,
    requests: HashMap<RequestId, ConnectRequest>,
    next_id: u64,
}

impl SocketState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// All sockets of one kernel.
pub struct SocketLayer {
    sched: Arc<dyn Scheduler>,
    config: KernelConfig,
    state: Mutex<SocketState>,
}

impl SocketLayer {
    /// Ports come from `config.max_port` and connection buffers from
    /// `config.pipe_buffer_size`.
    pub fn new(sched: Arc<dyn Scheduler>, config: KernelConfig) -> Arc<Self> {
        Arc::new(SocketLayer {
            sched,
            config,
            state: Mutex::new(SocketState {
                sockets: HashMap::new(),
                ports: vec![None; config.max_port as usize + 1],
                requests: HashMap::new(),
                next_id: 0,
            }),
        })
    }

    /// Create an unbound socket on `port`.
    pub fn create(&self, port: u16) -> KResult<SocketId> {
        if !self.config.is_valid_port(port) {
            return Err(KernelError::InvalidArgument);
        }
        let mut st = self.state.lock();
        let id = SocketId(st.next_id());
        st.sockets.insert(
            id,
            SocketEntry {
                port,
                kind: SocketKind::Unbound,
                active: true,
            },
        );
        Ok(id)
    }

    /// Turn an unbound socket into the listener of its port.
    pub fn listen(&self, id: SocketId) -> KResult<()> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let entry = st.sockets.get_mut(&id).ok_or(KernelError::InvalidArgument)?;
        if !matches!(entry.kind, SocketKind::Unbound) || !entry.active {
            return Err(KernelError::IllegalState);
        }
        let slot = &mut st.ports[entry.port as usize];
        if slot.is_some() {
            return Err(KernelError::IllegalState);
        }
        *slot = Some(id);
        entry.kind = SocketKind::Listener {
            queue: VecDeque::new(),
            accept_signal: Arc::new(CondVar::new()),
        };
        log::debug!("[KPIO Socket] listening on port {}", entry.port);
        Ok(())
    }

    // Block until `listener` has a queued request and pop it.
    fn next_request(&self, me: &ContextRef, listener: SocketId) -> KResult<(RequestId, u16)> {
        let mut st = self.state.lock();
        loop {
            let entry = st
                .sockets
                .get_mut(&listener)
                .ok_or(KernelError::IllegalState)?;
            let port = entry.port;
            let active = entry.active;
            let SocketKind::Listener {
                queue,
                accept_signal,
            } = &mut entry.kind
            else {
                return Err(KernelError::IllegalState);
            };
            if !active {
                return Err(KernelError::IllegalState);
            }
            if let Some(request) = queue.pop_front() {
                return Ok((request, port));
            }
            let signal = accept_signal.clone();
            st = signal.wait(&*self.sched, me, &self.state, st);
        }
    }

    // Splice `server` and the request's connector together.
    fn admit(&self, request: RequestId, server: SocketId) -> KResult<()> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let Some(req) = st.requests.get_mut(&request) else {
            return Err(KernelError::BrokenPeer);
        };
        let connector_ready = st
            .sockets
            .get(&req.connector)
            .is_some_and(|s| matches!(s.kind, SocketKind::Unbound) && s.active);
        if !connector_ready || !st.sockets.contains_key(&server) {
            req.status = RequestStatus::Refused;
            req.signal.broadcast(&*self.sched);
            return Err(KernelError::BrokenPeer);
        }

        let to_server = Pipe::new(self.sched.clone(), self.config.pipe_buffer_size);
        let to_connector = Pipe::new(self.sched.clone(), self.config.pipe_buffer_size);
        if let Some(s) = st.sockets.get_mut(&server) {
            s.kind = SocketKind::Peer {
                incoming: to_server.clone(),
                outgoing: to_connector.clone(),
            };
        }
        if let Some(c) = st.sockets.get_mut(&req.connector) {
            c.kind = SocketKind::Peer {
                incoming: to_connector,
                outgoing: to_server,
            };
        }
        req.status = RequestStatus::Admitted;
        req.signal.broadcast(&*self.sched);
        Ok(())
    }

    // Fail a popped request whose server side could not be set up.
    fn refuse(&self, request: RequestId) {
        let mut st = self.state.lock();
        if let Some(req) = st.requests.get_mut(&request) {
            req.status = RequestStatus::Refused;
            req.signal.broadcast(&*self.sched);
        }
    }

    /// Queue a connect request on the listener of `port` and wait up to
    /// `timeout` to be admitted.
    pub fn connect(&self, me: &ContextRef, id: SocketId, port: u16, timeout: Duration) -> KResult<()> {
        if !self.config.is_valid_port(port) {
            return Err(KernelError::InvalidArgument);
        }
        let deadline = self.sched.now().saturating_add(timeout);

        let mut guard = self.state.lock();
        let st = &mut *guard;
        let entry = st.sockets.get(&id).ok_or(KernelError::InvalidArgument)?;
        if !matches!(entry.kind, SocketKind::Unbound) || !entry.active {
            return Err(KernelError::IllegalState);
        }
        let Some(listener) = st.ports[port as usize] else {
            log::debug!("[KPIO Socket] connect: nobody listens on port {}", port);
            return Err(KernelError::IllegalState);
        };

        let request = RequestId(st.next_id());
        let signal = Arc::new(CondVar::new());
        st.requests.insert(
            request,
            ConnectRequest {
                connector: id,
                status: RequestStatus::Pending,
                signal: signal.clone(),
            },
        );
        if let Some(SocketKind::Listener {
            queue,
            accept_signal,
        }) = st.sockets.get_mut(&listener).map(|l| &mut l.kind)
        {
            queue.push_back(request);
            accept_signal.broadcast(&*self.sched);
        }

        loop {
            let status = guard
                .requests
                .get(&request)
                .map_or(RequestStatus::Refused, |r| r.status);
            match status {
                RequestStatus::Admitted => {
                    guard.requests.remove(&request);
                    log::debug!("[KPIO Socket] connected to port {}", port);
                    return Ok(());
                }
                RequestStatus::Refused => {
                    guard.requests.remove(&request);
                    return Err(KernelError::BrokenPeer);
                }
                RequestStatus::Pending => {}
            }

            let now = self.sched.now();
            if now >= deadline {
                guard.requests.remove(&request);
                if let Some(SocketKind::Listener { queue, .. }) =
                    guard.sockets.get_mut(&listener).map(|l| &mut l.kind)
                {
                    queue.retain(|&r| r != request);
                }
                log::debug!("[KPIO Socket] connect to port {} timed out", port);
                return Err(KernelError::TimedOut);
            }
            guard = signal.wait_timeout(&*self.sched, me, &self.state, guard, deadline - now);
        }
    }

    /// Shut down one or both directions of a peer socket.
    pub fn shutdown(&self, id: SocketId, mode: ShutdownMode) -> KResult<()> {
        let mut st = self.state.lock();
        let entry = st.sockets.get_mut(&id).ok_or(KernelError::InvalidArgument)?;
        let SocketKind::Peer { incoming, outgoing } = &entry.kind else {
            return Err(KernelError::IllegalState);
        };
        let (incoming, outgoing) = (incoming.clone(), outgoing.clone());
        if mode == ShutdownMode::Both {
            entry.active = false;
        }
        drop(st);

        // A broken-peer report from the pipe is not a shutdown failure.
        if matches!(mode, ShutdownMode::Read | ShutdownMode::Both) {
            let _ = incoming.close_reader();
        }
        if matches!(mode, ShutdownMode::Write | ShutdownMode::Both) {
            let _ = outgoing.close_writer();
        }
        Ok(())
    }

    /// Remove a socket, releasing its port, requests and pipes.
    pub fn close(&self, id: SocketId) -> KResult<()> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let Some(entry) = st.sockets.remove(&id) else {
            return Ok(());
        };
        match entry.kind {
            SocketKind::Unbound => {}
            SocketKind::Listener {
                queue,
                accept_signal,
            } => {
                st.ports[entry.port as usize] = None;
                for request in queue {
                    if let Some(req) = st.requests.get_mut(&request) {
                        req.status = RequestStatus::Refused;
                        req.signal.broadcast(&*self.sched);
                    }
                }
                accept_signal.broadcast(&*self.sched);
                log::debug!("[KPIO Socket] listener on port {} closed", entry.port);
            }
            SocketKind::Peer { incoming, outgoing } => {
                drop(guard);
                let _ = incoming.close_reader();
                let _ = outgoing.close_writer();
            }
        }
        Ok(())
    }

    pub fn read(&self, me: &ContextRef, id: SocketId, buf: &mut [u8]) -> KResult<usize> {
        let incoming = match self.state.lock().sockets.get(&id).map(|s| &s.kind) {
            Some(SocketKind::Peer { incoming, .. }) => incoming.clone(),
            _ => return Err(KernelError::IllegalState),
        };
        incoming.read(me, buf)
    }

    pub fn write(&self, me: &ContextRef, id: SocketId, buf: &[u8]) -> KResult<usize> {
        let outgoing = match self.state.lock().sockets.get(&id).map(|s| &s.kind) {
            Some(SocketKind::Peer { outgoing, .. }) => outgoing.clone(),
            _ => return Err(KernelError::IllegalState),
        };
        outgoing.write(me, buf)
    }

    pub fn socket_type(&self, id: SocketId) -> Option<SocketType> {
        self.state.lock().sockets.get(&id).map(|s| s.socket_type())
    }

    pub fn is_active(&self, id: SocketId) -> bool {
        self.state.lock().sockets.get(&id).is_some_and(|s| s.active)
    }

    pub fn port(&self, id: SocketId) -> Option<u16> {
        self.state.lock().sockets.get(&id).map(|s| s.port)
    }

    /// Number of contexts blocked in accept on listener `id`.
    pub fn accept_waiters(&self, id: SocketId) -> usize {
        match self.state.lock().sockets.get(&id).map(|s| &s.kind) {
            Some(SocketKind::Listener { accept_signal, .. }) => accept_signal.waiters(),
            _ => 0,
        }
    }

    /// Number of sockets that have not been closed.
    pub fn count(&self) -> usize {
        self.state.lock().sockets.len()
    }
}

/// Stream payload of a socket.
pub struct SocketRef {
    id: SocketId,
    layer: Arc<SocketLayer>,
}

impl SocketRef {
    pub fn id(&self) -> SocketId {
        self.id
    }
}

fn socket_read(obj: &StreamObject, me: &ContextRef, buf: &mut [u8]) -> KResult<usize> {
    match obj {
        StreamObject::Socket(s) => s.layer.read(me, s.id, buf),
        _ => Err(KernelError::IllegalState),
    }
}

fn socket_write(obj: &StreamObject, me: &ContextRef, buf: &[u8]) -> KResult<usize> {
    match obj {
        StreamObject::Socket(s) => s.layer.write(me, s.id, buf),
        _ => Err(KernelError::IllegalState),
    }
}

fn socket_close(obj: &StreamObject) -> KResult<()> {
    match obj {
        StreamObject::Socket(s) => s.layer.close(s.id),
        _ => Err(KernelError::IllegalState),
    }
}

pub static SOCKET_OPS: FileOps = FileOps {
    open: None,
    read: Some(socket_read),
    write: Some(socket_write),
    close: Some(socket_close),
};

impl Kernel {
    /// Create an unbound socket on `port` in the calling process.
    pub fn socket(&self, port: u16) -> KResult<Fid> {
        let layer = self.sockets();
        let id = layer.create(port)?;
        self.open_socket(id)
    }

    fn open_socket(&self, id: SocketId) -> KResult<Fid> {
        let layer = self.sockets();
        let object = StreamObject::Socket(SocketRef {
            id,
            layer: layer.clone(),
        });
        match self.open_streams(vec![object]) {
            Ok(fids) => Ok(fids[0]),
            Err(e) => {
                let _ = layer.close(id);
                Err(e)
            }
        }
    }

    /// Socket behind `fid` in the calling process.
    pub fn socket_id(&self, fid: Fid) -> KResult<SocketId> {
        match &*self.stream(fid)? {
            StreamObject::Socket(s) => Ok(s.id),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    pub fn listen(&self, fid: Fid) -> KResult<()> {
        self.sockets().listen(self.socket_id(fid)?)
    }

    /// Wait for a connection on listener `fid` and return the stream of
    /// the new server-side peer socket.
    pub fn accept(&self, fid: Fid) -> KResult<Fid> {
        let me = self.current_context()?;
        let layer = self.sockets();
        let listener = self.socket_id(fid)?;

        let (request, port) = layer.next_request(&me, listener)?;
        let server = match layer.create(port) {
            Ok(id) => id,
            Err(e) => {
                layer.refuse(request);
                return Err(e);
            }
        };
        let server_fid = match self.open_socket(server) {
            Ok(fid) => fid,
            Err(e) => {
                layer.refuse(request);
                return Err(e);
            }
        };
        if let Err(e) = layer.admit(request, server) {
            let _ = self.close(server_fid);
            return Err(e);
        }
        log::debug!("[KPIO Socket] accepted connection on port {}", port);
        Ok(server_fid)
    }

    /// Connect `fid` to the listener on `port`.
    pub fn connect(&self, fid: Fid, port: u16, timeout: Duration) -> KResult<()> {
        let me = self.current_context()?;
        self.sockets()
            .connect(&me, self.socket_id(fid)?, port, timeout)
    }

    pub fn shutdown(&self, fid: Fid, mode: ShutdownMode) -> KResult<()> {
        self.sockets().shutdown(self.socket_id(fid)?, mode)
    }
}
