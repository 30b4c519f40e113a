//! The common socket object and the per-family operation vtable (spec
//! §3, §4.8, §6 "Socket family interface"). "The common file-op vtable
//! forwards read/write to recv/send via a synthetic message header, and
//! poll to the per-family `poll`."

use super::{Domain, PollMask, SocketError, SocketType};
use crate::error::Errno;
use crate::multitasking::fd::FileLike;
use crate::sync::WaitQueue;
use alloc::sync::Arc;
use util::mutex::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    None,
    Listening,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownHow {
    Read,
    Write,
    Both,
}

/// A `(domain,type,protocol)` registration (spec §6): `{release, bind,
/// accept, connect, listen, ioctl, recv, send, getopt, setopt, poll,
/// shutdown}`. `ioctl`/`getopt`/`setopt` are omitted here since no
/// in-scope module (local stream, raw) needs them yet; a real
/// implementation would carry them as further trait methods with a
/// default `NotSupported` body.
pub trait SocketOps: Send + Sync {
    fn bind(&self, sock: &Arc<Socket>, addr: &[u8]) -> Result<(), SocketError>;
    fn listen(&self, sock: &Arc<Socket>, backlog: usize) -> Result<(), SocketError>;
    fn accept(&self, sock: &Arc<Socket>) -> Result<Arc<Socket>, SocketError>;
    fn connect(&self, sock: &Arc<Socket>, addr: &[u8]) -> Result<(), SocketError>;
    fn send(&self, sock: &Socket, buf: &[u8]) -> Result<usize, SocketError>;
    fn recv(&self, sock: &Socket, buf: &mut [u8]) -> Result<usize, SocketError>;
    fn shutdown(&self, sock: &Socket, how: ShutdownHow) -> Result<(), SocketError>;
    fn poll(&self, sock: &Socket) -> PollMask;
}

/// A socket (spec §3): domain, type, protocol, state, per-family
/// op-vtable, read/write wait-queues, send/recv timeouts, mutex,
/// refcount (via `Arc`). The "opaque per-family payload" the spec
/// describes as a separate field is, in this Rust rendering, simply
/// whatever state `ops` closes over — the trait object already carries
/// vtable and payload together, so a second `payload: *mut ()` field
/// would just duplicate what dynamic dispatch gives for free.
pub struct Socket {
    pub domain: Domain,
    pub ty: SocketType,
    pub protocol: u16,
    state: Mutex<SocketState>,
    ops: Arc<dyn SocketOps>,
    pub read_wq: WaitQueue,
    pub write_wq: WaitQueue,
    recv_timeout: Mutex<Option<u64>>,
    send_timeout: Mutex<Option<u64>>,
}

impl Socket {
    pub fn new(domain: Domain, ty: SocketType, protocol: u16, ops: Arc<dyn SocketOps>) -> Arc<Self> {
        Arc::new(Self {
            domain,
            ty,
            protocol,
            state: Mutex::new(SocketState::None),
            ops,
            read_wq: WaitQueue::new(),
            write_wq: WaitQueue::new(),
            recv_timeout: Mutex::new(None),
            send_timeout: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SocketState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: SocketState) {
        *self.state.lock() = state;
    }

    pub fn set_recv_timeout(&self, timeout: Option<u64>) {
        *self.recv_timeout.lock() = timeout;
    }

    pub fn recv_timeout(&self) -> Option<u64> {
        *self.recv_timeout.lock()
    }

    pub fn set_send_timeout(&self, timeout: Option<u64>) {
        *self.send_timeout.lock() = timeout;
    }

    pub fn send_timeout(&self) -> Option<u64> {
        *self.send_timeout.lock()
    }

    pub fn bind(self: &Arc<Self>, addr: &[u8]) -> Result<(), SocketError> {
        let ops = self.ops.clone();
        ops.bind(self, addr)
    }

    pub fn listen(self: &Arc<Self>, backlog: usize) -> Result<(), SocketError> {
        let ops = self.ops.clone();
        ops.listen(self, backlog)?;
        self.set_state(SocketState::Listening);
        Ok(())
    }

    pub fn accept(self: &Arc<Self>) -> Result<Arc<Socket>, SocketError> {
        let ops = self.ops.clone();
        ops.accept(self)
    }

    pub fn connect(self: &Arc<Self>, addr: &[u8]) -> Result<(), SocketError> {
        let ops = self.ops.clone();
        ops.connect(self, addr)?;
        self.set_state(SocketState::Connected);
        Ok(())
    }

    pub fn send(&self, buf: &[u8]) -> Result<usize, SocketError> {
        self.ops.send(self, buf)
    }

    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, SocketError> {
        self.ops.recv(self, buf)
    }

    pub fn shutdown(&self, how: ShutdownHow) -> Result<(), SocketError> {
        self.ops.shutdown(self, how)
    }

    pub fn poll(&self) -> PollMask {
        self.ops.poll(self)
    }
}

/// The common file-op vtable (spec §4.8): read/write forward to
/// recv/send.
impl FileLike for Socket {
    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        self.recv(buf).map_err(Errno::from)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Errno> {
        self.send(buf).map_err(Errno::from)
    }
}
