//! Local (Unix-domain-style) stream sockets: a connected pair shares a
//! refcounted `Pair` of two pipe buffers; index 0/1 identifies which
//! endpoint. A listening socket holds a bounded queue of pending connect
//! requests: `connect` installs a half-constructed pair on the
//! listener's queue, signals the listener, and blocks on its own
//! wait-queue; `accept` pulls the next pending entry, builds the peer
//! socket, and wakes the connector. Shutdown propagates EOF by
//! decrementing reader/writer counts on the shared pipe buffers.

use super::socket::{PollMask, ShutdownHow, Socket, SocketOps, SocketState};
use super::{Domain, SocketError, SocketType};
use crate::multitasking::scheduler::Scheduler;
use crate::sync::WakeReason;
use alloc::{collections::VecDeque, string::String, sync::Arc};
use core::sync::atomic::{AtomicUsize, Ordering};
use util::{hashmap::HashMap, mutex::Mutex};

const DEFAULT_BACKLOG: usize = 16;

struct PipeBuffer {
    data: Mutex<VecDeque<u8>>,
    readers: AtomicUsize,
    writers: AtomicUsize,
}

impl PipeBuffer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(VecDeque::new()),
            readers: AtomicUsize::new(1),
            writers: AtomicUsize::new(1),
        })
    }

    fn write(&self, buf: &[u8]) -> Result<usize, SocketError> {
        if self.readers.load(Ordering::Acquire) == 0 {
            return Err(SocketError::BrokenPipe);
        }
        self.data.lock().extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn read(&self, buf: &mut [u8]) -> usize {
        let mut data = self.data.lock();
        let n = buf.len().min(data.len());
        for slot in buf.iter_mut().take(n) {
            *slot = data.pop_front().unwrap();
        }
        n
    }

    fn is_eof(&self) -> bool {
        self.writers.load(Ordering::Acquire) == 0 && self.data.lock().is_empty()
    }
}

/// Two pipe buffers, one per direction. Endpoint `i` writes into
/// `buffers[i]` and reads from `buffers[1 - i]`.
struct Pair {
    buffers: [Arc<PipeBuffer>; 2],
}

impl Pair {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            buffers: [PipeBuffer::new(), PipeBuffer::new()],
        })
    }
}

struct PendingConnect {
    connector: Arc<Socket>,
    connector_ops: Arc<LocalStreamOps>,
    pair: Arc<Pair>,
}

enum Inner {
    Unbound,
    Bound {
        address: String,
    },
    Listening {
        pending: VecDeque<PendingConnect>,
        backlog: usize,
    },
    /// Brief state a connector sits in between enqueuing itself on the
    /// listener and being woken by `accept`.
    Connecting {
        pair: Arc<Pair>,
    },
    Connected {
        pair: Arc<Pair>,
        idx: usize,
    },
    Closed,
}

/// Global namespace of bound local-socket addresses, standing in for a
/// filesystem-node-backed bind path — a full implementation would
/// additionally create a socket-kind node at this path so `bind` and
/// lookup share the same namespace as the rest of the tree.
static REGISTRY: Mutex<Option<HashMap<String, (Arc<Socket>, Arc<LocalStreamOps>)>>> = Mutex::new(None);

fn with_registry<R>(f: impl FnOnce(&mut HashMap<String, (Arc<Socket>, Arc<LocalStreamOps>)>) -> R) -> R {
    let mut guard = REGISTRY.lock();
    if guard.is_none() {
        *guard = Some(HashMap::new());
    }
    f(guard.as_mut().unwrap())
}

pub struct LocalStreamOps {
    inner: Mutex<Inner>,
    self_ref: Mutex<Option<alloc::sync::Weak<LocalStreamOps>>>,
}

impl LocalStreamOps {
    pub fn new_socket() -> Arc<Socket> {
        let ops = Arc::new_cyclic(|weak| Self {
            inner: Mutex::new(Inner::Unbound),
            self_ref: Mutex::new(Some(weak.clone())),
        });
        Socket::new(Domain::Local, SocketType::Stream, 0, ops)
    }

    fn connected(pair: Arc<Pair>, idx: usize) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            inner: Mutex::new(Inner::Connected { pair, idx }),
            self_ref: Mutex::new(Some(weak.clone())),
        })
    }

    fn arc_self(&self) -> Arc<Self> {
        self.self_ref
            .lock()
            .as_ref()
            .and_then(|weak| weak.upgrade())
            .expect("LocalStreamOps is always constructed via new_cyclic")
    }
}

impl SocketOps for LocalStreamOps {
    fn bind(&self, _sock: &Arc<Socket>, addr: &[u8]) -> Result<(), SocketError> {
        let address = String::from_utf8_lossy(addr).into_owned();
        let mut inner = self.inner.lock();
        if !matches!(*inner, Inner::Unbound) {
            return Err(SocketError::AddressInUse);
        }
        if with_registry(|reg| reg.contains_key(&address)) {
            return Err(SocketError::AddressInUse);
        }
        *inner = Inner::Bound { address };
        Ok(())
    }

    fn listen(&self, sock: &Arc<Socket>, backlog: usize) -> Result<(), SocketError> {
        let address = {
            let inner = self.inner.lock();
            match &*inner {
                Inner::Bound { address } => address.clone(),
                _ => return Err(SocketError::InvalidArgument),
            }
        };
        let backlog = if backlog == 0 { DEFAULT_BACKLOG } else { backlog };
        *self.inner.lock() = Inner::Listening {
            pending: VecDeque::new(),
            backlog,
        };
        with_registry(|reg| reg.insert(address, (sock.clone(), self.arc_self())));
        Ok(())
    }

    fn connect(&self, sock: &Arc<Socket>, addr: &[u8]) -> Result<(), SocketError> {
        let address = String::from_utf8_lossy(addr).into_owned();
        let (listener, listener_ops) =
            with_registry(|reg| reg.get(&address).cloned()).ok_or(SocketError::ConnectionRefused)?;

        let pair = Pair::new();
        {
            let mut listener_inner = listener_ops.inner.lock();
            match &mut *listener_inner {
                Inner::Listening { pending, backlog } => {
                    if pending.len() >= *backlog {
                        return Err(SocketError::Busy);
                    }
                    pending.push_back(PendingConnect {
                        connector: sock.clone(),
                        connector_ops: self.arc_self(),
                        pair: pair.clone(),
                    });
                }
                _ => return Err(SocketError::ConnectionRefused),
            }
        }

        let mut guard = self.inner.lock();
        *guard = Inner::Connecting { pair };
        listener.read_wq.signal();
        // Release `guard` atomically with parking; `accept` wakes this
        // socket's own `read_wq` once the peer exists.
        let reason = sock.read_wq.wait(guard, Scheduler::block_current_and_reschedule);
        if reason == WakeReason::Interrupted {
            return Err(SocketError::Interrupted);
        }

        let inner = self.inner.lock();
        match &*inner {
            Inner::Connected { .. } => Ok(()),
            _ => Err(SocketError::ConnectionRefused),
        }
    }

    fn accept(&self, _sock: &Arc<Socket>) -> Result<Arc<Socket>, SocketError> {
        let pending = {
            let mut inner = self.inner.lock();
            match &mut *inner {
                Inner::Listening { pending, .. } => pending.pop_front(),
                _ => return Err(SocketError::InvalidArgument),
            }
        };
        let PendingConnect { connector, connector_ops, pair } = pending.ok_or(SocketError::WouldBlock)?;

        let peer = Socket::new(Domain::Local, SocketType::Stream, 0, LocalStreamOps::connected(pair.clone(), 1));
        peer.set_state(SocketState::Connected);

        *connector_ops.inner.lock() = Inner::Connected { pair, idx: 0 };
        connector.set_state(SocketState::Connected);
        connector.read_wq.signal();
        Ok(peer)
    }

    fn send(&self, _sock: &Socket, buf: &[u8]) -> Result<usize, SocketError> {
        match &*self.inner.lock() {
            Inner::Connected { pair, idx } => pair.buffers[*idx].write(buf),
            _ => Err(SocketError::NotConnected),
        }
    }

    fn recv(&self, _sock: &Socket, buf: &mut [u8]) -> Result<usize, SocketError> {
        match &*self.inner.lock() {
            Inner::Connected { pair, idx } => Ok(pair.buffers[1 - *idx].read(buf)),
            _ => Err(SocketError::NotConnected),
        }
    }

    fn shutdown(&self, _sock: &Socket, how: ShutdownHow) -> Result<(), SocketError> {
        let mut inner = self.inner.lock();
        match &*inner {
            Inner::Connected { pair, idx } => {
                if matches!(how, ShutdownHow::Read | ShutdownHow::Both) {
                    pair.buffers[1 - *idx].readers.fetch_sub(1, Ordering::AcqRel);
                }
                if matches!(how, ShutdownHow::Write | ShutdownHow::Both) {
                    pair.buffers[*idx].writers.fetch_sub(1, Ordering::AcqRel);
                }
                *inner = Inner::Closed;
                Ok(())
            }
            _ => Err(SocketError::NotConnected),
        }
    }

    fn poll(&self, _sock: &Socket) -> PollMask {
        match &*self.inner.lock() {
            Inner::Connected { pair, idx } => {
                let mut mask = PollMask::POLLOUT;
                let read_buf = &pair.buffers[1 - *idx];
                if !read_buf.data.lock().is_empty() {
                    mask |= PollMask::POLLIN;
                }
                if read_buf.is_eof() {
                    mask |= PollMask::POLLHUP;
                }
                mask
            }
            Inner::Listening { pending, .. } => {
                if !pending.is_empty() { PollMask::POLLIN } else { PollMask::empty() }
            }
            _ => PollMask::empty(),
        }
    }
}
