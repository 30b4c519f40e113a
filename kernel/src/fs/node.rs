//! The node ("inode"-level object) and superblock types.

use super::{cache::NodeCache, VfsError};
use crate::error::Errno;
use crate::multitasking::fd::FileLike;
use alloc::{string::String, sync::Arc, sync::Weak};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use util::mutex::Mutex;

/// What kind of thing a node is: regular file, directory, symlink, or a
/// device/fifo/socket special file carrying its `(major, minor)` pair.
/// Expressed as an enum rather than a raw union since Rust's sum types
/// make the discriminant and payload inseparable, which is exactly the
/// invariant a hand-rolled union would have to maintain by hand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeKind {
    Regular,
    Directory,
    Symlink,
    CharDevice { major: u32, minor: u32 },
    BlockDevice { major: u32, minor: u32 },
    Fifo,
    LocalSocket,
}

/// Node attributes (spec §3: "mode, uid/gid, size, times, link count").
#[derive(Clone, Copy, Debug)]
pub struct NodeAttr {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub nlink: u32,
    pub block_size: u32,
    pub block_count: u64,
}

impl NodeAttr {
    pub fn new(mode: u32) -> Self {
        Self {
            mode,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            nlink: 1,
            block_size: 4096,
            block_count: 0,
        }
    }
}

/// Callback-driven readdir (spec §4.7): the filesystem calls this for
/// each entry in order; returning `true` stops the iteration, letting the
/// caller terminate early when e.g. a user buffer fills (spec §8
/// "readdir terminating callback never advances the offset past the last
/// emitted entry").
pub trait ReaddirCallback {
    /// Returns `true` to stop iterating.
    fn emit(&mut self, name: &str, offset: u64, ino: u64, kind: NodeKind) -> bool;
}

pub trait DirectoryOps: Send + Sync {
    fn lookup(&self, dir: &Node, name: &str) -> Result<Arc<Node>, VfsError>;
    fn readdir(&self, dir: &Node, offset: u64, cb: &mut dyn ReaddirCallback) -> Result<(), VfsError>;
    fn mknode(&self, dir: &Node, name: &str, kind: NodeKind, mode: u32) -> Result<Arc<Node>, VfsError>;
    fn link(&self, dir: &Node, name: &str, target: &Node) -> Result<(), VfsError>;
    fn unlink(&self, dir: &Node, name: &str) -> Result<(), VfsError>;
    fn rmdir(&self, dir: &Node, name: &str) -> Result<(), VfsError>;
    fn symlink(&self, dir: &Node, name: &str, target: &str) -> Result<Arc<Node>, VfsError>;
    fn rename(&self, dir: &Node, name: &str, new_dir: &Node, new_name: &str) -> Result<(), VfsError>;
}

pub trait FileOps: Send + Sync {
    fn read(&self, node: &Node, offset: u64, buf: &mut [u8]) -> Result<usize, VfsError>;
    fn write(&self, node: &Node, offset: u64, buf: &[u8]) -> Result<usize, VfsError>;
}

pub trait SymlinkOps: Send + Sync {
    fn readlink(&self, node: &Node) -> Result<String, VfsError>;
}

/// A filesystem instance (spec §3): "a type pointer, root node, mount
/// point back-pointer, a node cache, flags". `root` and `mount_point`
/// intentionally form the one deliberate strong cycle in this module
/// (root keeps the superblock alive via `Node::superblock`, and the
/// superblock keeps root alive via `Superblock::root`) — the cycle is
/// broken explicitly at unmount, same as the teacher's explicit
/// `fat_fs = None` / `iso9660_fs = None` unmount idiom. Every *other*
/// node the superblock ever references lives only in `cache`, which
/// holds non-owning `Weak` handles (spec §9 "the design breaks it by
/// making the superblock's back-reference a non-owning pointer").
pub struct Superblock {
    pub fs_type: &'static str,
    root: Mutex<Option<Arc<Node>>>,
    /// Non-owning: the directory node this filesystem is mounted over, in
    /// the *parent* filesystem. `None` for the root filesystem.
    mount_point: Mutex<Option<Weak<Node>>>,
    pub cache: NodeCache,
    pub flags: u32,
    next_ino: AtomicU64,
}

impl Superblock {
    pub fn new(fs_type: &'static str, flags: u32) -> Arc<Self> {
        Arc::new(Self {
            fs_type,
            root: Mutex::new(None),
            mount_point: Mutex::new(None),
            cache: NodeCache::new(),
            flags,
            next_ino: AtomicU64::new(1),
        })
    }

    pub fn alloc_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }

    pub fn set_root(&self, root: Arc<Node>) {
        *self.root.lock() = Some(root);
    }

    pub fn root(&self) -> Arc<Node> {
        self.root
            .lock()
            .clone()
            .expect("superblock root accessed before mount() installed it")
    }

    pub fn set_mount_point(&self, node: &Arc<Node>) {
        *self.mount_point.lock() = Some(Arc::downgrade(node));
    }

    pub fn mount_point(&self) -> Option<Arc<Node>> {
        self.mount_point.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Busy if any node besides the root is still referenced from outside
    /// the cache (spec §4.7 "unmount fails if any node under the mount is
    /// busy").
    pub fn is_busy(&self) -> bool {
        self.cache.live_count() > 0
    }
}

/// One VFS node (spec §3's "inode-level object"). A node carrying
/// [`NodeKind::Directory`]/`Symlink`/`Regular` dispatches through the op
/// vtables; device/pipe/socket kinds carry no op vtable here since their
/// file-like behavior comes from the device or socket layer instead
/// (spec §4.8, §6 "Device driver interface").
pub struct Node {
    pub superblock: Arc<Superblock>,
    pub ino: u64,
    pub kind: NodeKind,
    attr: Mutex<NodeAttr>,
    dir_ops: Option<Arc<dyn DirectoryOps>>,
    file_ops: Option<Arc<dyn FileOps>>,
    symlink_ops: Option<Arc<dyn SymlinkOps>>,
    /// Set while this node is reachable from `superblock.cache`'s hash
    /// (spec §3 invariant: "a node with the cache bit set is reachable
    /// from its superblock's inode-hash").
    cached: AtomicBool,
    /// Non-empty exactly when another filesystem is mounted over this
    /// node (spec §4.7 "mount point").
    mounted_fs: Mutex<Option<Arc<Superblock>>>,
}

impl Node {
    pub fn new(
        superblock: Arc<Superblock>,
        ino: u64,
        kind: NodeKind,
        attr: NodeAttr,
        dir_ops: Option<Arc<dyn DirectoryOps>>,
        file_ops: Option<Arc<dyn FileOps>>,
        symlink_ops: Option<Arc<dyn SymlinkOps>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            superblock,
            ino,
            kind,
            attr: Mutex::new(attr),
            dir_ops,
            file_ops,
            symlink_ops,
            cached: AtomicBool::new(false),
            mounted_fs: Mutex::new(None),
        })
    }

    pub fn attr(&self) -> NodeAttr {
        *self.attr.lock()
    }

    pub fn set_attr(&self, attr: NodeAttr) {
        *self.attr.lock() = attr;
    }

    pub fn is_cached(&self) -> bool {
        self.cached.load(Ordering::Acquire)
    }

    pub(super) fn set_cached(&self, value: bool) {
        self.cached.store(value, Ordering::Release);
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory)
    }

    pub fn mounted_fs(&self) -> Option<Arc<Superblock>> {
        self.mounted_fs.lock().clone()
    }

    pub fn set_mounted_fs(&self, sb: Option<Arc<Superblock>>) {
        *self.mounted_fs.lock() = sb;
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<Node>, VfsError> {
        self.dir_ops
            .as_ref()
            .ok_or(VfsError::NotADirectory)?
            .lookup(self, name)
    }

    pub fn readdir(&self, offset: u64, cb: &mut dyn ReaddirCallback) -> Result<(), VfsError> {
        self.dir_ops
            .as_ref()
            .ok_or(VfsError::NotADirectory)?
            .readdir(self, offset, cb)
    }

    pub fn mknode(&self, name: &str, kind: NodeKind, mode: u32) -> Result<Arc<Node>, VfsError> {
        self.dir_ops.as_ref().ok_or(VfsError::NotADirectory)?.mknode(self, name, kind, mode)
    }

    pub fn unlink(&self, name: &str) -> Result<(), VfsError> {
        self.dir_ops.as_ref().ok_or(VfsError::NotADirectory)?.unlink(self, name)
    }

    pub fn rmdir(&self, name: &str) -> Result<(), VfsError> {
        self.dir_ops.as_ref().ok_or(VfsError::NotADirectory)?.rmdir(self, name)
    }

    pub fn symlink(&self, name: &str, target: &str) -> Result<Arc<Node>, VfsError> {
        self.dir_ops.as_ref().ok_or(VfsError::NotADirectory)?.symlink(self, name, target)
    }

    pub fn link(&self, name: &str, target: &Node) -> Result<(), VfsError> {
        self.dir_ops.as_ref().ok_or(VfsError::NotADirectory)?.link(self, name, target)
    }

    pub fn rename(&self, name: &str, new_dir: &Node, new_name: &str) -> Result<(), VfsError> {
        self.dir_ops.as_ref().ok_or(VfsError::NotADirectory)?.rename(self, name, new_dir, new_name)
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, VfsError> {
        self.file_ops.as_ref().ok_or(VfsError::IsADirectory)?.read(self, offset, buf)
    }

    pub fn write(&self, offset: u64, buf: &[u8]) -> Result<usize, VfsError> {
        self.file_ops.as_ref().ok_or(VfsError::IsADirectory)?.write(self, offset, buf)
    }

    pub fn readlink(&self) -> Result<String, VfsError> {
        self.symlink_ops.as_ref().ok_or(VfsError::InvalidPath)?.readlink(self)
    }
}

/// Lets an open regular-file node sit behind a process file descriptor
/// (spec §4.6's fd table holds anything implementing
/// [`crate::multitasking::fd::FileLike`]) with an independent seek offset
/// per open, tracked here rather than on the shared node.
pub struct OpenFile {
    node: Arc<Node>,
    offset: Mutex<u64>,
}

impl OpenFile {
    pub fn new(node: Arc<Node>) -> Arc<Self> {
        Arc::new(Self {
            node,
            offset: Mutex::new(0),
        })
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn seek(&self, offset: u64) {
        *self.offset.lock() = offset;
    }

    pub fn tell(&self) -> u64 {
        *self.offset.lock()
    }
}

impl FileLike for OpenFile {
    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        let mut offset = self.offset.lock();
        let n = self.node.read(*offset, buf).map_err(Errno::from)?;
        *offset += n as u64;
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Errno> {
        let mut offset = self.offset.lock();
        let n = self.node.write(*offset, buf).map_err(Errno::from)?;
        *offset += n as u64;
        Ok(n)
    }
}
