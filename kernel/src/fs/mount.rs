//! Mount stacking: `mount(dir, backing-device, fs-type, flags, data)`
//! invokes the type's `mount` callback returning a superblock whose root
//! is stitched over `dir`; unmount fails if any node under the mount is
//! busy.

use super::{node::Node, Superblock, VfsError};
use alloc::{sync::Arc, vec::Vec};
use util::mutex::Mutex;

/// A filesystem's `mount`/`stat` entry point. Concrete filesystems
/// (ramfs, devfs, procfs, sysfs, tarfs) plug in by implementing this
/// trait; only the interface itself lives here.
pub trait FilesystemType: Send + Sync {
    fn name(&self) -> &'static str;
    fn mount(&self, flags: u32, data: &str) -> Result<Arc<Superblock>, VfsError>;
}

struct MountEntry {
    dir: Arc<Node>,
    superblock: Arc<Superblock>,
}

/// The global stack of active mounts, purely for enumeration (`/proc/mounts`-
/// style listing); the authoritative mount link lives on the directory
/// node itself (`Node::mounted_fs`), since path resolution needs to find
/// it starting from an arbitrary node, not by scanning a flat list.
pub struct MountTable {
    mounts: Mutex<Vec<MountEntry>>,
}

impl MountTable {
    pub const fn new() -> Self {
        Self {
            mounts: Mutex::new(Vec::new()),
        }
    }

    pub fn mount(
        &self,
        dir: &Arc<Node>,
        fs_type: &dyn FilesystemType,
        flags: u32,
        data: &str,
    ) -> Result<Arc<Superblock>, VfsError> {
        if !dir.is_directory() {
            return Err(VfsError::NotADirectory);
        }
        if dir.mounted_fs().is_some() {
            return Err(VfsError::Busy);
        }
        let superblock = fs_type.mount(flags, data)?;
        superblock.set_mount_point(dir);
        dir.set_mounted_fs(Some(superblock.clone()));
        self.mounts.lock().push(MountEntry {
            dir: dir.clone(),
            superblock: superblock.clone(),
        });
        Ok(superblock)
    }

    pub fn unmount(&self, dir: &Arc<Node>) -> Result<(), VfsError> {
        let superblock = dir.mounted_fs().ok_or(VfsError::NotFound)?;
        if superblock.is_busy() {
            return Err(VfsError::Busy);
        }
        dir.set_mounted_fs(None);
        self.mounts
            .lock()
            .retain(|entry| !Arc::ptr_eq(&entry.dir, dir));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.mounts.lock().len()
    }
}
