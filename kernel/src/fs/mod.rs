//! Virtual filesystem: the polymorphic node/superblock layer, path
//! resolution with mount stacking and symlink loop detection, and a
//! per-superblock inode cache.
//!
//! New module, grounded on `brianmayclone-anyos/kernel/src/fs/vfs.rs`
//! for the `Filesystem` trait shape and error enum, generalized from its
//! single FAT-mount design into a polymorphic node/superblock/mount-stack
//! model; the node cache is grounded on `util::hashmap::HashMap`'s
//! open-chaining + resize-on-load-factor idiom.

pub mod cache;
pub mod mount;
pub mod node;
pub mod path;

use core::fmt;

pub use cache::NodeCache;
pub use mount::{FilesystemType, MountTable};
pub use node::{
    DirectoryOps, FileOps, Node, NodeAttr, NodeKind, ReaddirCallback, SymlinkOps,
};
pub use path::{resolve, ResolvedPath};

/// Filesystem operation error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsError {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    NoSpace,
    IoError,
    InvalidPath,
    SymlinkLoop,
    Busy,
    CrossDevice,
    NotSupported,
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            VfsError::NotFound => "no such file or directory",
            VfsError::PermissionDenied => "permission denied",
            VfsError::AlreadyExists => "file exists",
            VfsError::NotADirectory => "not a directory",
            VfsError::IsADirectory => "is a directory",
            VfsError::NoSpace => "no space left on device",
            VfsError::IoError => "I/O error",
            VfsError::InvalidPath => "invalid path",
            VfsError::SymlinkLoop => "too many levels of symbolic links",
            VfsError::Busy => "resource busy",
            VfsError::CrossDevice => "invalid cross-device link",
            VfsError::NotSupported => "operation not supported",
        };
        write!(f, "{}", msg)
    }
}

impl core::error::Error for VfsError {}

impl From<VfsError> for crate::error::Errno {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound => crate::error::Errno::NotFound,
            VfsError::PermissionDenied => crate::error::Errno::PermissionDenied,
            VfsError::AlreadyExists => crate::error::Errno::InvalidArgument,
            VfsError::NotADirectory | VfsError::IsADirectory => crate::error::Errno::InvalidArgument,
            VfsError::NoSpace => crate::error::Errno::OutOfMemory,
            VfsError::IoError => crate::error::Errno::IoError,
            VfsError::InvalidPath => crate::error::Errno::InvalidArgument,
            VfsError::SymlinkLoop => crate::error::Errno::InvalidArgument,
            VfsError::Busy => crate::error::Errno::Busy,
            VfsError::CrossDevice => crate::error::Errno::CrossDevice,
            VfsError::NotSupported => crate::error::Errno::NotSupported,
        }
    }
}

/// Symlink traversal limit.
pub const MAX_SYMLINKS: u32 = 64;
