//! Per-process file descriptor table (spec §4.6): "a resizable array of
//! (file, close-on-exec) slots under a rw-lock. Allocation picks the
//! lowest free slot." Generalizes
//! `brianmayclone-anyos/kernel/src/fs/fd_table.rs`'s fixed-size
//! lowest-free-slot array into a growable `Vec`, and its closed-enum
//! `FdKind` into a `FileLike` trait object so any VFS node, socket, or pipe
//! endpoint can sit behind a descriptor without this table knowing which.

use super::ProcessError;
use crate::error::Errno;
use alloc::{sync::Arc, vec::Vec};

/// Anything a file descriptor can point at. The VFS node type and the
/// socket type (§4.7, §4.8) both implement this; this table only ever
/// touches files through the trait object.
pub trait FileLike: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno>;
    fn write(&self, buf: &[u8]) -> Result<usize, Errno>;
}

#[derive(Clone)]
struct FdEntry {
    file: Arc<dyn FileLike>,
    close_on_exec: bool,
}

#[derive(Clone, Default)]
pub struct FdTable {
    slots: Vec<Option<FdEntry>>,
}

impl FdTable {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Installs `file` at the lowest free slot, growing the table if every
    /// existing slot is occupied.
    pub fn install(&mut self, file: Arc<dyn FileLike>, close_on_exec: bool) -> usize {
        let entry = FdEntry { file, close_on_exec };
        if let Some(slot) = self.slots.iter_mut().position(|s| s.is_none()) {
            self.slots[slot] = Some(entry);
            return slot;
        }
        self.slots.push(Some(entry));
        self.slots.len() - 1
    }

    /// Installs `file` at exactly `fd` (used by `dup2`), growing the table
    /// if `fd` is past its current end.
    pub fn install_at(&mut self, fd: usize, file: Arc<dyn FileLike>, close_on_exec: bool) {
        if fd >= self.slots.len() {
            self.slots.resize(fd + 1, None);
        }
        self.slots[fd] = Some(FdEntry { file, close_on_exec });
    }

    pub fn get(&self, fd: usize) -> Result<Arc<dyn FileLike>, ProcessError> {
        self.slots
            .get(fd)
            .and_then(|s| s.as_ref())
            .map(|e| e.file.clone())
            .ok_or(ProcessError::InvalidFd)
    }

    pub fn close(&mut self, fd: usize) -> Result<Arc<dyn FileLike>, ProcessError> {
        let entry = self
            .slots
            .get_mut(fd)
            .and_then(|s| s.take())
            .ok_or(ProcessError::InvalidFd)?;
        Ok(entry.file)
    }

    /// `dup`: installs a clone of `fd`'s file at the lowest free slot,
    /// never inheriting close-on-exec (POSIX `dup` semantics).
    pub fn dup(&mut self, fd: usize) -> Result<usize, ProcessError> {
        let file = self.get(fd)?;
        Ok(self.install(file, false))
    }

    /// `dup2`: installs a clone of `fd`'s file at exactly `newfd`, closing
    /// whatever was there first.
    pub fn dup2(&mut self, fd: usize, newfd: usize) -> Result<usize, ProcessError> {
        let file = self.get(fd)?;
        self.install_at(newfd, file, false);
        Ok(newfd)
    }

    /// Drops every slot flagged close-on-exec, as `exec` must (spec §4.6).
    pub fn close_on_exec_all(&mut self) {
        for slot in self.slots.iter_mut() {
            if slot.as_ref().map_or(false, |e| e.close_on_exec) {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null;
    impl FileLike for Null {
        fn read(&self, _buf: &mut [u8]) -> Result<usize, Errno> {
            Ok(0)
        }
        fn write(&self, buf: &[u8]) -> Result<usize, Errno> {
            Ok(buf.len())
        }
    }

    #[test]
    fn allocates_lowest_free_slot() {
        let mut table = FdTable::new();
        let a = table.install(Arc::new(Null), false);
        let b = table.install(Arc::new(Null), false);
        assert_eq!((a, b), (0, 1));
        table.close(a).unwrap();
        let c = table.install(Arc::new(Null), false);
        assert_eq!(c, 0);
    }

    #[test]
    fn dup2_closes_whatever_was_at_newfd() {
        let mut table = FdTable::new();
        let a = table.install(Arc::new(Null), false);
        table.install(Arc::new(Null), false);
        table.dup2(a, 5).unwrap();
        assert!(table.get(5).is_ok());
    }
}
