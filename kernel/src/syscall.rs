//! Syscall ABI (spec §6 "a `kernel::syscall` dispatch table keyed by
//! syscall number, errno-in-register convention"). Numbering and the
//! six-register calling convention follow
//! `original_source/lib/libc/include/eklat/syscall.h`'s x86_64 arm
//! (`rdi,rsi,rdx,r10,r8,r9`, return in `rax`) without reproducing libc;
//! the actual `syscall`-instruction trap entry and register
//! save/restore are architecture-specific plumbing spec §1 keeps out of
//! core scope; [`dispatch`] is the part of the path this crate owns.
//!
//! Every handler returns the same `isize` convention as
//! [`crate::error::Errno::to_syscall_return`]: `0 <= r` on success,
//! `-4095 <= r < 0` on failure with `-r - 1` identifying the [`Errno`].

use crate::error::Errno;
use crate::fs::{self, Node};
use crate::multitasking::{
    fd::FileLike,
    process::{self, ProcessId},
    signal::{self, SignalDisposition},
};
use alloc::{string::String, sync::Arc};

pub const SYS_EXIT: usize = 1;
pub const SYS_READ: usize = 2;
pub const SYS_WRITE: usize = 3;
pub const SYS_CLOSE: usize = 4;
pub const SYS_DUP: usize = 5;
pub const SYS_DUP2: usize = 6;
pub const SYS_GETPID: usize = 7;
pub const SYS_FORK: usize = 8;
pub const SYS_VFORK: usize = 9;
pub const SYS_EXECVE: usize = 10;
pub const SYS_WAITPID: usize = 11;
pub const SYS_KILL: usize = 12;
pub const SYS_SIGACTION: usize = 13;
pub const SYS_OPENAT: usize = 14;
pub const SYS_MKNODAT: usize = 15;
pub const SYS_FSTATAT: usize = 16;

/// Name table for debug logging/introspection, mirroring
/// `brianmayclone-anyos/kernel/src/syscall/table.rs`'s `SYSCALL_TABLE`.
pub const SYSCALL_TABLE: &[(usize, &str)] = &[
    (SYS_EXIT, "exit"),
    (SYS_READ, "read"),
    (SYS_WRITE, "write"),
    (SYS_CLOSE, "close"),
    (SYS_DUP, "dup"),
    (SYS_DUP2, "dup2"),
    (SYS_GETPID, "getpid"),
    (SYS_FORK, "fork"),
    (SYS_VFORK, "vfork"),
    (SYS_EXECVE, "execve"),
    (SYS_WAITPID, "waitpid"),
    (SYS_KILL, "kill"),
    (SYS_SIGACTION, "sigaction"),
    (SYS_OPENAT, "openat"),
    (SYS_MKNODAT, "mknodat"),
    (SYS_FSTATAT, "fstatat"),
];

pub fn syscall_name(id: usize) -> Option<&'static str> {
    SYSCALL_TABLE
        .iter()
        .find(|(num, _)| *num == id)
        .map(|(_, name)| *name)
}

/// Dispatches one trapped syscall. `args` is `[rdi, rsi, rdx, r10, r8,
/// r9]` in that order, already saved off the trap frame by the
/// (out-of-scope) architecture-specific entry stub.
pub fn dispatch(id: usize, args: [usize; 6]) -> isize {
    let [a0, a1, a2, _a3, _a4, _a5] = args;
    match id {
        SYS_EXIT => sys_exit(a0 as i32),
        SYS_READ => to_ret(sys_read(a0, a1 as *mut u8, a2)),
        SYS_WRITE => to_ret(sys_write(a0, a1 as *const u8, a2)),
        SYS_CLOSE => to_ret(sys_close(a0)),
        SYS_DUP => to_ret(sys_dup(a0)),
        SYS_DUP2 => to_ret(sys_dup2(a0, a1)),
        SYS_GETPID => sys_getpid(),
        SYS_FORK => to_ret(sys_fork()),
        SYS_VFORK => to_ret(sys_vfork()),
        SYS_EXECVE => to_ret(sys_execve(a0 as *const u8, a1)),
        SYS_WAITPID => to_ret(sys_waitpid(a0)),
        SYS_KILL => to_ret(sys_kill(a0, a1 as u32)),
        SYS_SIGACTION => to_ret(sys_sigaction(a0 as u32, a1)),
        _ => Errno::NotSupported.to_syscall_return(),
    }
}

fn to_ret(result: Result<usize, Errno>) -> isize {
    match result {
        Ok(value) => value as isize,
        Err(errno) => errno.to_syscall_return(),
    }
}

/// `exit(status)`: never returns to the caller.
fn sys_exit(status: i32) -> isize {
    process::exit_process(status)
}

fn sys_read(fd: usize, buf: *mut u8, len: usize) -> Result<usize, Errno> {
    let file = current_fd(fd)?;
    // SAFETY: the trap entry validates `buf..buf+len` lies in the
    // calling process's mapped user region before invoking dispatch;
    // that validation is the architecture-specific half spec §1 keeps
    // out of core scope.
    let slice = unsafe { core::slice::from_raw_parts_mut(buf, len) };
    file.read(slice)
}

fn sys_write(fd: usize, buf: *const u8, len: usize) -> Result<usize, Errno> {
    let file = current_fd(fd)?;
    let slice = unsafe { core::slice::from_raw_parts(buf, len) };
    file.write(slice)
}

fn sys_close(fd: usize) -> Result<usize, Errno> {
    let process = process::Process::current();
    let table = process.lock().fd_table().clone();
    table
        .write()
        .map_err(|_| Errno::IoError)?
        .close(fd)
        .map_err(Errno::from)?;
    Ok(0)
}

fn sys_dup(fd: usize) -> Result<usize, Errno> {
    let process = process::Process::current();
    let table = process.lock().fd_table().clone();
    table.write().map_err(|_| Errno::IoError)?.dup(fd).map_err(Errno::from)
}

fn sys_dup2(fd: usize, newfd: usize) -> Result<usize, Errno> {
    let process = process::Process::current();
    let table = process.lock().fd_table().clone();
    table
        .write()
        .map_err(|_| Errno::IoError)?
        .dup2(fd, newfd)
        .map_err(Errno::from)
}

fn sys_getpid() -> isize {
    process::Process::current().lock().id().as_u64() as isize
}

fn sys_fork() -> Result<usize, Errno> {
    let pid = process::fork(process::ForkFlags::default()).map_err(Errno::from)?;
    Ok(pid.as_u64() as usize)
}

fn sys_vfork() -> Result<usize, Errno> {
    let pid = process::vfork().map_err(Errno::from)?;
    Ok(pid.as_u64() as usize)
}

fn sys_waitpid(target: usize) -> Result<usize, Errno> {
    let target = if target == 0 {
        None
    } else {
        Some(ProcessId::from_raw(target as u64))
    };
    let (pid, _status) = process::waitpid(target).map_err(Errno::from)?;
    Ok(pid.as_u64() as usize)
}

fn sys_kill(target: usize, signum: u32) -> Result<usize, Errno> {
    if signum as usize >= signal::NSIG {
        return Err(Errno::InvalidArgument);
    }
    process::send_signal(ProcessId::from_raw(target as u64), signum).map_err(Errno::from)?;
    Ok(0)
}

fn sys_execve(path: *const u8, len: usize) -> Result<usize, Errno> {
    // SAFETY: see `sys_read`'s note on trap-entry buffer validation.
    let slice = unsafe { core::slice::from_raw_parts(path, len) };
    let name = core::str::from_utf8(slice).map_err(|_| Errno::InvalidArgument)?;
    process::exec(String::from(name)).map_err(Errno::from)?;
    Ok(0)
}

/// `sigaction(signum, handler)`: `handler == 0` restores the default
/// disposition, `handler == 1` ignores the signal, anything else is
/// installed as a user handler entry point (spec §4.6; the return-to-user
/// trampoline that actually jumps there is out of core scope per spec §1).
fn sys_sigaction(signum: u32, handler: usize) -> Result<usize, Errno> {
    if signum as usize >= signal::NSIG {
        return Err(Errno::InvalidArgument);
    }
    // SIGKILL/SIGSTOP cannot be caught (process.rs's `send_signal` always
    // terminates on SIGKILL before consulting the disposition table at
    // all; for SIGSTOP it still sets the process STOPPED and would dispatch
    // an installed `Handler` disposition, which is exactly the violation a
    // caller must never be allowed to set up).
    if signum == signal::SIGKILL || signum == signal::SIGSTOP {
        return Err(Errno::InvalidArgument);
    }
    let disposition = match handler {
        0 => SignalDisposition::Default,
        1 => SignalDisposition::Ignore,
        entry => SignalDisposition::Handler(entry),
    };
    let process = process::Process::current();
    process.lock().signal_actions_mut().set(signum, disposition);
    Ok(0)
}

fn current_fd(fd: usize) -> Result<Arc<dyn FileLike>, Errno> {
    let process = process::Process::current();
    let table = process.lock().fd_table().clone();
    let guard = table.read().map_err(|_| Errno::IoError)?;
    guard.get(fd).map_err(Errno::from)
}

/// `openat(dirfd, path, flags, mode)`: resolves `path` against an
/// explicit `root`/`start` pair rather than a process-wide cwd, since no
/// concrete filesystem is mounted as a live process root in this crate
/// (spec §1 keeps concrete filesystems out of scope) — a full port wires
/// these through whatever the boot sequence mounts as `/`.
pub fn sys_openat(root: &Arc<Node>, start: &Arc<Node>, path: &str) -> Result<Arc<Node>, Errno> {
    let resolved = fs::resolve(root, start, path).map_err(Errno::from)?;
    Ok(resolved.node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_syscall_returns_not_supported() {
        assert_eq!(
            dispatch(9999, [0; 6]),
            Errno::NotSupported.to_syscall_return()
        );
    }

    #[test]
    fn syscall_table_names_match_constants() {
        assert_eq!(syscall_name(SYS_GETPID), Some("getpid"));
        assert_eq!(syscall_name(SYS_EXECVE), Some("execve"));
        assert_eq!(syscall_name(42), None);
    }
}
