pub mod fd;
pub mod process;
pub mod scheduler;
pub mod session;
pub mod signal;
pub mod thread;

use core::fmt;

/// Process/thread-table errors (spec §4.6). Kept alongside the module
/// tree rather than inside `process.rs` so `error.rs` can name it without
/// reaching past `multitasking` into a specific file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    UnknownProcess,
    UnknownThread,
    NotAChild,
    PermissionDenied,
    AlreadyZombie,
    InvalidSignal,
    FdTableFull,
    InvalidFd,
    SessionLeaderAlready,
    /// A blocking wait (`waitpid`, `vfork`) ended because a signal was
    /// delivered to the caller rather than because the condition it was
    /// waiting on was met (spec §5 "-EINTR when a signal is pending").
    Interrupted,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ProcessError::UnknownProcess => "unknown process id",
            ProcessError::UnknownThread => "unknown thread id",
            ProcessError::NotAChild => "not a child of the calling process",
            ProcessError::PermissionDenied => "permission denied",
            ProcessError::AlreadyZombie => "process already a zombie",
            ProcessError::InvalidSignal => "invalid signal number",
            ProcessError::FdTableFull => "file descriptor table full",
            ProcessError::InvalidFd => "invalid file descriptor",
            ProcessError::SessionLeaderAlready => "process is already a session/group leader",
            ProcessError::Interrupted => "interrupted by a signal",
        };
        write!(f, "{}", msg)
    }
}

impl core::error::Error for ProcessError {}

impl From<ProcessError> for crate::error::Errno {
    fn from(error: ProcessError) -> Self {
        match error {
            ProcessError::UnknownProcess | ProcessError::UnknownThread => {
                crate::error::Errno::NotFound
            }
            ProcessError::NotAChild => crate::error::Errno::InvalidArgument,
            ProcessError::PermissionDenied => crate::error::Errno::PermissionDenied,
            ProcessError::AlreadyZombie => crate::error::Errno::InvalidArgument,
            ProcessError::InvalidSignal => crate::error::Errno::InvalidArgument,
            ProcessError::FdTableFull => crate::error::Errno::OutOfMemory,
            ProcessError::InvalidFd => crate::error::Errno::InvalidArgument,
            ProcessError::SessionLeaderAlready => crate::error::Errno::InvalidArgument,
            ProcessError::Interrupted => crate::error::Errno::Interrupted,
        }
    }
}
