//! Signal numbers and per-process disposition table (spec §4.6). Pending
//! and blocked masks live on [`super::thread::Thread`] (per-thread, per
//! spec §3); this module only holds the process-wide action table and the
//! default-action classification used at the delivery checkpoint.

pub const NSIG: usize = 32;

pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGABRT: u32 = 6;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9;
pub const SIGSEGV: u32 = 11;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGSTOP: u32 = 19;
pub const SIGTSTP: u32 = 20;

/// What happens to a process that takes the default action for a signal
/// not otherwise dispositioned (spec §4.6 "ignore / default kill/stop/continue").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DefaultAction {
    Terminate,
    Ignore,
    Stop,
    Continue,
}

pub fn default_action(signum: u32) -> DefaultAction {
    match signum {
        SIGCHLD => DefaultAction::Ignore,
        SIGCONT => DefaultAction::Continue,
        SIGSTOP | SIGTSTP => DefaultAction::Stop,
        _ => DefaultAction::Terminate,
    }
}

/// A process's disposition for one signal number.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SignalDisposition {
    Default,
    Ignore,
    /// User handler entry point, dispatched on the return-to-user path
    /// with the saved context pushed to the alt-stack if configured (spec
    /// §4.6). The architecture-specific trampoline that actually builds
    /// that frame is out of core scope (spec §1); this just records where
    /// to jump.
    Handler(usize),
}

/// Per-process signal-action table (spec §3 "signal-action table").
#[derive(Clone, Copy)]
pub struct SignalActions {
    actions: [SignalDisposition; NSIG],
}

impl SignalActions {
    pub const fn new() -> Self {
        Self {
            actions: [SignalDisposition::Default; NSIG],
        }
    }

    pub fn get(&self, signum: u32) -> SignalDisposition {
        self.actions[signum as usize % NSIG]
    }

    pub fn set(&mut self, signum: u32, disposition: SignalDisposition) {
        self.actions[signum as usize % NSIG] = disposition;
    }
}

impl Default for SignalActions {
    fn default() -> Self {
        Self::new()
    }
}
