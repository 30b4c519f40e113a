//! Per-CPU priority-ordered run-queues with work-stealing, tick-driven
//! preemption and wait-queue blocking (spec §4.5). Generalizes the
//! teacher's single global ready/running/dying `VecDeque<Thread>` trio
//! into an array of per-CPU run-queues; only CPU 0 is actually brought up
//! by this boot path (AP bring-up is architecture bootstrap, out of core
//! scope per spec §1), so [`MAX_CPUS`] is sized for a future SMP port
//! rather than exercised end-to-end here.

use super::{
    process::ThreadId,
    thread::{Thread, ThreadRunState},
};
use crate::sync::WakeReason;
use alloc::collections::{BTreeMap, VecDeque};
use core::{
    arch::asm,
    ptr::addr_of_mut,
    sync::atomic::{AtomicBool, Ordering},
};
use util::mutex::Mutex;
use x86_64::instructions::hlt;

/// Upper bound on CPUs this kernel can schedule across (spec §4.5). The
/// boot path only ever activates CPU 0; the array exists so a second
/// architecture port (or an AP bring-up sequence added later) has
/// somewhere to register additional per-CPU run-queues without touching
/// this file's scheduling algorithm.
pub const MAX_CPUS: usize = 8;

static mut SCHEDULER: Scheduler = Scheduler {
    cpus: [
        RunQueue::new(),
        RunQueue::new(),
        RunQueue::new(),
        RunQueue::new(),
        RunQueue::new(),
        RunQueue::new(),
        RunQueue::new(),
        RunQueue::new(),
    ],
    running_thread: None,
    active_cpu: 0,
    blocked_threads: Mutex::new(VecDeque::new()),
    dying_threads: Mutex::new(VecDeque::new()),
    running_thread_is_finished: AtomicBool::new(false),
};

/// A per-CPU run-queue (spec §3, glossary "Run-queue"): ready threads
/// ordered by numeric priority (lower `pri` = higher priority), FIFO
/// within a priority level (spec §4.5 "ties are FIFO by enqueue order").
struct RunQueue {
    levels: BTreeMap<u8, VecDeque<Thread>>,
}

impl RunQueue {
    const fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    fn push(&mut self, thread: Thread) {
        self.levels
            .entry(thread.pri())
            .or_insert_with(VecDeque::new)
            .push_back(thread);
    }

    /// Pops the best-priority (lowest `pri`), oldest-enqueued thread.
    fn pop_best(&mut self) -> Option<Thread> {
        let key = *self.levels.iter().find(|(_, q)| !q.is_empty())?.0;
        let queue = self.levels.get_mut(&key)?;
        let thread = queue.pop_front();
        if queue.is_empty() {
            self.levels.remove(&key);
        }
        thread
    }

    fn peek_best_pri(&self) -> Option<u8> {
        self.levels.iter().find(|(_, q)| !q.is_empty()).map(|(k, _)| *k)
    }

    /// Removes the best-priority *steal candidate*: a ready thread not
    /// nested inside kernel mode on its current CPU (spec §4.5: "a steal
    /// is refused when the candidate is nested inside kernel mode on a
    /// different CPU"), and whose affinity allows `thief_cpu`.
    fn steal_for(&mut self, thief_cpu: u32) -> Option<Thread> {
        for queue in self.levels.values_mut() {
            if let Some(pos) = queue
                .iter()
                .position(|t| t.kernel_nest_level() <= 1 && t.may_run_on(thief_cpu))
            {
                return queue.remove(pos);
            }
        }
        None
    }
}

pub struct Scheduler {
    cpus: [RunQueue; MAX_CPUS],
    /// The thread currently executing on the active CPU. A genuine SMP
    /// port would make this `[Option<Thread>; MAX_CPUS]`; kept singular
    /// here because exactly one CPU is ever brought up.
    running_thread: Option<Thread>,
    active_cpu: u32,
    /// Threads parked on a [`crate::sync::WaitQueue`] — off every
    /// run-queue, `runq_cpu() == None` (spec §3).
    blocked_threads: Mutex<VecDeque<Thread>>,
    // todo: this needs to be a rwlock or finializer thread + schedule could
    // deadlock each other
    dying_threads: Mutex<VecDeque<Thread>>,
    running_thread_is_finished: AtomicBool,
}

pub fn schedule() {
    unsafe { Scheduler::the().schedule() }
}

impl Scheduler {
    pub fn add_thread(&mut self, mut thread: Thread) {
        thread.set_state(ThreadRunState::Paused);
        thread.set_runq_cpu(Some(self.active_cpu));
        self.cpus[self.active_cpu as usize].push(thread);
    }

    pub fn finish_current_thread() -> ! {
        let scheduler = unsafe { Self::the() };
        scheduler
            .running_thread_is_finished
            .store(true, Ordering::Relaxed);

        // Trigger scheduling
        loop {
            hlt();
        }
    }

    pub fn dying_threads(&mut self) -> &Mutex<VecDeque<Thread>> {
        &self.dying_threads
    }

    pub fn init(mut thread: Thread) {
        let scheduler = unsafe { Self::the() };
        thread.set_state(ThreadRunState::Running);
        thread.set_runq_cpu(None);
        scheduler._init(thread);
    }

    pub fn _init(&mut self, thread: Thread) {
        self.running_thread = Some(thread);
    }

    pub(crate) unsafe fn the() -> &'static mut Scheduler {
        &mut *addr_of_mut!(SCHEDULER)
    }

    /// The CPU the calling core is executing as. Always 0 until an AP
    /// bring-up sequence is wired in by an architecture port (spec §6).
    pub fn current_cpu_id() -> u32 {
        0
    }

    pub fn current_tid() -> ThreadId {
        unsafe { Self::the().current_thread().id() }
    }

    /// Picks the next thread to run on the active CPU: its own run-queue
    /// first, then work-stealing the best eligible candidate from another
    /// CPU's run-queue (spec §4.5 "on tick... may also steal the best
    /// non-idle thread from another CPU's queue").
    fn pick_next(&mut self) -> Option<Thread> {
        let active = self.active_cpu as usize;
        if let Some(t) = self.cpus[active].pop_best() {
            return Some(t);
        }
        for i in 0..MAX_CPUS {
            if i == active {
                continue;
            }
            if let Some(t) = self.cpus[i].steal_for(self.active_cpu) {
                return Some(t);
            }
        }
        None
    }

    pub fn schedule(&mut self) {
        if let Some(mut new_thread) = self.pick_next() {
            let mut old_thread = self.running_thread.take().unwrap();

            let old_cr3 = old_thread.cr3();
            let new_cr3 = new_thread.cr3();

            new_thread.set_state(ThreadRunState::Running);
            new_thread.set_runq_cpu(None);
            let new_rsp = new_thread.last_stack_ptr();
            let old_rsp = old_thread.last_stack_ptr_mut() as *mut u64;

            if self.running_thread_is_finished.load(Ordering::SeqCst) {
                old_thread.set_state(ThreadRunState::Zombie);
                self.dying_threads.lock().push_back(old_thread);
                self.running_thread_is_finished
                    .store(false, Ordering::Relaxed);
            } else if old_thread.state() == ThreadRunState::Waiting {
                // Blocked by `WaitQueue::wait`'s `park` closure just before
                // calling us: leave it off every run-queue, parked in
                // `blocked_threads` until `wake` finds it by tid.
                self.blocked_threads.lock().push_back(old_thread);
            } else {
                old_thread.set_state(ThreadRunState::Paused);
                old_thread.set_runq_cpu(Some(self.active_cpu));
                self.cpus[self.active_cpu as usize].push(old_thread);
            }

            self.running_thread = Some(new_thread);

            unsafe { task_switch(old_rsp, new_rsp, old_cr3, new_cr3) };
        }
    }

    /// Marks the running thread WAITING and reschedules, handing the CPU
    /// to the next runnable thread (spec §5 suspension points). Called
    /// from [`crate::sync::WaitQueue::wait`]'s `park` hook, strictly after
    /// the caller's mutex has been released and the waiter linked onto
    /// the queue, closing the "lost wakeup" race spec §9 calls out.
    pub fn block_current_and_reschedule() {
        let scheduler = unsafe { Self::the() };
        if let Some(running) = scheduler.running_thread.as_mut() {
            running.set_state(ThreadRunState::Waiting);
        }
        scheduler.schedule();
    }

    /// Moves a blocked thread back onto a run-queue (spec §5 "signaling
    /// wakes one... moving woken threads back to runnable"), recording
    /// `reason` on it so the `WaitQueue::wait` call it is parked in can
    /// report why the wait ended once it runs again (spec §5 "a thread
    /// blocked on a wait-queue can be woken with a result code"). Picks the
    /// lowest-numbered CPU the thread's affinity allows; a real SMP port
    /// would also send a resched IPI to that CPU if it is a different
    /// one than the caller's. A no-op if `tid` isn't currently parked.
    pub fn wake(tid: ThreadId, reason: WakeReason) {
        let scheduler = unsafe { Self::the() };
        let mut blocked = scheduler.blocked_threads.lock();
        let Some(pos) = blocked.iter().position(|t| t.id() == tid) else {
            return;
        };
        let mut thread = blocked.remove(pos).unwrap();
        drop(blocked);

        thread.set_wake_reason(reason);
        let target_cpu = (0..MAX_CPUS as u32)
            .find(|cpu| thread.may_run_on(*cpu))
            .unwrap_or(0);
        thread.set_state(ThreadRunState::Paused);
        thread.set_runq_cpu(Some(target_cpu));
        scheduler.cpus[target_cpu as usize].push(thread);
    }

    /// Reads and clears the current thread's recorded wake reason,
    /// defaulting to `Normal` if [`Self::wake`] never ran against it (e.g.
    /// the thread never actually blocked). Called by
    /// [`crate::sync::WaitQueue::wait`] the instant its `park` hook
    /// returns, since by then this is once again the running thread.
    pub fn take_wake_reason() -> WakeReason {
        let scheduler = unsafe { Self::the() };
        scheduler
            .current_thread_mut()
            .take_wake_reason()
            .unwrap_or(WakeReason::Normal)
    }

    /// Tick-driven preemption check (spec §4.5): if a strictly
    /// better-priority thread than the one currently running is ready,
    /// reschedule. Called from the architecture timer handler at the
    /// debounced 10 ms granularity spec names.
    pub fn tick() {
        let scheduler = unsafe { Self::the() };
        let current_pri = scheduler
            .running_thread
            .as_ref()
            .map(|t| t.pri())
            .unwrap_or(u8::MAX);
        let active = scheduler.active_cpu as usize;
        if scheduler.cpus[active]
            .peek_best_pri()
            .map_or(false, |best| best < current_pri)
        {
            scheduler.schedule();
        }
    }

    /// Sweeps `blocked_threads` for waiters past their deadline, waking
    /// each with [`WakeReason::TimedOut`] (spec §5 "a periodic sweep wakes
    /// expired waiters [with] an indicator return code"), so the
    /// `WaitQueue::wait` call it is parked in returns `-ETIMEDOUT` instead
    /// of silently looking like a normal wake.
    pub fn sweep_timeouts(now: u64) {
        let scheduler = unsafe { Self::the() };
        let expired: alloc::vec::Vec<ThreadId> = scheduler
            .blocked_threads
            .lock()
            .iter()
            .filter(|t| t.wait_deadline().map_or(false, |d| d <= now))
            .map(|t| t.id())
            .collect();
        for tid in expired {
            Self::wake(tid, WakeReason::TimedOut);
        }
    }

    pub fn current_thread(&self) -> &Thread {
        self.running_thread.as_ref().unwrap()
    }

    pub fn current_thread_mut(&mut self) -> &mut Thread {
        self.running_thread.as_mut().unwrap()
    }

    /// Finds `tid` wherever it currently lives (running, ready on some
    /// CPU's run-queue, or parked on a wait-queue) and runs `f` on it. Used
    /// by signal delivery (spec §4.6), which must be able to raise a
    /// pending bit on a thread regardless of whether it happens to be
    /// executing right now.
    pub fn with_thread<R>(&mut self, tid: ThreadId, f: impl FnOnce(&mut Thread) -> R) -> Option<R> {
        if let Some(running) = self.running_thread.as_mut() {
            if running.id() == tid {
                return Some(f(running));
            }
        }
        for cpu in self.cpus.iter_mut() {
            for queue in cpu.levels.values_mut() {
                if let Some(thread) = queue.iter_mut().find(|t| t.id() == tid) {
                    return Some(f(thread));
                }
            }
        }
        let mut blocked = self.blocked_threads.lock();
        if let Some(thread) = blocked.iter_mut().find(|t| t.id() == tid) {
            return Some(f(thread));
        }
        None
    }
}

macro_rules! save_state {
    () => {
        "pushfq; push rax; push rcx; push rdx; push rbx; sub rsp, 8; push rbp; push rsi; push rdi; push r8; push r9; push r10; push r11; push r12; push r13; push r14; push r15"
    };
}

// skip rsp because we cant pop it as this would corrupt the stack layout
macro_rules! restore_state {
    () => {
        "pop r15; pop r14; pop r13; pop r12; pop r11; pop r10; pop r9; pop r8; pop rdi; pop rsi; pop rbp; add rsp, 8; pop rbx; pop rdx; pop rcx; pop rax; popfq"
    };
}

#[naked]
unsafe extern "C" fn task_switch(old_rsp: *mut u64, new_rsp: u64, old_cr3: u64, new_cr3: u64) {
    asm!(
        save_state!(),
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "cmp rdx, rcx",
        "je 1f",
        "mov cr3, rcx",
        "1:",
        restore_state!(),
        "ret",
        options(noreturn)
    )
}
