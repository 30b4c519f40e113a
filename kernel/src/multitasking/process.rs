use super::{
    fd::FdTable,
    scheduler::Scheduler,
    session,
    signal::{self, DefaultAction, SignalActions, SignalDisposition},
    thread::{Thread, ThreadEntryFunc, ThreadPriority},
    ProcessError,
};
use crate::{
    error::KernelError,
    memory::{
        address_space::AddressSpace,
        manager::{AllocationStrategy, MemoryManager},
        region::{AccessFlags, RegionType, VirtualMemoryRegion},
        virtual_memory_object::MemoryBackedVirtualMemoryObject,
    },
    sync::{WaitQueue, WakeReason},
    GlobalData,
};
use alloc::{boxed::Box, collections::BTreeMap, format, string::String, sync::Arc, vec::Vec};
use api::BootInfo;
use core::sync::atomic::{AtomicU64, Ordering::Relaxed};
use util::{
    hashmap::HashMap,
    mutex::{Mutex, MutexGuard},
    rwlock::RwLock,
};
use x86_64::{
    memory::{PageAlignedSize, PageRangeInclusive, KIB},
    paging::{PageTableEntryFlags, Translator},
    register::Cr3,
};
/**
 *  https://www.youtube.com/watch?v=3xgOybGlYes&t=1090s
 *
 * The complete memory management is handled by the MemoryManager. It allocates
 * frames, handles page faults etc
 *
 * The kernel is one process. Therefore, an execution unit in the kernel space will always
 * be a kernel thread not a process.
 *
 * Each process has an associated address space. The address space manages the
 * page table and virtual memory allocations. The allocated virtual memory is
 * stored inside VirtualMemoryRegions.
 *
 * Each VirtualMemoryRegion is backed by a VirtualMemoryObject. This object
 * is either RAM backed or file backed.
 *
 * The VirtualMemoryObject is responsible for allocating physical memory for itself
 *
 *
 * AnonymousVMObject::try_create_with_size = lazy, allocate frame when pagefault
 * AnonymousVMObject::try_create_with_physical_pages => create pages
 *
 *
 *
 * The address space contains virtual
 * memory regions.
 *
 *
 *
 * userspace directory has copy of complete kernel space directory
 * kernel mapped into every process
 *
 *
 * Each process has a virtual memory manager
 * Each thread has a kernel and user stack.
 *  + User stack initialization should be done by whatever loads the executable
 *
 *
 *
 * Initial "colonel" process which runs the idle loop
 *  - only ever runs when there is nothing to do
 *  - has pid 0
 *
 * - finializer kernel process: tears down dead processes in zombie state
 *
 * all process list which is basically a linked_list of processes
 *
 * enable interrupts once multitasking is ready
 *
 *  Every Process has an AddressSpace.
    - An AddressSpace has a number of Region objects, each with a virtual base address, size, permission bits, etc.
    - Every Region has an underlying VMObject.

- VMObject is virtual and can be AnonymousVMObject (MAP_ANONYMOUS) or InodeVMObject (MAP_FILE).

- Cross-process memory sharing occurs when two or more Regions in separate AddressSpaces use the same underlying VMObject.

- MemoryManager handles physical page allocation, fault handling, page tables, etc.
 *
 */

static PROCESS_TREE: Mutex<ProcessTree> = Mutex::new(ProcessTree::new());
static COLONEL_ID: Mutex<Option<ProcessId>> = Mutex::new(None);
const DEFAULT_STACK_SIZE: PageAlignedSize = PageAlignedSize::new(32 * KIB as usize);

/// Per-parent wait-queues `waitpid` blocks on (spec §4.6 "`waitpid` blocks
/// on a per-process wait-queue until a child reports"). Kept as a table
/// keyed by parent id rather than a field on [`Process`] itself: a
/// `WaitQueue` living inside the very `Mutex<Process>` a blocking caller
/// must also pass as the guard to [`crate::sync::WaitQueue::wait`] would
/// alias the guard it is consuming.
static CHILD_WAITQUEUES: Mutex<BTreeMap<ProcessId, Arc<WaitQueue>>> = Mutex::new(BTreeMap::new());
/// Wait-queues `vfork`'s caller blocks on until the named child execs or
/// exits (spec §4.6). Keyed by the *child's* id and torn down the moment
/// it is signaled, so presence in the map doubles as "still vforked".
static VFORK_WAITQUEUES: Mutex<BTreeMap<ProcessId, Arc<WaitQueue>>> = Mutex::new(BTreeMap::new());

fn child_wait_queue(parent_id: ProcessId) -> Arc<WaitQueue> {
    CHILD_WAITQUEUES
        .lock()
        .entry(parent_id)
        .or_insert_with(|| Arc::new(WaitQueue::new()))
        .clone()
}

fn release_vfork_parent(child_id: ProcessId) {
    if let Some(wq) = VFORK_WAITQUEUES.lock().remove(&child_id) {
        wq.broadcast();
    }
}

struct ProcessTree {
    inner: BTreeMap<ProcessId, Arc<Mutex<Process>>>,
}

impl ProcessTree {
    pub const fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    pub fn add_process(&mut self, id: ProcessId, process: Arc<Mutex<Process>>) {
        self.inner.insert(id, process);
    }

    pub fn get(&self, id: ProcessId) -> Option<Arc<Mutex<Process>>> {
        self.inner.get(&id).cloned()
    }

    /// Drops a reaped zombie from the tree (spec §4.6 "the process moves to
    /// ZOMBIE ... `waitpid` blocks ... until a child reports", implying the
    /// entry is retired once reported). Only ever called by `waitpid` after
    /// it has observed `Zombie` state and captured the exit status.
    pub fn remove(&mut self, id: ProcessId) -> Option<Arc<Mutex<Process>>> {
        self.inner.remove(&id)
    }

    pub fn lock() -> MutexGuard<'static, Self> {
        PROCESS_TREE.lock()
    }
}

#[derive(Clone, Copy, PartialEq, PartialOrd, Eq, Ord, Debug)]
pub struct ProcessId(u64);

impl ProcessId {
    pub fn new() -> Self {
        static IDS: AtomicU64 = AtomicU64::new(0);
        Self(IDS.fetch_add(1, Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Reconstructs a `ProcessId` from a raw value crossing the syscall
    /// boundary (spec §6), e.g. the `pid` argument to `waitpid`/`kill`.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

pub type ThreadId = usize;

/// Spec §4.6 process states. `Stopped` is what `SIGSTOP`/`SIGTSTP` move a
/// process to ("STOPPED suppresses enqueue"); resuming scheduling a
/// stopped process's threads on `SIGCONT` delivery is left to the
/// scheduler integration point a thread's return-to-user checkpoint would
/// call, since that checkpoint itself is architecture-specific plumbing
/// out of core scope (spec §1).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcessState {
    Running,
    Stopped,
    Zombie,
}

/// Process credentials (spec §5 "process credentials are shared; mutations
/// affect all threads immediately" — `Process` holds exactly one copy, not
/// one per thread).
#[derive(Clone, Copy, Debug)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub egid: u32,
}

impl Credentials {
    pub const fn root() -> Self {
        Self {
            uid: 0,
            gid: 0,
            euid: 0,
            egid: 0,
        }
    }
}

/// Flags controlling how `fork` sets up the child (spec §4.6 "sharing or
/// copying the address space per flags").
#[derive(Clone, Copy, Default)]
pub struct ForkFlags {
    pub share_address_space: bool,
    pub share_fd_table: bool,
}

pub struct Process {
    id: ProcessId,
    name: String,
    address_space: AddressSpace,
    memory_regions: HashMap<ThreadId, Vec<VirtualMemoryRegion>>,
    cur_thread_id: ThreadId,
    parent: Option<ProcessId>,
    children: Vec<ProcessId>,
    threads: Vec<ThreadId>,
    state: ProcessState,
    credentials: Credentials,
    fd_table: Arc<RwLock<FdTable>>,
    signal_actions: SignalActions,
    exit_status: Option<i32>,
    /// Set for a child created by `vfork`, cleared (and the parent woken)
    /// the moment it execs or exits (spec §4.6).
    vfork_parent: Option<ProcessId>,
}

impl Process {
    pub fn new<N>(name: N, cr3: u64) -> Self
    where
        N: Into<String>,
    {
        Self {
            id: ProcessId::new(),
            name: name.into(),
            address_space: AddressSpace::new(cr3, GlobalData::the().physical_memory_offset()),
            memory_regions: HashMap::new(),
            cur_thread_id: 0,
            parent: None,
            children: Vec::new(),
            threads: Vec::new(),
            state: ProcessState::Running,
            credentials: Credentials::root(),
            fd_table: Arc::new(RwLock::new(FdTable::new())),
            signal_actions: SignalActions::new(),
            exit_status: None,
            vfork_parent: None,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn current() -> Arc<Mutex<Process>> {
        unsafe { Scheduler::the().current_thread().process.clone() }
    }

    pub fn address_space(&mut self) -> &mut AddressSpace {
        &mut self.address_space
    }

    pub fn cr3(&self) -> u64 {
        self.address_space.cr3()
    }

    pub fn next_thread_id(&mut self) -> ThreadId {
        let ret = self.cur_thread_id;
        self.cur_thread_id += 1;
        ret
    }

    pub fn add_thread(&mut self, tid: ThreadId) {
        self.threads.push(tid);
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn parent(&self) -> Option<ProcessId> {
        self.parent
    }

    pub fn children(&self) -> &[ProcessId] {
        &self.children
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials
    }

    pub fn fd_table(&self) -> &Arc<RwLock<FdTable>> {
        &self.fd_table
    }

    pub fn signal_actions(&self) -> &SignalActions {
        &self.signal_actions
    }

    pub fn signal_actions_mut(&mut self) -> &mut SignalActions {
        &mut self.signal_actions
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }
}

pub fn colonel_id() -> Option<ProcessId> {
    *COLONEL_ID.lock()
}

pub fn init(boot_info: &'static BootInfo) -> Result<(), KernelError> {
    let process = Arc::new(Mutex::new(Process::new("colonel", Cr3::read_raw())));
    let pid = process.lock().id();

    PROCESS_TREE.lock().add_process(pid, process.clone());
    *COLONEL_ID.lock() = Some(pid);
    session::init_own_session(pid);

    let mut memory_manager = MemoryManager::the().lock();

    let kernel_stack_range: PageRangeInclusive = boot_info.kernel_stack.into();

    let mut kernel_stack_boot_frames = Vec::new();
    let page_table = memory_manager.kernel_page_table();
    // skip guard page
    for page in kernel_stack_range.iter().skip(1) {
        let (frame, _) = page_table
            .translate(page)
            .map_err(|_| KernelError::Memory(crate::memory::MemoryError::InvalidRange))?;
        kernel_stack_boot_frames.push(frame);
    }

    let obj = MemoryBackedVirtualMemoryObject::new(kernel_stack_boot_frames);

    let stack_name = "colonel_stack";

    memory_manager.region_tree().try_allocate_range_in_region(
        stack_name,
        RegionType::Stack,
        kernel_stack_range.clone(),
    )?;

    let stack = VirtualMemoryRegion::new(
        kernel_stack_range,
        stack_name,
        Box::new(obj),
        RegionType::Stack,
        AccessFlags::ReadWrite,
    );

    let next_id = process.lock().next_thread_id();
    process.lock().add_thread(next_id);

    let thread = Thread::colonel_thread(next_id, "colonel_thread", process, stack);

    Scheduler::init(thread);

    Ok(())
}

fn try_create_stack_thread(
    process: Arc<Mutex<Process>>,
    name: String,
    allocation_strategy: AllocationStrategy,
) -> Result<VirtualMemoryRegion, KernelError> {
    MemoryManager::the().lock().allocate_region_with_size(
        process,
        DEFAULT_STACK_SIZE,
        name,
        RegionType::Stack,
        PageTableEntryFlags::WRITABLE
            | PageTableEntryFlags::PRESENT
            | PageTableEntryFlags::NO_EXECUTE,
        allocation_strategy,
    )
}

pub fn spawn_kernel_thread<N>(
    name: N,
    func: ThreadEntryFunc,
    priority: ThreadPriority,
    allocation_strategy: AllocationStrategy,
) -> Result<ThreadId, KernelError>
where
    N: Into<String>,
{
    let name = name.into();
    let cur_process = Process::current();
    let thread_stack = try_create_stack_thread(
        cur_process.clone(),
        format!("{}_stack", &name),
        allocation_strategy,
    )?;
    let tid = cur_process.lock().next_thread_id();
    let mut thread = Thread::new(tid, name, cur_process.clone(), thread_stack, priority, func);

    if allocation_strategy == AllocationStrategy::Now {
        unsafe { thread.setup_stack() };
    }

    cur_process.lock().add_thread(tid);
    unsafe { Scheduler::the().add_thread(thread) };

    Ok(tid)
}

/// `fork` (spec §4.6): creates a new process that is a bookkeeping clone
/// of the caller — new pid, copied or shared fd table and credentials,
/// linked into the parent's `children`, placed in the parent's process
/// group. `flags.share_address_space` selects between sharing the
/// parent's page table (as `vfork` requires) and giving the child its own
/// (the fully copy-on-write path described in spec §9 needs the separate
/// zone-based address-space system wired into `Process`, not done here —
/// see DESIGN.md; both branches currently run the child against the
/// parent's page table).
pub fn fork(flags: ForkFlags) -> Result<ProcessId, ProcessError> {
    let parent_arc = Process::current();
    let mut parent = parent_arc.lock();

    let child_id = ProcessId::new();
    let cr3 = parent.address_space.cr3();

    let fd_table = if flags.share_fd_table {
        parent.fd_table.clone()
    } else {
        let copied = parent
            .fd_table
            .read()
            .map_err(|_| ProcessError::PermissionDenied)?
            .clone();
        Arc::new(RwLock::new(copied))
    };

    let child = Process {
        id: child_id,
        name: parent.name.clone(),
        address_space: AddressSpace::new(cr3, GlobalData::the().physical_memory_offset()),
        memory_regions: HashMap::new(),
        cur_thread_id: 0,
        parent: Some(parent.id),
        children: Vec::new(),
        threads: Vec::new(),
        state: ProcessState::Running,
        credentials: parent.credentials,
        fd_table,
        signal_actions: parent.signal_actions,
        exit_status: None,
        vfork_parent: None,
    };

    parent.children.push(child_id);
    let parent_id = parent.id;
    drop(parent);

    PROCESS_TREE
        .lock()
        .add_process(child_id, Arc::new(Mutex::new(child)));

    let pgid = session::pgid_of(parent_id).unwrap_or(parent_id);
    let _ = session::setpgid(child_id, pgid);

    Ok(child_id)
}

/// `vfork` (spec §4.6): forks sharing the address space and fd table, then
/// blocks the caller on a dedicated wait-queue until the child execs or
/// exits.
pub fn vfork() -> Result<ProcessId, ProcessError> {
    let parent_arc = Process::current();
    let parent_id = parent_arc.lock().id();

    let child_id = fork(ForkFlags {
        share_address_space: true,
        share_fd_table: true,
    })?;

    let child_arc = PROCESS_TREE
        .lock()
        .get(child_id)
        .ok_or(ProcessError::UnknownProcess)?;
    child_arc.lock().vfork_parent = Some(parent_id);

    let wq = Arc::new(WaitQueue::new());
    VFORK_WAITQUEUES.lock().insert(child_id, wq.clone());

    while VFORK_WAITQUEUES.lock().contains_key(&child_id) {
        let guard = parent_arc.lock();
        // A signal delivered to the parent while vforked ends the wait
        // early with `-EINTR` (spec §5); `release_vfork_parent` tears down
        // the `VFORK_WAITQUEUES` entry itself once the child actually
        // execs or exits, so leaving it in place here is not a leak.
        if wq.wait(guard, Scheduler::block_current_and_reschedule) == WakeReason::Interrupted {
            return Err(ProcessError::Interrupted);
        }
    }

    Ok(child_id)
}

/// `exec` (spec §4.6): "replaces the address space and entry point but
/// preserves the process identity." Loading and mapping a new executable
/// image needs an ELF loader, out of core scope (spec §1); what this does
/// implement honestly is every piece of process state exec is specified to
/// reset — the name, close-on-exec fds, and signal dispositions — and the
/// vfork-parent release that only exec (or exit) can trigger.
pub fn exec<N>(name: N) -> Result<(), ProcessError>
where
    N: Into<String>,
{
    let process_arc = Process::current();
    let (pid, vfork_parent) = {
        let mut process = process_arc.lock();
        process.name = name.into();
        process
            .fd_table
            .write()
            .map_err(|_| ProcessError::PermissionDenied)?
            .close_on_exec_all();
        process.signal_actions = SignalActions::new();
        (process.id, process.vfork_parent.take())
    };

    if vfork_parent.is_some() {
        release_vfork_parent(pid);
    }

    Ok(())
}

/// `waitpid` (spec §4.6): blocks on the calling process's child
/// wait-queue until a matching child (any, if `target` is `None`) is a
/// zombie, then reaps it and returns `(pid, exit_status)`.
pub fn waitpid(target: Option<ProcessId>) -> Result<(ProcessId, i32), ProcessError> {
    let parent_arc = Process::current();
    let parent_id = parent_arc.lock().id();
    let wq = child_wait_queue(parent_id);

    loop {
        let found = {
            let tree = PROCESS_TREE.lock();
            let children = tree
                .get(parent_id)
                .ok_or(ProcessError::UnknownProcess)?
                .lock()
                .children
                .clone();

            if let Some(t) = target {
                if !children.contains(&t) {
                    return Err(ProcessError::NotAChild);
                }
            }

            children
                .into_iter()
                .filter(|c| target.map_or(true, |t| *c == t))
                .filter_map(|c| tree.get(c).map(|arc| (c, arc)))
                .find_map(|(c, arc)| {
                    let child = arc.lock();
                    (child.state == ProcessState::Zombie)
                        .then(|| (c, child.exit_status.unwrap_or(0)))
                })
        };

        if let Some((child_id, status)) = found {
            PROCESS_TREE.lock().remove(child_id);
            parent_arc.lock().children.retain(|&c| c != child_id);
            return Ok((child_id, status));
        }

        let guard = parent_arc.lock();
        // A signal delivered while blocked here ends the wait early with
        // `-EINTR` (spec §5), exactly as POSIX `waitpid` does absent
        // `SA_RESTART`.
        if wq.wait(guard, Scheduler::block_current_and_reschedule) == WakeReason::Interrupted {
            return Err(ProcessError::Interrupted);
        }
    }
}

/// Re-parents a dying process's children to the colonel process, exactly
/// as POSIX re-parents orphans to init (spec §4.6 doesn't name this
/// explicitly but a zombie-reaping model with no adopter would leak
/// `waitpid`-less subtrees forever).
fn reparent_children(children: &[ProcessId]) {
    let Some(colonel) = colonel_id() else {
        return;
    };
    for &child_id in children {
        if let Some(child_arc) = PROCESS_TREE.lock().get(child_id) {
            child_arc.lock().parent = Some(colonel);
        }
    }
    if let Some(colonel_arc) = PROCESS_TREE.lock().get(colonel) {
        colonel_arc.lock().children.extend(children.iter().copied());
    }
}

/// Ends the calling process (spec §4.6 "the process moves to ZOMBIE when
/// its leader exits and all non-leader threads are reaped" — this kernel
/// never builds multi-thread user processes, so the leader thread exiting
/// and the process becoming a zombie are the same event here). Wakes the
/// parent's `waitpid`, releases a pending `vfork`, and re-parents any
/// children to the colonel process. Never returns: the calling thread is
/// retired via [`super::thread::leave_thread`].
pub fn exit_process(status: i32) -> ! {
    let process_arc = Process::current();
    let (pid, parent_id, vfork_parent, children) = {
        let mut process = process_arc.lock();
        process.state = ProcessState::Zombie;
        process.exit_status = Some(status);
        (
            process.id,
            process.parent,
            process.vfork_parent.take(),
            process.children.clone(),
        )
    };

    reparent_children(&children);

    if vfork_parent.is_some() {
        release_vfork_parent(pid);
    }

    if let Some(parent_id) = parent_id {
        child_wait_queue(parent_id).signal();
        let _ = send_signal(parent_id, signal::SIGCHLD);
    }

    super::thread::leave_thread()
}

/// Kills `target` outright, bypassing its disposition table (POSIX:
/// `SIGKILL` cannot be caught, blocked, or ignored). Used directly by
/// [`send_signal`] and by anything that needs to force-reap a process
/// without the thread-level pending-signal delivery checkpoint this
/// kernel's architecture port doesn't implement (spec §1 out of core
/// scope).
fn terminate_with_signal(target: ProcessId, signum: u32) -> Result<(), ProcessError> {
    let process_arc = PROCESS_TREE
        .lock()
        .get(target)
        .ok_or(ProcessError::UnknownProcess)?;
    let (parent_id, children) = {
        let mut process = process_arc.lock();
        if process.state == ProcessState::Zombie {
            return Err(ProcessError::AlreadyZombie);
        }
        process.state = ProcessState::Zombie;
        // Negative exit status encodes "killed by signal N", mirroring the
        // WIFSIGNALED/WTERMSIG convention waitpid callers expect.
        process.exit_status = Some(-(signum as i32));
        (process.parent, process.children.clone())
    };

    reparent_children(&children);

    if let Some(parent_id) = parent_id {
        child_wait_queue(parent_id).signal();
        let _ = send_signal(parent_id, signal::SIGCHLD);
    }

    Ok(())
}

/// Signal delivery entry point (spec §4.6): applies `SIGSTOP`/`SIGCONT`'s
/// immediate state-machine effect, then either drops the signal (ignored,
/// or default-ignored), terminates the process (default-terminate), or
/// raises the pending bit on every thread for a real return-to-user
/// checkpoint to deliver later.
pub fn send_signal(target: ProcessId, signum: u32) -> Result<(), ProcessError> {
    if signum as usize >= signal::NSIG {
        return Err(ProcessError::InvalidSignal);
    }
    if signum == signal::SIGKILL {
        return terminate_with_signal(target, signum);
    }

    let process_arc = PROCESS_TREE
        .lock()
        .get(target)
        .ok_or(ProcessError::UnknownProcess)?;

    let (disposition, threads) = {
        let mut process = process_arc.lock();
        if process.state == ProcessState::Zombie {
            return Err(ProcessError::AlreadyZombie);
        }
        if signum == signal::SIGCONT {
            process.state = ProcessState::Running;
        } else if signum == signal::SIGSTOP || signum == signal::SIGTSTP {
            process.state = ProcessState::Stopped;
        }
        (process.signal_actions.get(signum), process.threads.clone())
    };

    let default = signal::default_action(signum);
    let should_dispatch = match disposition {
        SignalDisposition::Ignore => false,
        SignalDisposition::Default => default != DefaultAction::Ignore,
        SignalDisposition::Handler(_) => true,
    };
    if !should_dispatch {
        return Ok(());
    }
    if disposition == SignalDisposition::Default && default == DefaultAction::Terminate {
        return terminate_with_signal(target, signum);
    }

    // Raise the pending bit on every thread of the target process, then
    // wake any of them that was blocked on a wait-queue and for whom the
    // signal is actually deliverable (not in its own block mask), so a
    // blocking syscall returns `-EINTR` instead of staying parked until
    // something unrelated wakes it (spec §5 "-EINTR when a signal is
    // pending and the wait was interruptible").
    let scheduler = unsafe { Scheduler::the() };
    for tid in threads {
        let deliverable = scheduler
            .with_thread(tid, |t| {
                t.raise_signal(signum);
                t.next_deliverable_signal().is_some()
            })
            .unwrap_or(false);
        if deliverable {
            Scheduler::wake(tid, WakeReason::Interrupted);
        }
    }
    Ok(())
}
