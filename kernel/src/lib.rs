#![no_std]
#![no_main]
#![feature(naked_functions)]
#![feature(const_mut_refs)]
use api::BootInfo;
extern crate alloc;
use core::sync::atomic::{AtomicUsize, Ordering};
use x86_64::{
    memory::{Address, MemoryRegion, PhysicalMemoryRegion},
    paging::{
        bump_frame_allocator::BumpFrameAllocator,
        linked_list_frame_allocator::LinkedListFrameAllocator,
        offset_page_table::{OffsetPageTable, PhysicalOffset},
    },
};

pub mod allocator;
pub mod dev;
pub mod error;
pub mod fs;
pub mod housekeeping_threads;
pub mod interrupts;
pub mod memory;
pub mod multitasking;
pub mod net;
pub mod paging;
pub mod printf;
pub mod qemu;
pub mod serial;
pub mod slab;
pub mod sync;
pub mod syscall;
pub mod time;
pub mod vga;

use allocator::init_heap;
use memory::{manager::MemoryManager, pool::PagePools};

/// Boot-time facts every subsystem needs a handle to but which don't
/// belong to any one of them — chiefly the physical memory offset the
/// bootloader chose for the direct physical map (`process::Process::new`'s
/// `AddressSpace::new` needs it to translate a raw `cr3` into a usable
/// page table pointer). Populated once, early in [`kernel_init`], before
/// any process or address space is constructed.
pub struct GlobalData {
    physical_memory_offset: AtomicUsize,
}

static GLOBAL_DATA: GlobalData = GlobalData {
    physical_memory_offset: AtomicUsize::new(0),
};

impl GlobalData {
    pub fn the() -> &'static GlobalData {
        &GLOBAL_DATA
    }

    pub fn physical_memory_offset(&self) -> usize {
        self.physical_memory_offset.load(Ordering::Relaxed)
    }

    fn set_physical_memory_offset(&self, offset: usize) {
        self.physical_memory_offset.store(offset, Ordering::Relaxed);
    }
}

pub fn kernel_init(
    boot_info: &'static BootInfo,
) -> Result<(LinkedListFrameAllocator, OffsetPageTable<PhysicalOffset>), ()> {
    println!("Initializing kernel");
    interrupts::init();

    GlobalData::the().set_physical_memory_offset(boot_info.physical_memory_offset);

    let pml4t = unsafe { paging::init(boot_info) };

    let pt_offset = PhysicalOffset::new(boot_info.physical_memory_offset);
    let mut page_table = OffsetPageTable::new(pml4t, pt_offset);

    let mut frame_allocator = LinkedListFrameAllocator::new(
        boot_info.memory_regions.iter().copied(),
        boot_info.physical_memory_offset,
    );

    init_heap(&mut page_table, &mut frame_allocator);

    MemoryManager::the()
        .lock()
        .init(boot_info)
        .map_err(|_| ())?;

    let mut pools = PagePools::new();
    pools.discover(
        boot_info
            .memory_regions
            .iter()
            .map(|region| (region.start(), region.length(), region.is_usable())),
    );
    memory::pool::install_global_pools(pools);

    time::init();

    Ok((frame_allocator, page_table))
}
