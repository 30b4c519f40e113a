//! The x86_64 implementation of the [`super::space::ArchPageTable`] HAL
//! seam (spec §6, §9 "page-table polymorphism"). Everything above this
//! file (`space`, `zone`, `manager`) only ever calls `map`/`unmap`/
//! `protect`/`translate`; a second architecture port only has to supply
//! this file.

extern crate alloc;

use super::{pool::PagePools, zone::Protection, MemoryError};
use x86_64::{
    frame_allocator::FrameAllocator,
    memory::{Address, Page, PageSize, PhysicalAddress, PhysicalFrame, Size4KiB, VirtualAddress},
    paging::{
        offset_page_table::{OffsetPageTable, PhysicalOffset},
        Mapper, PageTable, PageTableEntryFlags, Translator,
    },
};

impl Into<PageTableEntryFlags> for Protection {
    fn into(self) -> PageTableEntryFlags {
        let mut flags = PageTableEntryFlags::PRESENT;
        if self.contains(Protection::WRITE) {
            flags |= PageTableEntryFlags::WRITABLE;
        }
        if !self.contains(Protection::EXEC) {
            flags |= PageTableEntryFlags::NO_EXECUTE;
        }
        flags
    }
}

/// Adapts [`PagePools`] to the arch crate's `FrameAllocator` trait so the
/// generic page-table walker can allocate the intermediate directory
/// levels it needs on a `map` call.
struct PoolFrameAllocator<'a>(&'a PagePools);

unsafe impl<'a> FrameAllocator<Size4KiB> for PoolFrameAllocator<'a> {
    fn allocate_frame(&mut self) -> Option<PhysicalFrame<Size4KiB>> {
        let (pool_idx, page_idx) = self.0.alloc_one().ok()?;
        let addr = self.0.get_physical_address(pool_idx, page_idx)?;
        Some(PhysicalFrame::at_address(PhysicalAddress::new(addr)))
    }
}

/// One process's page-table tree (spec §3 "an architecture page-table
/// root"). The root is a single physical page (the PML4); it is reached
/// through the direct physical-memory mapping the same way
/// [`super::super::paging::init`] reaches the boot PML4, so no lifetime
/// ties the table to the `AddressSpace` that owns it.
pub struct X86PageTable {
    pml4_frame: PhysicalFrame<Size4KiB>,
    phys_offset: u64,
}

impl X86PageTable {
    pub fn new(pml4_frame: PhysicalFrame<Size4KiB>, phys_offset: u64) -> Self {
        Self {
            pml4_frame,
            phys_offset,
        }
    }

    pub fn cr3(&self) -> u64 {
        self.pml4_frame.start()
    }

    fn with_table<R>(&mut self, f: impl FnOnce(&mut OffsetPageTable<'_, PhysicalOffset>) -> R) -> R {
        let virt = self.phys_offset + self.pml4_frame.start();
        let pml4: &mut PageTable = unsafe { &mut *(virt as *mut PageTable) };
        let mut table = OffsetPageTable::new(pml4, PhysicalOffset::new(self.phys_offset));
        f(&mut table)
    }
}

unsafe impl Send for X86PageTable {}

impl super::space::ArchPageTable for X86PageTable {
    fn map(&mut self, addr: u64, phys: u64, prot: Protection) -> Result<(), MemoryError> {
        let page = Page::containing_address(VirtualAddress::new(addr));
        let frame = PhysicalFrame::<Size4KiB>::at_address(PhysicalAddress::new(phys));
        let pools = super::pool::global_pools();
        let flags: PageTableEntryFlags = prot.into();
        self.with_table(|table| {
            table
                .map_to(frame, page, flags, &mut PoolFrameAllocator(pools))
                .map(|flusher| flusher.flush())
                .map_err(|_| MemoryError::InvalidRange)
        })
    }

    fn unmap(&mut self, addr: u64) -> Result<u64, MemoryError> {
        let page = Page::<Size4KiB>::containing_address(VirtualAddress::new(addr));
        self.with_table(|table| {
            table
                .unmap(page)
                .map(|(frame, flusher)| {
                    flusher.flush();
                    frame.start()
                })
                .map_err(|_| MemoryError::InvalidRange)
        })
    }

    fn protect(&mut self, addr: u64, prot: Protection) -> Result<(), MemoryError> {
        // Re-map in place: unmap returns the existing frame, map re-installs
        // it with the new permission bits. Not atomic with respect to a
        // concurrent fault on the same address, which is why address-space
        // structural changes hold the space mutex (spec §4.3).
        let phys = self.unmap(addr)?;
        self.map(addr, phys, prot)
    }

    fn translate(&self, addr: u64) -> Option<u64> {
        let virt = self.phys_offset + self.pml4_frame.start();
        let pml4: &mut PageTable = unsafe { &mut *(virt as *mut PageTable) };
        let table = OffsetPageTable::new(pml4, PhysicalOffset::new(self.phys_offset));
        let page = Page::<Size4KiB>::containing_address(VirtualAddress::new(addr));
        Translator::<Size4KiB>::translate(&table, page)
            .ok()
            .map(|(frame, _)| frame.start())
    }
}
