//! Zones: sub-regions of an [`super::space::AddressSpace`] with backing,
//! protection and lazy-fault semantics (spec §3, §4.3). Generalizes the
//! teacher's eager-only `MemoryBackedVirtualMemoryObject`
//! (`super::virtual_memory_object`) into a per-zone `fault(offset)`
//! callback that can be anonymous, file-backed or copy-on-write.

extern crate alloc;

use alloc::sync::Arc;
use bitflags::bitflags;
use util::mutex::Mutex;

use super::{pool::PagePools, MemoryError};

bitflags! {
    /// R/W/X plus cacheability, independent of any architecture's page
    /// table entry encoding (spec §3 "protection bits (R/W/X plus
    /// cacheability)").
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u8 {
        const READ = 0b0001;
        const WRITE = 0b0010;
        const EXEC = 0b0100;
        const CACHEABLE = 0b1000;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ZoneVisibility {
    Private,
    Shared,
}

/// What backs a zone's pages (spec §3 "file/offset backing (or
/// anonymous)").
pub enum Backing {
    Anonymous,
    /// `object` is an opaque handle into the VFS/page-cache layer; the
    /// core only needs to know "ask this thing for page N at this
    /// offset", so it is modeled as a trait object rather than a concrete
    /// file type (kept decoupled from `fs::node::Node` to avoid a
    /// memory<->fs circular dependency).
    File {
        object: Arc<dyn FileBackedPages>,
        offset: u64,
    },
}

pub trait FileBackedPages: Send + Sync {
    /// Returns the physical frame backing `page_offset` (in pages) from
    /// the start of the mapping, faulting it in from the filesystem if
    /// necessary.
    fn fault_page(&self, page_offset: u64) -> Result<u64, MemoryError>;
}

/// A mapped sub-region of an address space (spec §3, §4.3). Created by
/// `vm_alloc`-equivalent calls on [`super::space::AddressSpace`];
/// destroyed by `vm_free`, which releases pages it uniquely owns.
pub struct Zone {
    addr: u64,
    size: u64,
    protection: Protection,
    visibility: ZoneVisibility,
    backing: Backing,
    /// Anonymous-private and anonymous-shared zones track their own
    /// resident frames here so `vm_free` can release exactly the pages
    /// this zone uniquely owns (spec §3 zone lifecycle).
    resident: Mutex<alloc::collections::BTreeMap<u64, ResidentPage>>,
}

struct ResidentPage {
    pool_idx: usize,
    page_idx: usize,
    /// Set once a write fault has copied this anonymous-COW page into a
    /// private frame, so a second write fault doesn't copy again.
    writable: bool,
}

/// What a fault resolved to: a pool-tracked frame the zone owns a
/// refcount on, or an external frame (file-backed, device) the zone only
/// remembers the physical address of.
#[derive(Clone, Copy)]
pub enum FaultResolution {
    Pool { pool_idx: usize, page_idx: usize },
    External { phys_addr: u64 },
}

impl Zone {
    pub fn new_anonymous(addr: u64, size: u64, protection: Protection, visibility: ZoneVisibility) -> Self {
        Self {
            addr,
            size,
            protection,
            visibility,
            backing: Backing::Anonymous,
            resident: Mutex::new(alloc::collections::BTreeMap::new()),
        }
    }

    pub fn new_file_backed(
        addr: u64,
        size: u64,
        protection: Protection,
        visibility: ZoneVisibility,
        object: Arc<dyn FileBackedPages>,
        offset: u64,
    ) -> Self {
        Self {
            addr,
            size,
            protection,
            visibility,
            backing: Backing::File { object, offset },
            resident: Mutex::new(alloc::collections::BTreeMap::new()),
        }
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn end(&self) -> u64 {
        self.addr + self.size
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.addr && addr < self.end()
    }

    pub fn overlaps(&self, addr: u64, size: u64) -> bool {
        addr < self.end() && addr + size > self.addr
    }

    /// Resolves the fault at `addr` (already known to lie within this
    /// zone) against `required` protection, returning the physical page to
    /// install.
    ///
    /// For anonymous zones a fresh pool page is allocated on first touch.
    /// For file-backed zones the backing object supplies the frame. A
    /// write fault against a page marked read-only for COW reasons forks
    /// a private copy (spec §4.3 "the write fault triggers a copy into a
    /// fresh anonymous page").
    pub fn fault(
        &self,
        pools: &PagePools,
        addr: u64,
        required: Protection,
    ) -> Result<FaultResolution, MemoryError> {
        if required.contains(Protection::WRITE) && !self.protection.contains(Protection::WRITE) {
            return Err(MemoryError::ProtectionViolation);
        }
        if required.contains(Protection::EXEC) && !self.protection.contains(Protection::EXEC) {
            return Err(MemoryError::ProtectionViolation);
        }

        let page_off = (addr - self.addr) / 4096;
        let mut resident = self.resident.lock();

        if let Some(page) = resident.get_mut(&page_off) {
            if page.pool_idx == usize::MAX {
                // External (file-backed) frames are never copied on write;
                // the backing object owns COW semantics for its own pages.
                return Ok(FaultResolution::External {
                    phys_addr: page.page_idx as u64,
                });
            }
            if required.contains(Protection::WRITE) && !page.writable {
                // COW: allocate a fresh frame, copy, and drop our
                // reference to the shared original.
                let (pool_idx, page_idx) = pools.alloc_one()?;
                pools.free(page.pool_idx, page.page_idx).ok();
                page.pool_idx = pool_idx;
                page.page_idx = page_idx;
                page.writable = true;
            }
            return Ok(FaultResolution::Pool {
                pool_idx: page.pool_idx,
                page_idx: page.page_idx,
            });
        }

        let (resolution, pool_idx, page_idx) = match &self.backing {
            Backing::Anonymous => {
                let (pool_idx, page_idx) = pools.alloc_one()?;
                (
                    FaultResolution::Pool { pool_idx, page_idx },
                    pool_idx,
                    page_idx,
                )
            }
            Backing::File { object, offset } => {
                let phys_addr = object.fault_page(offset / 4096 + page_off)?;
                // Not pool-backed: tracked under the sentinel pool index so
                // `release` knows to leave it alone, with the physical
                // address packed into `page_idx`.
                (
                    FaultResolution::External { phys_addr },
                    usize::MAX,
                    phys_addr as usize,
                )
            }
        };

        resident.insert(
            page_off,
            ResidentPage {
                pool_idx,
                page_idx,
                writable: matches!(self.visibility, ZoneVisibility::Shared)
                    || required.contains(Protection::WRITE),
            },
        );
        Ok(resolution)
    }

    /// Releases every pool-backed page this zone uniquely owns. Called
    /// from `vm_free`. Device/firmware pages (not pool-backed, spec §9 COW
    /// note) are never tracked here so they are left untouched.
    pub fn release(&self, pools: &PagePools) {
        let mut resident = self.resident.lock();
        for (_, page) in resident.iter() {
            if page.pool_idx != usize::MAX {
                let _ = pools.free(page.pool_idx, page.page_idx);
            }
        }
        resident.clear();
    }
}
