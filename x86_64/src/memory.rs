use bit_field::BitField;
use core::clone::Clone;
use core::fmt::{Formatter, LowerHex, Result};
use core::marker::PhantomData;
use core::ops::{Add, AddAssign, Rem, Sub};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub size: u64,
}

impl Region {
    pub fn new(start: u64, len: u64) -> Region {
        Region { start, size: len }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn end(&self) -> u64 {
        self.start + self.size
    }

    pub fn set_start(&mut self, start: u64) {
        self.start = start;
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }
}

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

pub trait PageSize {
    const SIZE: u64;

    fn is_aligned(addr: usize) -> bool {
        addr as u64 % Self::SIZE == 0
    }
}

#[derive(Clone, Copy)]
pub enum Size4KiB {}

impl PageSize for Size4KiB {
    const SIZE: u64 = 0x1000;
}

#[derive(Clone, Copy)]
pub enum Size2MiB {}

impl PageSize for Size2MiB {
    const SIZE: u64 = 2 * MIB;
}

pub trait Address {
    fn as_u64(&self) -> u64;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub fn new(address: u64) -> Self {
        Self(address)
    }

    pub fn align_down(&self, align: u64) -> PhysicalAddress {
        let addr = self.0 & !(align - 1);
        PhysicalAddress(addr)
    }

    pub fn align_up(&self, align: u64) -> PhysicalAddress {
        let addr = (self.0 + align - 1) & !(align - 1);
        PhysicalAddress(addr)
    }

    pub fn as_mut_ptr<T>(&self) -> *mut T {
        self.as_u64() as *mut T
    }

    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl Address for PhysicalAddress {
    fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl LowerHex for PhysicalAddress {
    fn fmt(&self, f: &mut Formatter) -> Result {
        LowerHex::fmt(&self.0, f)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    pub fn new(address: u64) -> Self {
        Self(address)
    }

    pub fn from_raw_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as u64)
    }

    pub fn align_down(&self, align: u64) -> VirtualAddress {
        let addr = self.0 & (align - 1);
        VirtualAddress(addr)
    }

    pub fn align_up(&self, align: u64) -> VirtualAddress {
        let addr = (self.0 + align - 1) & !(align - 1);
        VirtualAddress(addr)
    }

    pub fn as_mut_ptr<T>(&self) -> *mut T {
        self.as_u64() as *mut T
    }

    pub fn as_ptr<T>(&self) -> *const T {
        self.as_u64() as *const T
    }

    /// `as_mut_ptr` specialized to the width thread stacks are built from;
    /// kept distinct from the generic form since stack code never wants to
    /// name the pointee type at the call site.
    pub fn inner_as_mut_ptr(&self) -> *mut u64 {
        self.as_mut_ptr::<u64>()
    }

    pub fn l4_index(&self) -> usize {
        self.0.get_bits(39..=47) as usize
    }

    pub fn l3_index(&self) -> usize {
        self.0.get_bits(30..=38) as usize
    }

    pub fn l2_index(&self) -> usize {
        self.0.get_bits(21..=29) as usize
    }

    pub fn l1_index(&self) -> usize {
        self.0.get_bits(12..=20) as usize
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Add<usize> for VirtualAddress {
    type Output = Self;
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs as u64)
    }
}

impl Sub<u64> for VirtualAddress {
    type Output = Self;
    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl Sub<usize> for VirtualAddress {
    type Output = Self;
    fn sub(self, rhs: usize) -> Self::Output {
        Self(self.0 - rhs as u64)
    }
}

impl AddAssign<u64> for VirtualAddress {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl LowerHex for VirtualAddress {
    fn fmt(&self, f: &mut Formatter) -> Result {
        LowerHex::fmt(&self.0, f)
    }
}

impl Address for VirtualAddress {
    fn as_u64(&self) -> u64 {
        self.0
    }
}

pub const PAGE_SIZE: usize = 0x1000;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PhysicalFrame<S: PageSize = Size4KiB> {
    pub address: PhysicalAddress,
    pub size: PhantomData<S>,
}

impl<S: PageSize> PhysicalFrame<S> {
    pub fn at_address(address: PhysicalAddress) -> Self {
        Self {
            address: address.align_down(S::SIZE),
            size: PhantomData,
        }
    }

    /// Same as [`Self::at_address`]; kept as a separate name because most
    /// call sites are rounding an arbitrary physical address down to its
    /// containing frame rather than constructing one from an address that
    /// is already known to be frame-aligned.
    pub fn containing_address(address: PhysicalAddress) -> Self {
        Self::at_address(address)
    }

    pub fn start(&self) -> u64 {
        self.address.as_u64()
    }
}

impl<S: PageSize> Add<u64> for PhysicalFrame<S> {
    type Output = Self;
    fn add(self, rhs: u64) -> Self::Output {
        Self {
            address: self.address + S::SIZE * rhs,
            size: PhantomData,
        }
    }
}

impl<S: PageSize> AddAssign<u64> for PhysicalFrame<S> {
    fn add_assign(&mut self, rhs: u64) {
        self.address += S::SIZE * rhs;
    }
}

#[derive(Debug)]
pub struct Page<S: PageSize = Size4KiB> {
    pub address: VirtualAddress,
    pub size: PhantomData<S>,
}

impl<S: PageSize> Clone for Page<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: PageSize> Copy for Page<S> {}

impl<S: PageSize> Default for Page<S> {
    fn default() -> Self {
        Self {
            address: VirtualAddress::default(),
            size: PhantomData,
        }
    }
}

impl<S: PageSize> PartialEq for Page<S> {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl<S: PageSize> Eq for Page<S> {}

impl<S: PageSize> Page<S> {
    pub fn at_address(address: VirtualAddress) -> Self {
        Self {
            address: address.align_down(S::SIZE),
            size: PhantomData,
        }
    }

    pub fn containing_address(address: VirtualAddress) -> Self {
        Self::at_address(address)
    }

    pub fn address(&self) -> VirtualAddress {
        self.address
    }

    pub fn start_address(&self) -> VirtualAddress {
        self.address
    }

    pub fn end_address(&self) -> VirtualAddress {
        self.address + S::SIZE
    }

    /// Size of a single page of this kind, in bytes.
    pub fn size(&self) -> usize {
        S::SIZE as usize
    }

    pub fn range_inclusive(start: Self, end: Self) -> PageRangeInclusive<S> {
        PageRangeInclusive {
            start_page: start,
            end_page: end,
        }
    }
}

impl<S: PageSize> Add<u64> for Page<S> {
    type Output = Self;
    fn add(self, rhs: u64) -> Self::Output {
        Self {
            address: self.address + S::SIZE * rhs,
            size: PhantomData,
        }
    }
}

impl<S: PageSize> AddAssign<u64> for Page<S> {
    fn add_assign(&mut self, rhs: u64) {
        self.address += S::SIZE * rhs;
    }
}

pub trait MemoryRegion {
    fn start(&self) -> u64;
    fn end(&self) -> u64;
    fn length(&self) -> u64;
    fn contains(&self, start: u64) -> bool;
    /// Whether a frame allocator may hand out frames from this region.
    /// Always usable unless a region type says otherwise (overridden by
    /// [`PhysicalMemoryRegion`], which tags reserved/ACPI/bad ranges).
    fn is_usable(&self) -> bool {
        true
    }
    /// Shrinks the region in place to begin at `start` (used when a bump
    /// allocator resumes inside a region instead of at its natural start).
    fn set_start(&mut self, start: u64);
}

/// A dimensionless byte count rounded up to the next page boundary (spec
/// §4.1). Every allocation that goes through the pool/zone layer is sized
/// in these rather than raw bytes so a stray unaligned size can never reach
/// the page tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageAlignedSize(usize);

impl PageAlignedSize {
    pub const fn new(bytes: usize) -> Self {
        Self((bytes + PAGE_SIZE - 1) & !(PAGE_SIZE - 1))
    }

    pub fn in_bytes(&self) -> usize {
        self.0
    }

    pub fn in_pages(&self) -> usize {
        self.0 / PAGE_SIZE
    }
}

impl Add<u64> for PageAlignedSize {
    type Output = Self;
    fn add(self, rhs: u64) -> Self::Output {
        Self::new(self.0 + rhs as usize)
    }
}

/// An inclusive range of pages, e.g. `[start_page, end_page]` (spec §4.2
/// named kernel regions: heap, per-thread stacks, the ELF image). Converts
/// to/from [`Region`] so it can be handed straight to
/// [`util::range_allocator::RangeAllocator`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PageRangeInclusive<S: PageSize = Size4KiB> {
    pub start_page: Page<S>,
    pub end_page: Page<S>,
}

impl<S: PageSize> PageRangeInclusive<S> {
    pub fn new(start_page: Page<S>, end_page: Page<S>) -> Self {
        Self {
            start_page,
            end_page,
        }
    }

    pub fn len(&self) -> usize {
        ((self.end_page.address.as_u64() - self.start_page.address.as_u64()) / S::SIZE) as usize
            + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn size(&self) -> usize {
        self.len() * S::SIZE as usize
    }

    pub fn contains_address(&self, addr: VirtualAddress) -> bool {
        addr >= self.start_page.start_address() && addr < self.end_page.end_address()
    }

    pub fn iter(&self) -> PageRangeInclusiveIter<S> {
        PageRangeInclusiveIter {
            current: Some(self.start_page),
            end: self.end_page,
        }
    }
}

impl<S: PageSize> IntoIterator for PageRangeInclusive<S> {
    type Item = Page<S>;
    type IntoIter = PageRangeInclusiveIter<S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<S: PageSize> From<PageRangeInclusive<S>> for Region {
    fn from(range: PageRangeInclusive<S>) -> Self {
        Region::new(range.start_page.address.as_u64(), range.size() as u64)
    }
}

pub struct PageRangeInclusiveIter<S: PageSize> {
    current: Option<Page<S>>,
    end: Page<S>,
}

impl<S: PageSize> Iterator for PageRangeInclusiveIter<S> {
    type Item = Page<S>;

    fn next(&mut self) -> Option<Page<S>> {
        let current = self.current?;
        self.current = if current.address == self.end.address {
            None
        } else {
            Some(current + 1)
        };
        Some(current)
    }
}

impl<S: PageSize> From<PageRangeInclusiveIter<S>> for PageRangeInclusive<S> {
    /// Reconstructs the still-remaining range from a partially-consumed
    /// iterator, used by `StackAllocator` to shrink its free range in place
    /// as it carves stacks off the front.
    fn from(iter: PageRangeInclusiveIter<S>) -> Self {
        let start = iter.current.unwrap_or(iter.end);
        PageRangeInclusive {
            start_page: start,
            end_page: iter.end,
        }
    }
}

/// A raw `[start, end)` virtual-address range that does not carry any page
/// granularity, used for thread stacks (spec §3) where only the extremes
/// (the stack-pointer reset value, the guard boundary) matter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VirtualRange {
    pub start: VirtualAddress,
    pub end: VirtualAddress,
}

impl VirtualRange {
    pub fn new(start: VirtualAddress, end: VirtualAddress) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> VirtualAddress {
        self.start
    }

    /// The highest address in the range; for a downward-growing stack this
    /// is the initial stack pointer.
    pub fn top(&self) -> VirtualAddress {
        self.end
    }

    pub fn size(&self) -> usize {
        (self.end.as_u64() - self.start.as_u64()) as usize
    }
}

impl MemoryRegion for VirtualRange {
    fn start(&self) -> u64 {
        self.start.as_u64()
    }
    fn end(&self) -> u64 {
        self.end.as_u64()
    }
    fn length(&self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }
    fn contains(&self, addr: u64) -> bool {
        addr >= self.start.as_u64() && addr < self.end.as_u64()
    }
    fn set_start(&mut self, start: u64) {
        self.start = VirtualAddress::new(start);
    }
}

/// Mirrors [`PageRangeInclusive`]'s page-indexed pair across the boot
/// protocol boundary (`repr(C)`, passed from the bootloader to the kernel
/// in [`crate::PhysicalAddress`]-offset form in `api::BootInfo`).
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct VirtualMemoryRegion {
    pub start_page: Page<Size4KiB>,
    pub end_page: Page<Size4KiB>,
}

impl VirtualMemoryRegion {
    pub fn new(start_page: Page<Size4KiB>, end_page: Page<Size4KiB>) -> Self {
        Self {
            start_page,
            end_page,
        }
    }
}

impl From<VirtualMemoryRegion> for PageRangeInclusive<Size4KiB> {
    fn from(region: VirtualMemoryRegion) -> Self {
        PageRangeInclusive::new(region.start_page, region.end_page)
    }
}

/// What kind of firmware-reported physical range this is (spec §4.1 "Pool
/// discovery" reads this straight out of the boot-supplied memory map).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub enum PhysicalMemoryRegionType {
    #[default]
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    Bootloader,
    Kernel,
    FrameBuffer,
}

/// A `[start, end)` physical range tagged with what it's for (spec §4.1).
/// `repr(C)` and `Default` because it is passed across the bootloader/
/// kernel boundary inside `api::BootInfo` before any allocator exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct PhysicalMemoryRegion {
    pub start: u64,
    pub end: u64,
    pub typ: PhysicalMemoryRegionType,
}

impl PhysicalMemoryRegion {
    pub fn new(start: u64, end: u64, typ: PhysicalMemoryRegionType) -> Self {
        Self { start, end, typ }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self.typ, PhysicalMemoryRegionType::Usable)
    }

    pub fn start_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.start)
    }

    pub fn end_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.end)
    }

    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    pub fn set_size(&mut self, size: u64) {
        self.end = self.start + size;
    }

    /// Reinterprets this physical range as the matching range in the
    /// kernel's direct physical map, e.g. to locate the ELF image (spec
    /// §4.2 "the ELF image" named kernel region) inside the virtual address
    /// space it's mapped at.
    pub fn as_page_range(&self, physical_memory_offset: u64) -> PageRangeInclusive<Size4KiB> {
        PageRangeInclusive::new(
            Page::containing_address(VirtualAddress::new(physical_memory_offset + self.start)),
            Page::containing_address(VirtualAddress::new(
                physical_memory_offset + self.end - 1,
            )),
        )
    }
}

impl MemoryRegion for PhysicalMemoryRegion {
    fn start(&self) -> u64 {
        self.start
    }
    fn end(&self) -> u64 {
        self.end
    }
    fn length(&self) -> u64 {
        self.end - self.start
    }
    fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
    fn is_usable(&self) -> bool {
        self.is_usable()
    }
    fn set_start(&mut self, start: u64) {
        self.start = start;
    }
}
