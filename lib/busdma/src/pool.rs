//! Linear DMA pool
//!
//! A [DmaPlatform] over one range of memory whose bus address and CPU mapping differ by a
//! constant offset. Page frames are managed by a buddy frame allocator, whose blocks are
//! naturally aligned to their size.

use crate::{AllocFlags, AllocRequest, BusAddr, DmaError, DmaPlatform, DmaRegion, PAGE_SIZE};
use alloc::vec::Vec;
use core::{fmt::Debug, ops::Range, ptr::NonNull};
use log::trace;
use spin::{Mutex, MutexGuard};
use utils::{define_struct, num::AlignableTo};

/// Maximum order for the buddy system.
pub const MAX_ORDER: usize = 32;

define_struct!(counter,
    /// Bus page frame number.
    PageNum, usize);

impl PageNum {
    /// Frame containing `addr`.
    pub fn from_addr(addr: BusAddr) -> PageNum {
        PageNum::from((addr / PAGE_SIZE as BusAddr) as usize)
    }

    pub fn base_addr(self) -> BusAddr {
        self.0 as BusAddr * PAGE_SIZE as BusAddr
    }
}

/// Usage counters of a [LinearDmaPool].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Bytes reserved by live allocations, including buddy rounding.
    pub bytes_in_use: usize,
    pub allocations: usize,
    pub capacity: usize,
}

struct PoolState {
    frames: buddy_system_allocator::FrameAllocator<MAX_ORDER>,
    bytes_in_use: usize,
    allocations: usize,
}

pub struct LinearDmaPool {
    cpu_base: NonNull<u8>,
    bus_base: BusAddr,
    size: usize,
    coherent: bool,
    state: Mutex<PoolState>,
}

// SAFETY: the pool owns its memory range and hands out disjoint regions under `state`'s lock.
unsafe impl Send for LinearDmaPool {}
unsafe impl Sync for LinearDmaPool {}

impl Debug for LinearDmaPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!(
            "LinearDmaPool[{:#x},{:#x})",
            self.bus_base,
            self.bus_base + self.size as BusAddr
        ))
    }
}

impl LinearDmaPool {
    /// Create a pool over `size` bytes mapped at `cpu_base` and visible to devices at `bus_base`.
    ///
    /// # Safety
    /// The memory must be valid for reads and writes, owned by the pool for its whole lifetime
    /// and not accessed through other paths.
    pub unsafe fn new(
        cpu_base: NonNull<u8>,
        bus_base: BusAddr,
        size: usize,
        coherent: bool,
    ) -> Result<LinearDmaPool, DmaError> {
        let size = size.align_down(PAGE_SIZE);
        if size == 0 || !bus_base.is_aligned_to(PAGE_SIZE as BusAddr) {
            return Err(DmaError::InvalidRegion);
        }
        let bus_end = bus_base
            .checked_add(size as BusAddr)
            .ok_or(DmaError::InvalidRegion)?;
        usize::try_from(bus_end).map_err(|_| DmaError::InvalidRegion)?;

        let mut frames = buddy_system_allocator::FrameAllocator::<MAX_ORDER>::new();
        frames.add_frame(
            PageNum::from_addr(bus_base).into(),
            PageNum::from_addr(bus_end).into(),
        );
        Ok(LinearDmaPool {
            cpu_base,
            bus_base,
            size,
            coherent,
            state: Mutex::new(PoolState {
                frames,
                bytes_in_use: 0,
                allocations: 0,
            }),
        })
    }

    /// Create a pool over a static memory range.
    pub fn from_static(
        mem: &'static mut [u8],
        bus_base: BusAddr,
        coherent: bool,
    ) -> Result<LinearDmaPool, DmaError> {
        let size = mem.len();
        let cpu_base = NonNull::new(mem.as_mut_ptr()).ok_or(DmaError::InvalidRegion)?;
        // SAFETY: a `'static` exclusive borrow is never released, so the pool owns the memory.
        unsafe { LinearDmaPool::new(cpu_base, bus_base, size, coherent) }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            bytes_in_use: state.bytes_in_use,
            allocations: state.allocations,
            capacity: self.size,
        }
    }

    fn cpu_addr(&self, bus_addr: BusAddr) -> NonNull<u8> {
        let offset = (bus_addr - self.bus_base) as usize;
        // SAFETY: every frame of the allocator lies inside the pool's range.
        unsafe { NonNull::new_unchecked(self.cpu_base.as_ptr().add(offset)) }
    }

    fn lock(&self, flags: AllocFlags) -> Result<MutexGuard<'_, PoolState>, DmaError> {
        if flags.contains(AllocFlags::NOWAIT) {
            self.state.try_lock().ok_or(DmaError::WouldBlock)
        } else {
            Ok(self.state.lock())
        }
    }
}

impl DmaPlatform for LinearDmaPool {
    fn window(&self) -> Option<Range<BusAddr>> {
        Some(self.bus_base..self.bus_base + self.size as BusAddr)
    }

    fn is_coherent(&self) -> bool {
        self.coherent
    }

    fn alloc_contiguous(&self, req: &AllocRequest) -> Result<DmaRegion, DmaError> {
        let pages = req
            .size
            .checked_align_up(PAGE_SIZE)
            .ok_or(DmaError::NoMemory)?
            / PAGE_SIZE;
        let align_pages = req.alignment / PAGE_SIZE;
        let count = pages.max(align_pages).max(1).next_power_of_two();

        let mut state = self.lock(req.flags)?;
        // Blocks outside the address window are held until a fitting one turns up, then returned.
        let mut rejected = Vec::new();
        let found = loop {
            let Some(first) = state.frames.alloc(count) else {
                break None;
            };
            let bus_addr = PageNum::from(first).base_addr();
            if req.admits(bus_addr, req.size) {
                break Some(bus_addr);
            }
            rejected.push(first);
        };
        for first in rejected {
            state.frames.dealloc(first, count);
        }
        let bus_addr = found.ok_or(DmaError::NoMemory)?;

        state.bytes_in_use += count * PAGE_SIZE;
        state.allocations += 1;
        trace!("dma pool: {} page(s) at {:#x}", count, bus_addr);
        Ok(DmaRegion {
            bus_addr,
            vaddr: self.cpu_addr(bus_addr),
            size: req.size,
            cookie: count,
        })
    }

    unsafe fn free_contiguous(&self, region: DmaRegion) {
        let mut state = self.state.lock();
        state
            .frames
            .dealloc(PageNum::from_addr(region.bus_addr).into(), region.cookie);
        state.bytes_in_use -= region.cookie * PAGE_SIZE;
        state.allocations -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BUS_SPACE_MAXADDR, BUS_SPACE_MAXADDR_32BIT};

    fn pool(bus_base: BusAddr, size: usize) -> LinearDmaPool {
        let mem = Box::leak(vec![0u8; size].into_boxed_slice());
        LinearDmaPool::from_static(mem, bus_base, true).unwrap()
    }

    fn request(size: usize, alignment: usize, flags: AllocFlags) -> AllocRequest {
        AllocRequest {
            size,
            alignment,
            boundary: 0,
            lowaddr: BUS_SPACE_MAXADDR_32BIT,
            highaddr: BUS_SPACE_MAXADDR,
            flags,
        }
    }

    #[test]
    fn regions_are_naturally_aligned_and_mapped() {
        let pool = pool(0x1000_0000, 0x10_0000);
        let region = pool
            .alloc_contiguous(&request(0x2_0000, 1, AllocFlags::NOWAIT))
            .unwrap();
        assert_eq!(region.bus_addr % 0x2_0000, 0);
        assert_eq!(region.size, 0x2_0000);
        let offset = (region.bus_addr - 0x1000_0000) as usize;
        assert_eq!(region.vaddr.as_ptr() as usize - pool.cpu_base.as_ptr() as usize, offset);
        assert_eq!(pool.stats().bytes_in_use, 0x2_0000);
        unsafe { pool.free_contiguous(region) };
        assert_eq!(pool.stats().bytes_in_use, 0);
        assert_eq!(pool.stats().allocations, 0);
    }

    #[test]
    fn alignment_larger_than_size_is_honoured() {
        let pool = pool(0x1000_0000, 0x10_0000);
        let region = pool
            .alloc_contiguous(&request(PAGE_SIZE, 0x1_0000, AllocFlags::NOWAIT))
            .unwrap();
        assert_eq!(region.bus_addr % 0x1_0000, 0);
        unsafe { pool.free_contiguous(region) };
    }

    #[test]
    fn exhaustion_fails_fast() {
        let pool = pool(0x1000_0000, 0x4_0000);
        let req = request(0x2_0000, 1, AllocFlags::NOWAIT);
        let a = pool.alloc_contiguous(&req).unwrap();
        let b = pool.alloc_contiguous(&req).unwrap();
        assert_eq!(pool.alloc_contiguous(&req), Err(DmaError::NoMemory));
        unsafe {
            pool.free_contiguous(a);
            pool.free_contiguous(b);
        }
        assert!(pool.alloc_contiguous(&req).is_ok());
    }

    #[test]
    fn skips_blocks_above_the_address_window() {
        // Straddles 4 GiB: 1 MiB below, 1 MiB above.
        let pool = pool(0xfff0_0000, 0x20_0000);
        let req = request(0x2_0000, 1, AllocFlags::NOWAIT);
        let mut held = vec![];
        while let Ok(region) = pool.alloc_contiguous(&req) {
            assert!(region.bus_addr + 0x2_0000 - 1 <= BUS_SPACE_MAXADDR_32BIT);
            held.push(region);
        }
        assert_eq!(held.len(), 8);
        // Rejected blocks above the window went back to the allocator.
        assert_eq!(pool.stats().bytes_in_use, 8 * 0x2_0000);
        for region in held {
            unsafe { pool.free_contiguous(region) };
        }
        assert_eq!(pool.stats().bytes_in_use, 0);
    }

    #[test]
    fn nowait_does_not_wait_for_the_lock() {
        let pool = pool(0x1000_0000, 0x10_0000);
        let _guard = pool.state.lock();
        assert_eq!(
            pool.alloc_contiguous(&request(PAGE_SIZE, 1, AllocFlags::NOWAIT)),
            Err(DmaError::WouldBlock)
        );
    }

    #[test]
    fn rejects_unaligned_ranges() {
        let mem = Box::leak(vec![0u8; 0x2000].into_boxed_slice());
        assert_eq!(
            LinearDmaPool::from_static(mem, 0x1000_0800, true).map(|_| ()),
            Err(DmaError::InvalidRegion)
        );
        let tiny = Box::leak(vec![0u8; 100].into_boxed_slice());
        assert_eq!(
            LinearDmaPool::from_static(tiny, 0x1000_0000, true).map(|_| ()),
            Err(DmaError::InvalidRegion)
        );
    }
}
