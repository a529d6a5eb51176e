use crate::{BusAddr, DmaError};
use bitflags::bitflags;
use core::{fmt::Debug, ops::Range, ptr::NonNull};

bitflags! {
    /// Flags of a buffer allocation request.
    pub struct AllocFlags: u32 {
        /// Fail instead of waiting for the allocator.
        const NOWAIT    = 0x01;
        /// Memory must be coherent between CPU and device.
        const COHERENT  = 0x04;
        /// Zero the buffer before handing it out.
        const ZERO      = 0x08;
    }
}

impl AllocFlags {
    /// Allow waiting for the allocator lock. Memory itself is never waited for.
    pub const WAITOK: AllocFlags = AllocFlags::empty();
}

/// A contiguous allocation request derived from a tag's effective constraints.
#[derive(Debug, Clone, Copy)]
pub struct AllocRequest {
    pub size: usize,
    /// Power of two, at least 1.
    pub alignment: usize,
    /// Power of two or 0 for none.
    pub boundary: usize,
    /// Addresses in `(lowaddr, highaddr]` are excluded.
    pub lowaddr: BusAddr,
    pub highaddr: BusAddr,
    pub flags: AllocFlags,
}

impl AllocRequest {
    /// Whether a region of `size` bytes at `bus_addr` satisfies the request.
    pub fn admits(&self, bus_addr: BusAddr, size: usize) -> bool {
        let Some(last) = bus_addr.checked_add(size.max(1) as BusAddr - 1) else {
            return false;
        };
        if bus_addr % self.alignment.max(1) as BusAddr != 0 {
            return false;
        }
        if self.boundary != 0 {
            let boundary = self.boundary as BusAddr;
            if bus_addr / boundary != last / boundary {
                return false;
            }
        }
        last <= self.lowaddr || bus_addr > self.highaddr
    }
}

/// A contiguous region handed out by a [DmaPlatform].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaRegion {
    /// Device-visible address.
    pub bus_addr: BusAddr,
    /// CPU mapping of the same memory.
    pub vaddr: NonNull<u8>,
    pub size: usize,
    /// Opaque bookkeeping the platform needs to free the region.
    pub cookie: usize,
}

/// The host's DMA subsystem.
pub trait DmaPlatform: Send + Sync + Debug {
    /// Bus address window backed by DMA-capable memory, or [None] when there is no DMA-capable bus.
    fn window(&self) -> Option<Range<BusAddr>>;

    /// Whether the memory is coherent without explicit cache maintenance.
    fn is_coherent(&self) -> bool;

    /// Allocate one contiguous region. Must not wait for memory to become available.
    fn alloc_contiguous(&self, req: &AllocRequest) -> Result<DmaRegion, DmaError>;

    /// Return a region to the platform.
    ///
    /// # Safety
    /// `region` must come from [DmaPlatform::alloc_contiguous] of this platform and must not be
    /// freed twice or accessed afterwards.
    unsafe fn free_contiguous(&self, region: DmaRegion);
}
