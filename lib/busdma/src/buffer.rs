use crate::{BusAddr, DmaRegion, DmaTag, tag::TagInner};
use alloc::sync::Arc;
use core::{fmt::Debug, slice, sync::atomic::Ordering};

/// A contiguous DMA buffer, visible to CPU and device without cache maintenance.
///
/// The buffer is exclusively owned; consumers borrow it. Its memory goes back to the platform
/// when it is released through [DmaTag::release] or dropped.
pub struct CoherentBuffer {
    tag: Arc<TagInner>,
    region: DmaRegion,
}

// SAFETY: the region is mapped for this buffer only and all access goes through `&self` /
// `&mut self`, so moving the owner between threads is sound.
unsafe impl Send for CoherentBuffer {}

impl CoherentBuffer {
    /// # Safety
    /// `region` must have been allocated by `tag`'s platform for this buffer alone.
    pub(crate) unsafe fn new(tag: Arc<TagInner>, region: DmaRegion) -> CoherentBuffer {
        CoherentBuffer { tag, region }
    }

    /// Device-visible address of the first byte.
    pub fn bus_addr(&self) -> BusAddr {
        self.region.bus_addr
    }

    pub fn len(&self) -> usize {
        self.region.size
    }

    pub fn is_empty(&self) -> bool {
        self.region.size == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.region.vaddr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.region.vaddr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping covers `size` bytes and lives as long as the buffer.
        unsafe { slice::from_raw_parts(self.region.vaddr.as_ptr(), self.region.size) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.region.vaddr.as_ptr(), self.region.size) }
    }

    /// Whether the buffer was allocated against `tag`.
    pub fn belongs_to(&self, tag: &DmaTag) -> bool {
        Arc::ptr_eq(&self.tag, tag.state())
    }
}

impl Debug for CoherentBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!(
            "CoherentBuffer[{:#x},{:#x})",
            self.region.bus_addr,
            self.region.bus_addr + self.region.size as BusAddr
        ))
    }
}

impl Drop for CoherentBuffer {
    fn drop(&mut self) {
        // SAFETY: the region came from this platform and is freed exactly once, here.
        unsafe { self.tag.platform.free_contiguous(self.region) };
        self.tag.live_buffers.fetch_sub(1, Ordering::AcqRel);
    }
}
