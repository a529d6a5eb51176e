use crate::{
    AllocFlags, AllocRequest, BUS_SPACE_MAXADDR, BUS_SPACE_MAXSIZE, BUS_SPACE_UNRESTRICTED, BusAddr,
    CoherentBuffer, DmaError, DmaPlatform,
};
use alloc::sync::Arc;
use bitflags::bitflags;
use core::{
    fmt::Debug,
    ops::Range,
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};
use log::{debug, trace};

bitflags! {
    /// Flags fixed at tag creation.
    pub struct TagFlags: u32 {
        /// Every buffer of the tag must be coherent.
        const COHERENT  = 0x04;
    }
}

/// Constraints of a DMA tag.
///
/// `alignment` and `boundary` of 0 mean "none". Addresses in `(lowaddr, highaddr]` cannot be
/// reached by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaConstraints {
    pub alignment: usize,
    pub boundary: usize,
    pub lowaddr: BusAddr,
    pub highaddr: BusAddr,
    pub max_size: usize,
    pub nsegments: usize,
    pub max_segment_size: usize,
    pub flags: TagFlags,
}

impl DmaConstraints {
    /// Constraints that restrict nothing.
    pub const fn unrestricted() -> DmaConstraints {
        DmaConstraints {
            alignment: 1,
            boundary: 0,
            lowaddr: BUS_SPACE_MAXADDR,
            highaddr: BUS_SPACE_MAXADDR,
            max_size: BUS_SPACE_MAXSIZE,
            nsegments: BUS_SPACE_UNRESTRICTED,
            max_segment_size: BUS_SPACE_MAXSIZE,
            flags: TagFlags::empty(),
        }
    }

    fn validate(&self) -> Result<(), DmaError> {
        let invalid = |reason| Err(DmaError::InvalidConstraints { reason });
        if self.max_size == 0 || self.max_segment_size == 0 || self.nsegments == 0 {
            return invalid("zero size or segment count");
        }
        if self.alignment != 0 && !self.alignment.is_power_of_two() {
            return invalid("alignment is not a power of two");
        }
        if self.boundary != 0 && !self.boundary.is_power_of_two() {
            return invalid("boundary is not a power of two");
        }
        if self.lowaddr > self.highaddr {
            return invalid("lowaddr above highaddr");
        }
        if self.max_segment_size.saturating_mul(self.nsegments) < self.max_size {
            return invalid("segments cannot cover max_size");
        }
        Ok(())
    }

    /// Narrow `self` by the parent's constraints.
    fn inherit(&self, parent: &DmaConstraints) -> DmaConstraints {
        let mut res = *self;
        res.alignment = self.alignment.max(parent.alignment).max(1);
        res.boundary = match (self.boundary, parent.boundary) {
            (0, b) | (b, 0) => b,
            (a, b) => a.min(b),
        };
        res.lowaddr = self.lowaddr.min(parent.lowaddr);
        res.highaddr = self.highaddr.max(parent.highaddr);
        if res.boundary != 0 && res.boundary < res.max_segment_size {
            res.max_segment_size = res.boundary;
        }
        res
    }

    /// The largest part of `window` the device can reach.
    pub fn usable_window(&self, window: &Range<BusAddr>) -> Option<Range<BusAddr>> {
        if window.is_empty() {
            return None;
        }
        if self.lowaddr >= self.highaddr {
            return Some(window.clone());
        }
        let below = window.start..window.end.min(self.lowaddr.saturating_add(1));
        let above = window.start.max(self.highaddr.saturating_add(1))..window.end;
        let below_ok = !below.is_empty();
        let above_ok = !above.is_empty();
        match (below_ok, above_ok) {
            (true, true) if above.end - above.start > below.end - below.start => Some(above),
            (true, _) => Some(below),
            (false, true) => Some(above),
            (false, false) => None,
        }
    }
}

pub(crate) struct TagInner {
    pub(crate) platform: Arc<dyn DmaPlatform>,
    parent: Option<Arc<TagInner>>,
    constraints: DmaConstraints,
    child_tags: AtomicUsize,
    pub(crate) live_buffers: AtomicUsize,
}

impl Drop for TagInner {
    fn drop(&mut self) {
        if let Some(parent) = &self.parent {
            parent.child_tags.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// A DMA descriptor: effective constraints plus accounting of what was allocated against it.
///
/// A tag is owned by exactly one holder. Buffers allocated from it share its state, so the state
/// outlives the [DmaTag] value until the last buffer is gone.
pub struct DmaTag {
    inner: Arc<TagInner>,
}

impl Debug for DmaTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaTag")
            .field("constraints", &self.inner.constraints)
            .field("child_tags", &self.child_tags())
            .field("live_buffers", &self.live_buffers())
            .finish()
    }
}

impl DmaTag {
    /// The bus tag of `platform`, parent of every device tag.
    pub fn root(platform: Arc<dyn DmaPlatform>) -> Result<DmaTag, DmaError> {
        let window = platform.window().ok_or(DmaError::NoDmaBus)?;
        if window.is_empty() {
            return Err(DmaError::NoDmaBus);
        }
        let mut constraints = DmaConstraints::unrestricted();
        if platform.is_coherent() {
            constraints.flags |= TagFlags::COHERENT;
        }
        debug!("busdma: bus tag over [{:#x},{:#x})", window.start, window.end);
        Ok(DmaTag {
            inner: Arc::new(TagInner {
                platform,
                parent: None,
                constraints,
                child_tags: AtomicUsize::new(0),
                live_buffers: AtomicUsize::new(0),
            }),
        })
    }

    /// Create a child tag of `parent`.
    ///
    /// The constraints are validated, narrowed by the parent and checked against the platform's
    /// DMA window.
    pub fn create(parent: &DmaTag, constraints: DmaConstraints) -> Result<DmaTag, DmaError> {
        constraints.validate()?;
        let effective = constraints.inherit(&parent.inner.constraints);
        let platform = &parent.inner.platform;
        if effective.flags.contains(TagFlags::COHERENT) && !platform.is_coherent() {
            return Err(DmaError::Unsatisfiable);
        }
        let window = platform.window().ok_or(DmaError::NoDmaBus)?;
        let usable = effective
            .usable_window(&window)
            .ok_or(DmaError::Unsatisfiable)?;
        if ((usable.end - usable.start) as u128) < effective.max_size as u128 {
            return Err(DmaError::Unsatisfiable);
        }

        parent.inner.child_tags.fetch_add(1, Ordering::AcqRel);
        debug!(
            "busdma: tag created: size {:#x}, {} segment(s), window [{:#x},{:#x})",
            effective.max_size, effective.nsegments, usable.start, usable.end
        );
        Ok(DmaTag {
            inner: Arc::new(TagInner {
                platform: platform.clone(),
                parent: Some(parent.inner.clone()),
                constraints: effective,
                child_tags: AtomicUsize::new(0),
                live_buffers: AtomicUsize::new(0),
            }),
        })
    }

    /// Effective constraints after inheritance.
    pub fn constraints(&self) -> &DmaConstraints {
        &self.inner.constraints
    }

    pub fn live_buffers(&self) -> usize {
        self.inner.live_buffers.load(Ordering::Acquire)
    }

    pub fn child_tags(&self) -> usize {
        self.inner.child_tags.load(Ordering::Acquire)
    }

    /// Allocate one contiguous buffer of `max_size` bytes.
    ///
    /// Never waits for memory; with [AllocFlags::NOWAIT] it does not wait for the allocator lock
    /// either.
    pub fn alloc(&self, flags: AllocFlags) -> Result<CoherentBuffer, DmaError> {
        let inner = &self.inner;
        let c = &inner.constraints;
        let coherent = flags.contains(AllocFlags::COHERENT) || c.flags.contains(TagFlags::COHERENT);
        if coherent && !inner.platform.is_coherent() {
            return Err(DmaError::CoherencyUnavailable);
        }
        if c.max_size > c.max_segment_size {
            return Err(DmaError::InvalidConstraints {
                reason: "buffer does not fit one segment",
            });
        }
        let req = AllocRequest {
            size: c.max_size,
            alignment: c.alignment.max(1),
            boundary: c.boundary,
            lowaddr: c.lowaddr,
            highaddr: c.highaddr,
            flags,
        };
        let region = inner.platform.alloc_contiguous(&req)?;
        if region.size < req.size || !req.admits(region.bus_addr, req.size) {
            // SAFETY: the region was just handed out by this platform and never exposed.
            unsafe { inner.platform.free_contiguous(region) };
            return Err(DmaError::InvalidRegion);
        }
        if flags.contains(AllocFlags::ZERO) {
            // SAFETY: the platform maps `region.size` bytes at `vaddr` exclusively for us.
            unsafe { ptr::write_bytes(region.vaddr.as_ptr(), 0, region.size) };
        }
        inner.live_buffers.fetch_add(1, Ordering::AcqRel);
        trace!(
            "busdma: allocated {:#x} bytes at bus {:#x}",
            region.size, region.bus_addr
        );
        // SAFETY: `region` satisfies `req` and is owned by nobody else.
        Ok(unsafe { CoherentBuffer::new(inner.clone(), region) })
    }

    /// Release the buffer in `slot`, leaving [None] behind.
    ///
    /// An empty slot is a no-op, so this is safe to call on any cleanup path.
    pub fn release(&self, slot: &mut Option<CoherentBuffer>) -> Result<(), DmaError> {
        match slot.as_ref() {
            None => Ok(()),
            Some(buf) if !buf.belongs_to(self) => Err(DmaError::ForeignBuffer),
            Some(_) => {
                drop(slot.take());
                Ok(())
            }
        }
    }

    /// Destroy the tag. Fails with [DmaError::TagBusy], handing the tag back, while buffers or
    /// child tags are outstanding.
    pub fn destroy(self) -> Result<(), (DmaTag, DmaError)> {
        if self.live_buffers() != 0 || self.child_tags() != 0 {
            return Err((self, DmaError::TagBusy));
        }
        debug!("busdma: tag destroyed: size {:#x}", self.inner.constraints.max_size);
        Ok(())
    }

    pub(crate) fn state(&self) -> &Arc<TagInner> {
        &self.inner
    }
}
