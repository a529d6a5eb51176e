use crate::{
    dev::{Device, DeviceSoftc, DriverDetachError, handle::Handle},
    error::FbError,
    report,
};
use busdma::{
    AllocFlags, BUS_SPACE_MAXADDR, BusAddr, CoherentBuffer, DmaConstraints, DmaError, DmaTag,
    TagFlags,
};
use config::{FB_DMA_ALIGNMENT, FB_DMA_BOUNDARY, FB_DMA_LOWADDR, FB_DMA_NSEGMENTS, FB_DMA_SIZE};
use core::any::Any;

/// DMA constraints of the framebuffer: one contiguous segment below 4 GiB.
pub fn fb_dma_constraints() -> DmaConstraints {
    DmaConstraints {
        alignment: FB_DMA_ALIGNMENT,
        boundary: FB_DMA_BOUNDARY,
        lowaddr: FB_DMA_LOWADDR as BusAddr,
        highaddr: BUS_SPACE_MAXADDR,
        max_size: FB_DMA_SIZE,
        nsegments: FB_DMA_NSEGMENTS,
        max_segment_size: FB_DMA_SIZE,
        flags: TagFlags::empty(),
    }
}

/// State of one attached IPUv3 framebuffer.
///
/// `buffer` is present exactly while the device is attached. Field order makes a dropped softc
/// free its buffer before its tag.
#[derive(Debug)]
pub struct IpuFb {
    dev: Handle<Device>,
    size: usize,
    buffer: Option<CoherentBuffer>,
    tag: Option<DmaTag>,
}

impl IpuFb {
    /// Create the DMA tag under `dma_parent`, then allocate the framebuffer from it.
    ///
    /// If the allocation fails the tag is destroyed again, so an error leaves nothing behind.
    pub fn attach(dev: Handle<Device>, dma_parent: &DmaTag) -> Result<IpuFb, FbError> {
        let size = FB_DMA_SIZE;
        let tag = DmaTag::create(dma_parent, fb_dma_constraints()).map_err(|err| {
            report::tag_failed(&dev, err);
            FbError::DmaTagCreationFailed(err)
        })?;
        report::tag_created(&dev, &tag);

        match tag.alloc(AllocFlags::NOWAIT | AllocFlags::COHERENT) {
            Ok(buffer) => {
                report::buffer_allocated(&dev, &buffer);
                Ok(IpuFb {
                    dev,
                    size,
                    buffer: Some(buffer),
                    tag: Some(tag),
                })
            }
            Err(err) => {
                report::alloc_failed(&dev, err);
                if let Err((_, destroy_err)) = tag.destroy() {
                    report::release_failed(&dev, "dma tag", destroy_err);
                }
                Err(FbError::AllocationFailed(err))
            }
        }
    }

    /// Release the framebuffer, then the tag. A second call finds nothing to release.
    ///
    /// On error the remaining resources stay owned by the softc.
    pub fn release(&mut self) -> Result<(), DmaError> {
        let Some(tag) = self.tag.take() else {
            return Ok(());
        };
        if let Err(err) = tag.release(&mut self.buffer) {
            self.tag = Some(tag);
            return Err(err);
        }
        if let Err((tag, err)) = tag.destroy() {
            self.tag = Some(tag);
            return Err(err);
        }
        Ok(())
    }

    pub fn device(&self) -> &Handle<Device> {
        &self.dev
    }

    pub fn is_attached(&self) -> bool {
        self.buffer.is_some()
    }

    /// Size of the framebuffer in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dma_tag(&self) -> Option<&DmaTag> {
        self.tag.as_ref()
    }

    pub fn framebuffer(&mut self) -> Option<FramebufferView<'_>> {
        Some(FramebufferView {
            buf: self.buffer.as_mut()?,
        })
    }
}

impl DeviceSoftc for IpuFb {
    fn detach(&mut self) -> Result<(), DriverDetachError> {
        self.release().map_err(|err| {
            report::release_failed(&self.dev, "framebuffer", err);
            DriverDetachError::from(err)
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Borrowed access to an attached framebuffer.
///
/// The view borrows the softc, so the device cannot be detached while a view exists.
pub struct FramebufferView<'a> {
    buf: &'a mut CoherentBuffer,
}

impl FramebufferView<'_> {
    /// Address the display engine scans out from.
    pub fn bus_addr(&self) -> BusAddr {
        self.buf.bus_addr()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut_slice()
    }

    /// The 4-byte aligned part of the buffer as 32-bit pixels.
    ///
    /// Bytes before the first aligned address and a trailing partial word are not covered; both
    /// are empty when the platform maps the buffer word aligned.
    pub fn as_words_mut(&mut self) -> &mut [u32] {
        // SAFETY: every bit pattern is a valid u32.
        let (_, words, _) = unsafe { self.buf.as_mut_slice().align_to_mut::<u32>() };
        words
    }

    /// Repeat `pixel` over the whole buffer, starting at its first byte.
    pub fn fill(&mut self, pixel: u32) {
        let pattern = pixel.to_ne_bytes();
        for chunk in self.as_bytes_mut().chunks_mut(pattern.len()) {
            chunk.copy_from_slice(&pattern[..chunk.len()]);
        }
    }
}
