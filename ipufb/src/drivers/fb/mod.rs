//! IPUv3 framebuffer driver.
//!
//! Binds to `fsl,ipu3` / `fsl,imx6q-ipu` nodes on the simple bus and owns one coherent DMA
//! buffer of [config::FB_DMA_SIZE] bytes per device. Display programming is out of scope: the
//! driver only manages the buffer's lifetime and hands it out through [FramebufferView].

use crate::dev::{
    AttachContext, DeviceId, DeviceSoftc, Driver, DriverAttachError, DriverEntry,
    DriverProbeError, PlatformBus, ProbeMatch, SIMPLEBUS, Device,
};
use alloc::boxed::Box;

pub mod ident;
mod softc;

pub use ident::{FB_COMPAT, FB_DESC};
pub use softc::{FramebufferView, IpuFb, fb_dma_constraints};

/// Driver class name; units are `fb0`, `fb1`, ...
pub const FB_CLASS: &str = "fb";

#[derive(Debug)]
pub struct FbDriver;

impl Driver for FbDriver {
    fn get_name(&self) -> &'static str {
        FB_CLASS
    }

    fn get_comp_strs(&self) -> &'static [&'static str] {
        FB_COMPAT
    }

    fn probe(&self, dev: &Device) -> Result<ProbeMatch, DriverProbeError> {
        ident::resolve(dev)
    }

    fn attach(&self, ctx: &AttachContext) -> Result<Box<dyn DeviceSoftc>, DriverAttachError> {
        let sc = IpuFb::attach(ctx.dev.clone(), ctx.dma_parent)?;
        Ok(Box::new(sc))
    }
}

fn create_driver() -> Box<dyn Driver> {
    Box::new(FbDriver)
}

pub const DRIVER_ENTRY: DriverEntry = DriverEntry {
    class: FB_CLASS,
    bus: SIMPLEBUS,
    factory: create_driver,
};

impl PlatformBus<'_> {
    /// The framebuffer of `id` while an [IpuFb] is attached to it.
    pub fn framebuffer(&mut self, id: DeviceId) -> Option<FramebufferView<'_>> {
        self.softc_mut::<IpuFb>(id)?.framebuffer()
    }
}
