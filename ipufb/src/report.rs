//! Diagnostics of the framebuffer driver and the bus.
//!
//! Every message goes to the `log` facade under [TARGET] and starts with the device's unit name
//! (or node name while unbound). Reporting never changes control flow.

use crate::{
    debug_ex,
    dev::{Device, DriverAttachError, DriverDetachError},
};
use busdma::{CoherentBuffer, DmaError, DmaTag};
use log::{error, info, warn};

/// Log target of every diagnostic of the crate.
pub const TARGET: &str = "ipufb";

pub fn tag_created(dev: &Device, tag: &DmaTag) {
    let c = tag.constraints();
    info!(
        target: TARGET,
        "{}: created DMA tag: {:#x} bytes, {} segment(s), lowaddr {:#x}",
        dev.nameunit(),
        c.max_size,
        c.nsegments,
        c.lowaddr
    );
}

pub fn tag_failed(dev: &Device, err: DmaError) {
    error!(target: TARGET, "{}: cannot create dma tag: {}", dev.nameunit(), err);
}

pub fn buffer_allocated(dev: &Device, buf: &CoherentBuffer) {
    info!(
        target: TARGET,
        "{}: allocated fb at bus address {:#x}, {:#x} bytes",
        dev.nameunit(),
        buf.bus_addr(),
        buf.len()
    );
}

pub fn alloc_failed(dev: &Device, err: DmaError) {
    error!(target: TARGET, "{}: cannot allocate framebuffer: {}", dev.nameunit(), err);
}

/// A resource could not be given back while unwinding or detaching.
pub fn release_failed(dev: &Device, what: &str, err: DmaError) {
    warn!(target: TARGET, "{}: cannot release {}: {}", dev.nameunit(), what, err);
}

pub fn no_driver(dev: &Device) {
    debug_ex!(target: TARGET, "{}: no driver attached", dev.path);
}

pub fn attached(dev: &Device, desc: &str, bus: &str) {
    info!(target: TARGET, "{}: <{}> on {}", dev.nameunit(), desc, bus);
}

pub fn attach_failed(dev: &Device, err: DriverAttachError) {
    error!(target: TARGET, "{}: attach failed: {:?}", dev.nameunit(), err);
}

pub fn detached(dev: &Device) {
    info!(target: TARGET, "{}: detached", dev.nameunit());
}

pub fn detach_failed(dev: &Device, err: DriverDetachError) {
    error!(target: TARGET, "{}: detach failed: {:?}", dev.nameunit(), err);
}
