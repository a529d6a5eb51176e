use busdma::{DmaPlatform, DmaTag, LinearDmaPool};
use ipufb::{
    dev::{DRIVERS, Device, PlatformBus, SIMPLEBUS},
    logging::{self, LogSink},
};
use log::LevelFilter;
use std::{
    fmt::Arguments,
    sync::{Arc, Mutex},
};

struct Capture(Mutex<Vec<String>>);

impl LogSink for Capture {
    fn write_line(&self, line: Arguments) {
        self.0.lock().unwrap().push(line.to_string());
    }
}

static CAPTURE: Capture = Capture(Mutex::new(Vec::new()));

fn take_lines() -> Vec<String> {
    std::mem::take(&mut *CAPTURE.0.lock().unwrap())
}

fn bus_over(bus_base: u64) -> PlatformBus<'static> {
    let mem = Box::leak(vec![0u8; 0x10_0000].into_boxed_slice());
    let pool: Arc<dyn DmaPlatform> =
        Arc::new(LinearDmaPool::from_static(mem, bus_base, true).unwrap());
    PlatformBus::new(SIMPLEBUS, &DRIVERS, DmaTag::root(pool).unwrap())
}

fn ipu() -> Device {
    Device::new("ipu@2400000").with_compatible(&["fsl,ipu3"])
}

// One test per binary: the logger is process-global.
#[test]
fn lifecycle_is_reported() {
    logging::init(&CAPTURE, LevelFilter::Trace).unwrap();
    assert!(logging::init(&CAPTURE, LevelFilter::Trace).is_err());

    let mut bus = bus_over(0x1000_0000);
    let (id, _) = bus.offer(ipu());
    let lines = take_lines();
    let tag = lines
        .iter()
        .position(|l| l.contains("fb0: created DMA tag: 0x20000 bytes, 1 segment(s)"))
        .unwrap();
    let alloc = lines
        .iter()
        .position(|l| l.contains("fb0: allocated fb at bus address 0x1"))
        .unwrap();
    assert!(tag < alloc);
    assert!(
        lines
            .iter()
            .any(|l| l.contains("fb0: <i.MX5x Image Processing Unit v3 (FB)> on simplebus"))
    );
    // Colour and level prefix of the logger.
    assert!(lines.iter().any(|l| l.starts_with("\u{1B}[20m[INFO] fb0:")));

    bus.detach(id).unwrap();
    assert!(take_lines().iter().any(|l| l.contains("fb0: detached")));

    let mut high = bus_over(0x1_0000_0000);
    high.offer(ipu());
    let lines = take_lines();
    assert!(
        lines
            .iter()
            .any(|l| l.starts_with("\u{1B}[31m[ERROR] fb0: cannot create dma tag:"))
    );
    assert!(!lines.iter().any(|l| l.contains("allocated fb")));

    let mut non_coherent = {
        let mem = Box::leak(vec![0u8; 0x10_0000].into_boxed_slice());
        let pool: Arc<dyn DmaPlatform> =
            Arc::new(LinearDmaPool::from_static(mem, 0x1000_0000, false).unwrap());
        PlatformBus::new(SIMPLEBUS, &DRIVERS, DmaTag::root(pool).unwrap())
    };
    non_coherent.offer(ipu());
    let lines = take_lines();
    assert!(lines.iter().any(|l| l.contains("fb0: created DMA tag")));
    assert!(lines.iter().any(|l| l.contains(
        "fb0: cannot allocate framebuffer: coherent DMA memory unavailable"
    )));
    assert!(lines.iter().any(|l| l.contains("fb0: attach failed")));
}
