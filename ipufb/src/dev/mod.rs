//! Platform devices, drivers and the bus that binds them.

pub mod bus;
pub mod handle;

mod device;
pub use device::*;
mod driver;
pub use driver::*;
pub use bus::{BusError, DeviceId, DeviceState, PlatformBus, ProbeOutcome, SIMPLEBUS};
