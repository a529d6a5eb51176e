//! Driver subsystem: driver classes, the registry and the probe/attach contract.
//!
//! Responsibilities:
//! - Provide the [Driver] trait implemented by every driver class and the [DeviceSoftc] trait of
//!   the per-device state a successful attach produces.
//! - Build the [DriverRegistry] once through a [RegistryBuilder]. The registry maps a class name
//!   to its [DriverEntry] and a compatible string to the classes claiming it. It is immutable
//!   after construction, so lookups need no locking.
//! - Expose the registry of this crate's drivers as [DRIVERS].
//!
//! Probe and attach are separate steps. [Driver::probe] only inspects a [Device] and reports a
//! [ProbeMatch]; the bus compares the matches of all candidates and calls [Driver::attach] on the
//! winner alone.
use super::{Device, handle::Handle};
use crate::debug_ex;
use alloc::{boxed::Box, collections::btree_map::BTreeMap, vec, vec::Vec};
use busdma::{DmaError, DmaTag};
use core::{any::Any, cmp::Ordering, fmt::Debug};
use lazy_static::lazy_static;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// How well a driver matches a device. A higher priority wins the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum ProbePriority {
    /// Only this driver can run the device.
    Specific = 0,
    /// A vendor-supplied driver.
    Vendor = -10,
    /// The base OS driver.
    Default = -20,
    LowPriority = -40,
    /// A generic driver for the device class.
    Generic = -100,
    /// Attaches to everything; never a real match.
    Hooker = -1000000,
}

impl Ord for ProbePriority {
    fn cmp(&self, other: &Self) -> Ordering {
        i32::from(*self).cmp(&i32::from(*other))
    }
}

impl PartialOrd for ProbePriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A positive probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeMatch {
    pub priority: ProbePriority,
    /// Human-readable description recorded on the device if the driver wins.
    pub desc: &'static str,
}

/// What a driver gets to work with during attach.
pub struct AttachContext<'a> {
    pub dev: &'a Handle<Device>,
    /// DMA tag of the parent bus.
    pub dma_parent: &'a DmaTag,
}

/// Trait implemented by driver classes.
///
/// Implementations must be stateless or synchronize internally: one driver instance serves every
/// device of its class. Per-device state lives in the [DeviceSoftc] returned by [Driver::attach].
pub trait Driver: Sync + Send + Debug {
    /// Class name, also the prefix of unit names (`fb` gives `fb0`, `fb1`, ...).
    fn get_name(&self) -> &'static str;
    fn get_comp_strs(&self) -> &'static [&'static str];
    /// Decide whether the driver can manage `dev`. Must not have side effects.
    fn probe(&self, dev: &Device) -> Result<ProbeMatch, DriverProbeError>;
    /// Bind to the device and acquire its resources. On error everything acquired so far has
    /// been released.
    fn attach(&self, ctx: &AttachContext) -> Result<Box<dyn DeviceSoftc>, DriverAttachError>;
    /// Hook run once when the driver is put into a registry.
    fn on_registered(&self) {}
}

/// Per-device state of a bound driver.
pub trait DeviceSoftc: Send + Debug {
    /// Release the device's resources. Calling it again after success is a no-op.
    fn detach(&mut self) -> Result<(), DriverDetachError>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// One row of the driver registry: driver class `class` attaches to devices on bus `bus`.
#[derive(Debug, Clone, Copy)]
pub struct DriverEntry {
    pub class: &'static str,
    pub bus: &'static str,
    pub factory: fn() -> Box<dyn Driver>,
}

struct RegisteredDriver {
    entry: DriverEntry,
    driver: Box<dyn Driver>,
}

/// Immutable set of driver classes.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: Vec<RegisteredDriver>,
    by_class: BTreeMap<&'static str, usize>,
    by_comp: BTreeMap<&'static str, Vec<usize>>,
}

impl Debug for DriverRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.drivers.iter().map(|reg| reg.entry.class))
            .finish()
    }
}

impl DriverRegistry {
    pub fn entry(&self, class: &str) -> Option<&DriverEntry> {
        Some(&self.drivers[*self.by_class.get(class)?].entry)
    }

    pub fn driver(&self, class: &str) -> Option<&dyn Driver> {
        Some(self.drivers[*self.by_class.get(class)?].driver.as_ref())
    }

    /// Drivers registered for `bus`, in registration order.
    pub fn drivers_on<'a>(
        &'a self,
        bus: &'a str,
    ) -> impl Iterator<Item = (&'a DriverEntry, &'a dyn Driver)> + 'a {
        self.drivers
            .iter()
            .filter(move |reg| reg.entry.bus == bus)
            .map(|reg| (&reg.entry, reg.driver.as_ref()))
    }

    /// Classes claiming compatible string `comp_str`, in registration order.
    pub fn find_drivers(&self, comp_str: &str) -> Vec<&'static str> {
        match self.by_comp.get(comp_str) {
            Some(ids) => ids.iter().map(|id| self.drivers[*id].entry.class).collect(),
            None => vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

/// Collects [DriverEntry]s before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    registry: DriverRegistry,
}

impl RegistryBuilder {
    pub fn new() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Register a driver class.
    ///
    /// Steps:
    /// 1. Reject the entry if its class is already taken.
    /// 2. Instantiate the driver through the entry's factory and run [Driver::on_registered].
    /// 3. Index the driver under each of its compatible strings.
    pub fn register(&mut self, entry: DriverEntry) -> Result<(), RegistryError> {
        let registry = &mut self.registry;
        if registry.by_class.contains_key(entry.class) {
            return Err(RegistryError::DuplicateClass { class: entry.class });
        }
        let driver = (entry.factory)();
        debug_ex!("\tRegistered driver '{}' on '{}'.", entry.class, entry.bus);
        driver.on_registered();

        let id = registry.drivers.len();
        registry.by_class.insert(entry.class, id);
        for comp in driver.get_comp_strs() {
            registry.by_comp.entry(*comp).or_default().push(id);
        }
        registry.drivers.push(RegisteredDriver { entry, driver });
        Ok(())
    }

    pub fn build(self) -> DriverRegistry {
        self.registry
    }
}

lazy_static! {
    /// Registry of the drivers shipped with this crate.
    pub static ref DRIVERS: DriverRegistry = {
        debug_ex!("Registering drivers...");
        let mut builder = RegistryBuilder::new();
        crate::drivers::register_drivers(&mut builder);
        debug_ex!("Drivers registered.");
        builder.build()
    };
}

// region: Error Types

/// Errors returned by [Driver::probe]. Both are ordinary non-matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverProbeError {
    /// The node's status is not "okay".
    Disabled,
    /// None of the node's compatible strings is supported.
    NotCompatible,
}

/// Errors returned by [Driver::attach].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverAttachError {
    DmaTagCreationFailed(DmaError),
    AllocationFailed(DmaError),
    /// Custom driver-specific information.
    Customized { info: &'static str },
}

/// Errors returned by [DeviceSoftc::detach]. The device stays attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverDetachError {
    /// A DMA resource could not be released.
    Dma(DmaError),
}

impl From<DmaError> for DriverDetachError {
    fn from(err: DmaError) -> Self {
        DriverDetachError::Dma(err)
    }
}

/// Errors of [RegistryBuilder::register].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateClass { class: &'static str },
}

// endregion

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Dummy;

    impl Driver for Dummy {
        fn get_name(&self) -> &'static str {
            "dummy"
        }
        fn get_comp_strs(&self) -> &'static [&'static str] {
            &["acme,dummy", "fsl,ipu3"]
        }
        fn probe(&self, _dev: &Device) -> Result<ProbeMatch, DriverProbeError> {
            Err(DriverProbeError::NotCompatible)
        }
        fn attach(&self, _ctx: &AttachContext) -> Result<Box<dyn DeviceSoftc>, DriverAttachError> {
            Err(DriverAttachError::Customized { info: "dummy" })
        }
    }

    fn dummy() -> Box<dyn Driver> {
        Box::new(Dummy)
    }

    const DUMMY: DriverEntry = DriverEntry {
        class: "dummy",
        bus: "simplebus",
        factory: dummy,
    };

    #[test]
    fn priorities_order_by_value() {
        assert!(ProbePriority::Specific > ProbePriority::Vendor);
        assert!(ProbePriority::Default > ProbePriority::Generic);
        assert_eq!(i32::from(ProbePriority::Default), -20);
        assert_eq!(ProbePriority::try_from(-10i32).ok(), Some(ProbePriority::Vendor));
        assert!(ProbePriority::try_from(-11i32).is_err());
    }

    #[test]
    fn duplicate_classes_are_rejected() {
        let mut builder = RegistryBuilder::new();
        builder.register(DUMMY).unwrap();
        assert_eq!(
            builder.register(DUMMY),
            Err(RegistryError::DuplicateClass { class: "dummy" })
        );
        let registry = builder.build();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.entry("dummy").unwrap().bus, "simplebus");
        assert_eq!(registry.driver("dummy").unwrap().get_name(), "dummy");
        assert!(registry.entry("fb").is_none());
    }

    #[test]
    fn compatible_index_keeps_registration_order() {
        let mut builder = RegistryBuilder::new();
        builder.register(DUMMY).unwrap();
        crate::drivers::register_drivers(&mut builder);
        let registry = builder.build();
        assert_eq!(registry.find_drivers("fsl,ipu3"), ["dummy", "fb"]);
        assert_eq!(registry.find_drivers("fsl,imx6q-ipu"), ["fb"]);
        assert!(registry.find_drivers("acme,none").is_empty());
        assert_eq!(registry.drivers_on("simplebus").count(), 2);
        assert_eq!(registry.drivers_on("pci").count(), 0);
    }

    #[test]
    fn global_registry_holds_the_framebuffer() {
        let entry = DRIVERS.entry("fb").unwrap();
        assert_eq!(entry.bus, "simplebus");
        assert_eq!(DRIVERS.find_drivers("fsl,imx6q-ipu"), ["fb"]);
    }
}
