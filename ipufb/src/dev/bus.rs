//! Platform bus: owns the devices found in the device tree and binds drivers to them.
//!
//! Every device moves through
//! `Unbound -> Probing -> Attaching -> Attached -> Detaching -> Unbound`.
//! Probing asks every driver registered for the bus and picks the best [ProbeMatch]; attaching
//! hands the device to that driver alone. A failed attach returns the device to `Unbound` with no
//! unit number and no softc, so it can be probed again later.
//!
//! All operations take `&mut self`: the bus serializes the lifecycle of its devices.
use super::{
    AttachContext, Device, DeviceSoftc, Driver, DriverAttachError, DriverDetachError, DriverEntry,
    DriverRegistry, ProbeMatch,
    handle::{Handle, HandleRef},
};
use crate::{debug_ex, report};
use alloc::{
    boxed::Box,
    collections::{BTreeMap, BTreeSet},
    format,
    vec::Vec,
};
use busdma::DmaTag;
use dt::{DeviceTree, Node, NodeType};
use log::warn;
use utils::define_struct;

/// Bus name the framebuffer driver registers on.
pub const SIMPLEBUS: &str = "simplebus";

define_struct!(index,
    /// Index of a device on a [PlatformBus].
    DeviceId, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Unbound,
    Probing,
    Attaching,
    Attached,
    Detaching,
}

impl DeviceState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition(self, next: DeviceState) -> bool {
        use DeviceState::*;
        matches!(
            (self, next),
            (Unbound, Probing)
                | (Probing, Attaching)
                | (Probing, Unbound)
                | (Attaching, Attached)
                | (Attaching, Unbound)
                | (Attached, Detaching)
                | (Detaching, Unbound)
                | (Detaching, Attached)
        )
    }

    pub fn transition(self, next: DeviceState) -> Result<DeviceState, BusError> {
        if self.can_transition(next) {
            Ok(next)
        } else {
            Err(BusError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// Result of presenting a device to the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// No driver accepted the device; it stays unbound.
    NoMatch,
    /// Driver `class` is bound as unit `unit`.
    Attached { class: &'static str, unit: usize },
    /// The winning driver failed to attach; it released whatever it had acquired.
    Failed(DriverAttachError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    UnknownDevice(DeviceId),
    InvalidTransition { from: DeviceState, to: DeviceState },
    /// The driver refused to detach; the device stays attached.
    Detach(DriverDetachError),
}

#[derive(Debug)]
struct Binding {
    class: &'static str,
    unit: usize,
    /// Attach order, for teardown in reverse.
    seq: u64,
    softc: Box<dyn DeviceSoftc>,
}

#[derive(Debug)]
struct DeviceSlot {
    dev: Handle<Device>,
    state: DeviceState,
    binding: Option<Binding>,
}

impl DeviceSlot {
    fn advance(&mut self, next: DeviceState) {
        debug_assert!(
            self.state.can_transition(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}

#[derive(Debug)]
pub struct PlatformBus<'r> {
    name: &'static str,
    registry: &'r DriverRegistry,
    dma_tag: DmaTag,
    devices: Vec<DeviceSlot>,
    /// Unit numbers in use, per driver class.
    devclasses: BTreeMap<&'static str, BTreeSet<usize>>,
    next_seq: u64,
}

impl<'r> PlatformBus<'r> {
    /// Create bus `name` whose devices are served by `registry` and allocate DMA memory under
    /// `dma_tag`.
    pub fn new(name: &'static str, registry: &'r DriverRegistry, dma_tag: DmaTag) -> Self {
        PlatformBus {
            name,
            registry,
            dma_tag,
            devices: Vec::new(),
            devclasses: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn dma_tag(&self) -> &DmaTag {
        &self.dma_tag
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn device(&self, id: DeviceId) -> Option<&Handle<Device>> {
        Some(&self.devices.get(*id)?.dev)
    }

    pub fn state(&self, id: DeviceId) -> Option<DeviceState> {
        Some(self.devices.get(*id)?.state)
    }

    /// Look a device up by its device tree path.
    pub fn find(&self, path: &str) -> Option<DeviceId> {
        self.devices
            .iter()
            .position(|slot| slot.dev.path.as_ref() == path)
            .map(DeviceId::from)
    }

    /// Softc of the driver bound to `id`, if it is a `T`.
    pub fn softc<T: 'static>(&self, id: DeviceId) -> Option<&T> {
        let binding = self.devices.get(*id)?.binding.as_ref()?;
        binding.softc.as_any().downcast_ref()
    }

    pub fn softc_mut<T: 'static>(&mut self, id: DeviceId) -> Option<&mut T> {
        let binding = self.devices.get_mut(*id)?.binding.as_mut()?;
        binding.softc.as_any_mut().downcast_mut()
    }

    /// Add `dev` unbound, without probing it.
    pub fn add_device(&mut self, dev: Device) -> DeviceId {
        self.devices.push(DeviceSlot {
            dev: Handle::from(dev),
            state: DeviceState::Unbound,
            binding: None,
        });
        DeviceId::from(self.devices.len() - 1)
    }

    /// Add `dev` and try to bind a driver to it.
    pub fn offer(&mut self, dev: Device) -> (DeviceId, ProbeOutcome) {
        let id = self.add_device(dev);
        self.devices[*id].advance(DeviceState::Probing);
        (id, self.probe_slot(id))
    }

    /// Probe an unbound device again, e.g. after it was detached.
    pub fn probe_and_attach(&mut self, id: DeviceId) -> Result<ProbeOutcome, BusError> {
        let slot = self.devices.get_mut(*id).ok_or(BusError::UnknownDevice(id))?;
        slot.state = slot.state.transition(DeviceState::Probing)?;
        Ok(self.probe_slot(id))
    }

    /// Highest priority wins; among equals the driver registered first.
    fn best_match(&self, dev: &Device) -> Option<(&'r DriverEntry, &'r dyn Driver, ProbeMatch)> {
        let registry = self.registry;
        let mut best: Option<(&'r DriverEntry, &'r dyn Driver, ProbeMatch)> = None;
        for (entry, driver) in registry.drivers_on(self.name) {
            match driver.probe(dev) {
                Ok(found) => {
                    if best.is_none_or(|(_, _, cur)| found.priority > cur.priority) {
                        best = Some((entry, driver, found));
                    }
                }
                Err(err) => {
                    debug_ex!(target: report::TARGET, "\t{}: '{}' declined: {:?}", dev.path, entry.class, err);
                }
            }
        }
        best
    }

    fn probe_slot(&mut self, id: DeviceId) -> ProbeOutcome {
        let dev = self.devices[*id].dev.clone();
        let Some((entry, driver, found)) = self.best_match(&dev) else {
            self.devices[*id].advance(DeviceState::Unbound);
            report::no_driver(&dev);
            return ProbeOutcome::NoMatch;
        };

        dev.set_desc(Some(found.desc));
        self.devices[*id].advance(DeviceState::Attaching);
        let units = self.devclasses.entry(entry.class).or_default();
        let unit = (0..).find(|unit| !units.contains(unit)).unwrap_or(units.len());
        units.insert(unit);
        dev.set_nameunit(Some(format!("{}{}", entry.class, unit).into_boxed_str()));

        let ctx = AttachContext {
            dev: &dev,
            dma_parent: &self.dma_tag,
        };
        match driver.attach(&ctx) {
            Ok(softc) => {
                let slot = &mut self.devices[*id];
                slot.binding = Some(Binding {
                    class: entry.class,
                    unit,
                    seq: self.next_seq,
                    softc,
                });
                self.next_seq += 1;
                slot.advance(DeviceState::Attached);
                report::attached(&dev, found.desc, self.name);
                ProbeOutcome::Attached {
                    class: entry.class,
                    unit,
                }
            }
            Err(err) => {
                report::attach_failed(&dev, err);
                release_unit(&mut self.devclasses, entry.class, unit);
                dev.set_nameunit(None);
                dev.set_desc(None);
                self.devices[*id].advance(DeviceState::Unbound);
                ProbeOutcome::Failed(err)
            }
        }
    }

    /// Detach the driver bound to `id`.
    ///
    /// Unknown and unbound devices are left alone and reported as success.
    pub fn detach(&mut self, id: DeviceId) -> Result<(), BusError> {
        let Some(slot) = self.devices.get_mut(*id) else {
            return Ok(());
        };
        match slot.state {
            DeviceState::Unbound => return Ok(()),
            state => slot.state = state.transition(DeviceState::Detaching)?,
        }
        let Some(binding) = slot.binding.as_mut() else {
            slot.advance(DeviceState::Unbound);
            return Ok(());
        };
        if let Err(err) = binding.softc.detach() {
            slot.advance(DeviceState::Attached);
            report::detach_failed(&slot.dev, err);
            return Err(BusError::Detach(err));
        }
        if let Some(binding) = slot.binding.take() {
            release_unit(&mut self.devclasses, binding.class, binding.unit);
        }
        report::detached(&slot.dev);
        slot.dev.set_nameunit(None);
        slot.dev.set_desc(None);
        slot.advance(DeviceState::Unbound);
        Ok(())
    }

    /// Detach every bound device, most recently attached first. Stops at the first refusal.
    pub fn detach_all(&mut self) -> Result<(), BusError> {
        let mut bound: Vec<(u64, DeviceId)> = self
            .devices
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| Some((slot.binding.as_ref()?.seq, DeviceId::from(idx))))
            .collect();
        bound.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        for (_, id) in bound {
            self.detach(id)?;
        }
        Ok(())
    }

    /// Offer every device node of `tree` to the bus.
    ///
    /// Walks the children of the root and, recursively, of every `simple-bus` node. Machine
    /// description nodes (`/chosen`, `/memory`, ...) and nodes with malformed properties are
    /// skipped.
    pub fn enumerate(&mut self, tree: &DeviceTree) -> Vec<(DeviceId, ProbeOutcome)> {
        debug_ex!(target: report::TARGET, "Enumerating devices...");
        let mut res = Vec::new();
        self.enumerate_children(tree, tree.get_root(), None, &mut res);
        debug_ex!(target: report::TARGET, "{} device(s) enumerated.", res.len());
        res
    }

    fn enumerate_children(
        &mut self,
        tree: &DeviceTree,
        node: &Node,
        parent: Option<HandleRef<Device>>,
        res: &mut Vec<(DeviceId, ProbeOutcome)>,
    ) {
        for child in tree.get_children(node) {
            if child.node_type == NodeType::Description {
                debug_ex!(target: report::TARGET, "\tSkipped description node {}.", tree.get_full_path(child));
                continue;
            }
            let dev = match Device::from_node(tree, child, parent.clone()) {
                Ok(dev) => dev,
                Err(err) => {
                    warn!(
                        target: report::TARGET,
                        "Skipped device '{}': {:?}",
                        tree.get_full_path(child),
                        err
                    );
                    continue;
                }
            };
            let (id, outcome) = self.offer(dev);
            res.push((id, outcome));
            if tree.is_compatible(child, "simple-bus") {
                let bus_ref = self.devices[*id].dev.create_ref();
                self.enumerate_children(tree, child, Some(bus_ref), res);
            }
        }
    }
}

fn release_unit(
    devclasses: &mut BTreeMap<&'static str, BTreeSet<usize>>,
    class: &'static str,
    unit: usize,
) {
    if let Some(units) = devclasses.get_mut(class) {
        units.remove(&unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::{DriverProbeError, ProbePriority, RegistryBuilder};
    use alloc::sync::Arc;
    use busdma::{DmaPlatform, LinearDmaPool};
    use core::any::Any;

    #[test]
    fn lifecycle_edges() {
        use DeviceState::*;
        assert!(Unbound.can_transition(Probing));
        assert!(Attaching.can_transition(Unbound));
        assert!(Detaching.can_transition(Attached));
        assert!(!Unbound.can_transition(Attached));
        assert!(!Attached.can_transition(Probing));
        assert_eq!(
            Attached.transition(Probing),
            Err(BusError::InvalidTransition {
                from: Attached,
                to: Probing
            })
        );
        assert_eq!(Attached.transition(Detaching), Ok(Detaching));
    }

    #[derive(Debug)]
    struct Plain;

    impl DeviceSoftc for Plain {
        fn detach(&mut self) -> Result<(), DriverDetachError> {
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    /// Matches `acme,*` devices with a fixed priority.
    #[derive(Debug)]
    struct Acme(&'static str, ProbePriority);

    impl Driver for Acme {
        fn get_name(&self) -> &'static str {
            self.0
        }
        fn get_comp_strs(&self) -> &'static [&'static str] {
            &["acme,widget"]
        }
        fn probe(&self, dev: &Device) -> Result<ProbeMatch, DriverProbeError> {
            if dev.is_compatible("acme,widget") {
                Ok(ProbeMatch {
                    priority: self.1,
                    desc: self.0,
                })
            } else {
                Err(DriverProbeError::NotCompatible)
            }
        }
        fn attach(&self, _ctx: &AttachContext) -> Result<Box<dyn DeviceSoftc>, DriverAttachError> {
            Ok(Box::new(Plain))
        }
    }

    fn generic() -> Box<dyn Driver> {
        Box::new(Acme("generic", ProbePriority::Generic))
    }
    fn first() -> Box<dyn Driver> {
        Box::new(Acme("first", ProbePriority::Vendor))
    }
    fn second() -> Box<dyn Driver> {
        Box::new(Acme("second", ProbePriority::Vendor))
    }

    fn registry() -> DriverRegistry {
        let mut builder = RegistryBuilder::new();
        for entry in [
            DriverEntry {
                class: "generic",
                bus: SIMPLEBUS,
                factory: generic,
            },
            DriverEntry {
                class: "first",
                bus: SIMPLEBUS,
                factory: first,
            },
            DriverEntry {
                class: "second",
                bus: SIMPLEBUS,
                factory: second,
            },
        ] {
            builder.register(entry).unwrap();
        }
        builder.build()
    }

    fn root_tag() -> DmaTag {
        let mem = Box::leak(vec![0u8; 0x4_0000].into_boxed_slice());
        let pool: Arc<dyn DmaPlatform> =
            Arc::new(LinearDmaPool::from_static(mem, 0x1000_0000, true).unwrap());
        DmaTag::root(pool).unwrap()
    }

    #[test]
    fn best_priority_wins_and_ties_go_to_the_first() {
        let registry = registry();
        let mut bus = PlatformBus::new(SIMPLEBUS, &registry, root_tag());
        let (id, outcome) = bus.offer(Device::new("w@0").with_compatible(&["acme,widget"]));
        assert_eq!(
            outcome,
            ProbeOutcome::Attached {
                class: "first",
                unit: 0
            }
        );
        assert_eq!(bus.state(id), Some(DeviceState::Attached));
        let dev = bus.device(id).unwrap();
        assert_eq!(dev.desc(), Some("first"));
        assert_eq!(dev.nameunit().as_ref(), "first0");
        assert!(bus.softc::<Plain>(id).is_some());
    }

    #[test]
    fn unmatched_devices_stay_unbound() {
        let registry = registry();
        let mut bus = PlatformBus::new(SIMPLEBUS, &registry, root_tag());
        let (id, outcome) = bus.offer(Device::new("x@0").with_compatible(&["acme,other"]));
        assert_eq!(outcome, ProbeOutcome::NoMatch);
        assert_eq!(bus.state(id), Some(DeviceState::Unbound));
        assert_eq!(bus.device(id).unwrap().desc(), None);
        assert!(bus.softc::<Plain>(id).is_none());
    }

    #[test]
    fn other_buses_see_no_drivers() {
        let registry = registry();
        let mut bus = PlatformBus::new("pci", &registry, root_tag());
        let (_, outcome) = bus.offer(Device::new("w@0").with_compatible(&["acme,widget"]));
        assert_eq!(outcome, ProbeOutcome::NoMatch);
    }

    #[test]
    fn units_are_reused_after_detach() {
        let registry = registry();
        let mut bus = PlatformBus::new(SIMPLEBUS, &registry, root_tag());
        let widget = || Device::new("w").with_compatible(&["acme,widget"]);
        let (a, _) = bus.offer(widget());
        let (b, _) = bus.offer(widget());
        assert_eq!(bus.device(b).unwrap().nameunit().as_ref(), "first1");
        bus.detach(a).unwrap();
        assert_eq!(bus.device(a).unwrap().nameunit().as_ref(), "w");
        let (_, outcome) = bus.offer(widget());
        assert_eq!(
            outcome,
            ProbeOutcome::Attached {
                class: "first",
                unit: 0
            }
        );
    }

    #[test]
    fn detach_is_a_no_op_when_unbound() {
        let registry = registry();
        let mut bus = PlatformBus::new(SIMPLEBUS, &registry, root_tag());
        let (id, _) = bus.offer(Device::new("w").with_compatible(&["acme,widget"]));
        bus.detach(id).unwrap();
        assert_eq!(bus.state(id), Some(DeviceState::Unbound));
        bus.detach(id).unwrap();
        bus.detach(DeviceId::from(42)).unwrap();
        assert_eq!(
            bus.probe_and_attach(DeviceId::from(42)),
            Err(BusError::UnknownDevice(DeviceId::from(42)))
        );
        assert!(matches!(
            bus.probe_and_attach(id),
            Ok(ProbeOutcome::Attached { .. })
        ));
        assert_eq!(
            bus.probe_and_attach(id),
            Err(BusError::InvalidTransition {
                from: DeviceState::Attached,
                to: DeviceState::Probing
            })
        );
    }

    #[test]
    fn detach_all_empties_the_bus() {
        let registry = registry();
        let mut bus = PlatformBus::new(SIMPLEBUS, &registry, root_tag());
        let ids: Vec<DeviceId> = (0..3)
            .map(|_| bus.offer(Device::new("w").with_compatible(&["acme,widget"])).0)
            .collect();
        bus.detach_all().unwrap();
        for id in ids {
            assert_eq!(bus.state(id), Some(DeviceState::Unbound));
        }
    }

    /// Softc that refuses to let go of its device.
    #[derive(Debug)]
    struct Pinned;

    impl DeviceSoftc for Pinned {
        fn detach(&mut self) -> Result<(), DriverDetachError> {
            Err(DriverDetachError::Dma(busdma::DmaError::TagBusy))
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct PinningDriver;

    impl Driver for PinningDriver {
        fn get_name(&self) -> &'static str {
            "pin"
        }
        fn get_comp_strs(&self) -> &'static [&'static str] {
            &["acme,widget"]
        }
        fn probe(&self, _dev: &Device) -> Result<ProbeMatch, DriverProbeError> {
            Ok(ProbeMatch {
                priority: ProbePriority::Default,
                desc: "pinned",
            })
        }
        fn attach(&self, _ctx: &AttachContext) -> Result<Box<dyn DeviceSoftc>, DriverAttachError> {
            Ok(Box::new(Pinned))
        }
    }

    fn pinning() -> Box<dyn Driver> {
        Box::new(PinningDriver)
    }

    #[test]
    fn refused_detach_keeps_the_binding() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(DriverEntry {
                class: "pin",
                bus: SIMPLEBUS,
                factory: pinning,
            })
            .unwrap();
        let registry = builder.build();
        let mut bus = PlatformBus::new(SIMPLEBUS, &registry, root_tag());
        let (id, _) = bus.offer(Device::new("w"));

        assert_eq!(
            bus.detach(id),
            Err(BusError::Detach(DriverDetachError::Dma(
                busdma::DmaError::TagBusy
            )))
        );
        assert_eq!(bus.state(id), Some(DeviceState::Attached));
        assert!(bus.softc::<Pinned>(id).is_some());
        let dev = bus.device(id).unwrap();
        assert_eq!(dev.nameunit().as_ref(), "pin0");
        assert_eq!(dev.desc(), Some("pinned"));

        // Unit 0 is still taken.
        let (_, outcome) = bus.offer(Device::new("v"));
        assert_eq!(
            outcome,
            ProbeOutcome::Attached {
                class: "pin",
                unit: 1
            }
        );
        assert_eq!(
            bus.detach_all(),
            Err(BusError::Detach(DriverDetachError::Dma(
                busdma::DmaError::TagBusy
            )))
        );
    }
}
