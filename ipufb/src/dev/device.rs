use super::handle::{Handle, HandleRef};
use alloc::{boxed::Box, format, vec, vec::Vec};
use core::ops::Range;
use dt::{DeviceTree, Node, PropertyError};
use spin::RwLock;

/// A platform device described by one device tree node.
///
/// The description and the unit name are written by the bus while it probes and attaches the
/// device; everything else is fixed when the device is created.
#[derive(Debug)]
pub struct Device {
    /// Node name including the unit address, e.g. `ipu@2400000`.
    pub name: Box<str>,
    /// Full path of the node.
    pub path: Box<str>,
    /// Raw `status` property, if any.
    pub status: Option<Box<str>>,
    pub compatible: Vec<Box<str>>,
    pub reg: Vec<Range<usize>>,
    pub parent: Option<HandleRef<Device>>,
    desc: RwLock<Option<&'static str>>,
    nameunit: RwLock<Option<Box<str>>>,
}

impl Device {
    /// A device with no properties.
    pub fn new(name: &str) -> Device {
        Device {
            name: Box::from(name),
            path: format!("/{}", name).into_boxed_str(),
            status: None,
            compatible: vec![],
            reg: vec![],
            parent: None,
            desc: RwLock::new(None),
            nameunit: RwLock::new(None),
        }
    }

    pub fn with_status(mut self, status: &str) -> Device {
        self.status = Some(Box::from(status));
        self
    }

    pub fn with_compatible(mut self, compatible: &[&str]) -> Device {
        self.compatible = compatible.iter().map(|comp| Box::from(*comp)).collect();
        self
    }

    pub fn with_reg(mut self, reg: Range<usize>) -> Device {
        self.reg.push(reg);
        self
    }

    /// Build a device from `node`.
    ///
    /// A missing `compatible` or `reg` property leaves the list empty; malformed ones are errors.
    pub fn from_node(
        tree: &DeviceTree,
        node: &Node,
        parent: Option<HandleRef<Device>>,
    ) -> Result<Device, PropertyError> {
        let status = match tree.get_property(node, "status") {
            Some(prop) => Some(Box::from(prop.value_as_str()?)),
            None => None,
        };
        let compatible = match tree.get_property(node, "compatible") {
            Some(prop) => prop
                .value_as_strlist()?
                .into_iter()
                .map(Box::from)
                .collect(),
            None => vec![],
        };
        let reg = match tree.get_reg_value(node) {
            Ok(reg) => reg,
            Err(PropertyError::PropNotFound) => vec![],
            Err(err) => return Err(err),
        };
        Ok(Device {
            name: node.full_name.clone(),
            path: tree.get_full_path(node),
            status,
            compatible,
            reg,
            parent,
            desc: RwLock::new(None),
            nameunit: RwLock::new(None),
        })
    }

    /// Whether the node is enabled: `status` is absent, `"okay"` or `"ok"`.
    pub fn status_okay(&self) -> bool {
        matches!(self.status.as_deref(), None | Some("okay") | Some("ok"))
    }

    pub fn is_compatible(&self, comp: &str) -> bool {
        self.compatible.iter().any(|c| c.as_ref() == comp)
    }

    pub fn parent(&self) -> Option<Handle<Device>> {
        self.parent.as_ref()?.get_handle()
    }

    pub fn desc(&self) -> Option<&'static str> {
        *self.desc.read()
    }

    pub fn set_desc(&self, desc: Option<&'static str>) {
        *self.desc.write() = desc;
    }

    /// Driver class plus unit number while a driver is bound, e.g. `fb0`, else the node name.
    pub fn nameunit(&self) -> Box<str> {
        match self.nameunit.read().as_ref() {
            Some(unit) => unit.clone(),
            None => self.name.clone(),
        }
    }

    pub(super) fn set_nameunit(&self, nameunit: Option<Box<str>>) {
        *self.nameunit.write() = nameunit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dt::Property;

    #[test]
    fn status_follows_device_tree_convention() {
        assert!(Device::new("a").status_okay());
        assert!(Device::new("a").with_status("okay").status_okay());
        assert!(Device::new("a").with_status("ok").status_okay());
        assert!(!Device::new("a").with_status("disabled").status_okay());
        assert!(!Device::new("a").with_status("fail").status_okay());
    }

    #[test]
    fn built_from_node() {
        let mut tree = DeviceTree::new();
        let soc = tree.add_node(
            0,
            "soc",
            vec![
                Property::with_strlist("compatible", &["simple-bus"]),
                Property::with_cells("#address-cells", &[1]),
                Property::with_cells("#size-cells", &[1]),
            ],
        );
        let ipu = tree.add_node(
            soc,
            "ipu@2400000",
            vec![
                Property::with_strlist("compatible", &["fsl,imx6q-ipu", "fsl,ipu3"]),
                Property::with_cells("reg", &[0x0240_0000, 0x40_0000]),
                Property::with_str("status", "disabled"),
            ],
        );
        let parent = Handle::from(Device::from_node(&tree, &tree.container[soc], None).unwrap());
        let dev =
            Device::from_node(&tree, &tree.container[ipu], Some(parent.create_ref())).unwrap();
        assert_eq!(dev.name.as_ref(), "ipu@2400000");
        assert_eq!(dev.path.as_ref(), "/soc/ipu@2400000");
        assert!(dev.is_compatible("fsl,ipu3"));
        assert!(!dev.is_compatible("simple-bus"));
        assert!(!dev.status_okay());
        assert_eq!(dev.reg, [0x0240_0000..0x0280_0000]);
        assert!(dev.parent().unwrap().ptr_eq(&parent));
        assert!(parent.reg.is_empty());
    }

    #[test]
    fn malformed_properties_are_errors() {
        let mut tree = DeviceTree::new();
        let id = tree.add_node(
            0,
            "bad",
            vec![Property::new("status", b"\xff\xfe\0".to_vec())],
        );
        assert_eq!(
            Device::from_node(&tree, &tree.container[id], None).map(|_| ()),
            Err(PropertyError::InvalidPropFormat)
        );
    }

    #[test]
    fn nameunit_falls_back_to_node_name() {
        let dev = Device::new("ipu@2400000");
        assert_eq!(dev.nameunit().as_ref(), "ipu@2400000");
        dev.set_nameunit(Some(Box::from("fb0")));
        assert_eq!(dev.nameunit().as_ref(), "fb0");
    }
}
