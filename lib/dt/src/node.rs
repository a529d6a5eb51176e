use crate::prop::{Property, PropertyError};
use alloc::{boxed::Box, string::String, vec, vec::Vec};
use core::ops::Range;
use utils::endian::{BigEndian32, EndianData};

/// An unflattened device tree. Nodes live in `container` and refer to each other by index.
///
/// The root node is its own parent.
#[derive(Debug)]
pub struct DeviceTree {
    pub root_id: usize,
    pub container: Vec<Node>,
}

#[derive(Debug)]
pub struct Node {
    pub node_id: usize,
    pub parent_id: usize,
    pub full_name: Box<str>,
    pub node_name: Box<str>,
    pub unit_addr: Box<str>,
    pub children: Vec<usize>,
    pub props: Vec<Property>,
    pub node_type: NodeType,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum NodeType {
    Device,
    Description,
}

impl Node {
    /// Create a detached node, splitting `name@unit-address`.
    pub fn new(node_id: usize, parent_id: usize, full_name: &str, props: Vec<Property>) -> Node {
        let (node_name, unit_addr) = full_name.split_once('@').unwrap_or((full_name, ""));
        Node {
            node_id,
            parent_id,
            full_name: Box::from(full_name),
            node_name: Box::from(node_name),
            unit_addr: Box::from(unit_addr),
            children: vec![],
            props,
            node_type: NodeType::Device,
        }
    }
}

/// Construction
impl DeviceTree {
    /// Create a tree that only holds an empty root node.
    pub fn new() -> DeviceTree {
        DeviceTree {
            root_id: 0,
            container: vec![Node::new(0, 0, "", vec![])],
        }
    }

    /// Append a node under `parent_id` and return its id.
    pub fn add_node(&mut self, parent_id: usize, full_name: &str, props: Vec<Property>) -> usize {
        let id = self.container.len();
        self.container.push(Node::new(id, parent_id, full_name, props));
        self.container[parent_id].children.push(id);
        id
    }

    /// Append properties to an existing node.
    pub fn add_props(&mut self, node_id: usize, props: impl IntoIterator<Item = Property>) {
        self.container[node_id].props.extend(props);
    }

    /// Mark well-known nodes that describe the machine rather than a device.
    pub fn mark_description_nodes(&mut self) {
        for path in ["/aliases", "/reserved-memory", "/chosen"] {
            if let Some(node) = self.get_node_mut(path) {
                node.node_type = NodeType::Description;
            }
        }
        self.get_nodes_mut("/memory", |node| {
            node.node_type = NodeType::Description;
        });
    }
}

impl Default for DeviceTree {
    fn default() -> Self {
        DeviceTree::new()
    }
}

/// Lookup
impl DeviceTree {
    pub fn is_root(&self, node: &Node) -> bool {
        self.get_parent(node).node_id == node.node_id
    }
    fn full_path(&self, node: &Node) -> String {
        if self.is_root(node) {
            String::from("")
        } else {
            self.full_path(self.get_parent(node)) + "/" + node.full_name.as_ref()
        }
    }
    pub fn get_full_path(&self, node: &Node) -> Box<str> {
        if self.is_root(node) {
            return Box::from("/");
        }
        self.full_path(node).into_boxed_str()
    }
    pub fn get_root(&self) -> &Node {
        &self.container[self.root_id]
    }
    pub fn get_parent(&self, node: &Node) -> &Node {
        &self.container[node.parent_id]
    }
    pub fn get_children<'b>(&'b self, node: &Node) -> impl Iterator<Item = &'b Node> {
        node.children.iter().map(|x| &self.container[*x])
    }
    pub fn get_property<'b>(&self, node: &'b Node, name: impl AsRef<str>) -> Option<&'b Property> {
        let name = name.as_ref();
        node.props.iter().find(|prop| prop.name.as_ref() == name)
    }

    /// Whether the node's `compatible` list contains `comp`.
    pub fn is_compatible(&self, node: &Node, comp: &str) -> bool {
        self.get_property(node, "compatible")
            .and_then(|prop| prop.value_as_strlist().ok())
            .is_some_and(|list| list.contains(&comp))
    }

    fn find_node_id(&self, path: &str) -> Option<usize> {
        let mut node = &self.container[self.root_id];
        for section in path.split('/') {
            if section.trim().is_empty() {
                continue;
            }
            node = self
                .get_children(node)
                .find(|subnode| subnode.full_name.as_ref() == section)?;
        }
        Some(node.node_id)
    }
    pub fn get_node(&self, path: impl AsRef<str>) -> Option<&Node> {
        let id = self.find_node_id(path.as_ref())?;
        Some(&self.container[id])
    }
    pub fn get_node_mut(&mut self, path: impl AsRef<str>) -> Option<&mut Node> {
        let id = self.find_node_id(path.as_ref())?;
        Some(&mut self.container[id])
    }

    /// Collect nodes matching a path. A section matches a node by full name, by name without
    /// unit address, or by `*`.
    pub fn get_nodes(&self, path: impl AsRef<str>) -> Vec<&Node> {
        let path: Vec<&str> = path.as_ref().split('/').collect();
        self.get_sub_nodes(self.get_root(), &path, 0)
    }
    pub fn get_nodes_mut<F: Fn(&mut Node)>(&mut self, path: impl AsRef<str>, f: F) {
        let ids: Vec<usize> = self.get_nodes(path).iter().map(|x| x.node_id).collect();
        for id in ids {
            f(&mut self.container[id]);
        }
    }
    fn get_sub_nodes<'b>(&'b self, node: &'b Node, path: &[&str], mut cursor: usize) -> Vec<&'b Node> {
        while cursor < path.len() && path[cursor].trim().is_empty() {
            cursor += 1;
        }
        if cursor >= path.len() {
            return vec![node];
        }
        let sec = path[cursor];
        self.get_children(node)
            .flat_map(|child| {
                if sec == "*" || child.full_name.as_ref() == sec || child.node_name.as_ref() == sec {
                    self.get_sub_nodes(child, path, cursor + 1)
                } else {
                    vec![]
                }
            })
            .collect()
    }

    /// Decode `reg` into address ranges using the parent's `#address-cells` and `#size-cells`.
    pub fn get_reg_value(&self, node: &Node) -> Result<Vec<Range<usize>>, PropertyError> {
        let (addr_cells, size_cells) = self.cell_widths(node)?;
        let cells = self
            .get_property(node, "reg")
            .ok_or(PropertyError::PropNotFound)?
            .value_as_cells()?;
        let width = addr_cells + size_cells;
        if width == 0 || cells.len() % width != 0 {
            return Err(PropertyError::InvalidPropFormat);
        }
        let join = |cells: &[BigEndian32]| {
            cells
                .iter()
                .fold(0u64, |acc, cell| (acc << 32) | cell.value() as u64) as usize
        };
        cells
            .chunks_exact(width)
            .map(|entry| {
                let (addr, size) = entry.split_at(addr_cells);
                let start = join(addr);
                start
                    .checked_add(join(size))
                    .map(|end| start..end)
                    .ok_or(PropertyError::InvalidPropFormat)
            })
            .collect()
    }

    /// `(#address-cells, #size-cells)` governing `node`'s `reg`; `(2, 1)` when unset.
    fn cell_widths(&self, node: &Node) -> Result<(usize, usize), PropertyError> {
        if self.is_root(node) {
            return Ok((2, 1));
        }
        let parent = self.get_parent(node);
        let width = |name: &str, default: usize| match self.get_property(parent, name) {
            Some(prop) => prop.value_as_u32().map(|v| v as usize),
            None => Ok(default),
        };
        Ok((width("#address-cells", 2)?, width("#size-cells", 1)?))
    }
}
