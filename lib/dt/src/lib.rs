//! Device tree model: an unflattened node tree, typed property accessors and a reader for
//! flattened device tree blobs.
#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod fdt;
pub mod node;
pub mod prop;

pub use node::{DeviceTree, Node, NodeType};
pub use prop::{Property, PropertyError};
