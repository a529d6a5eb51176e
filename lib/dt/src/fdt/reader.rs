use core::{mem::swap, str};

use crate::{
    fdt::{FdtHeader, FdtNodeType},
    node::{DeviceTree, Node},
    prop::Property,
};
use alloc::{vec, vec::Vec};
use utils::{
    endian::{BigEndian32, EndianData},
    num::AlignableTo,
};

/// Parser for a flattened device tree blob.
///
/// All reads are bounds-checked against the blob; a malformed blob yields an [FdtError]
/// rather than reading past its end.
pub struct FdtReader<'a> {
    blob: &'a [u8],
    cursor: usize,
    nodes: Vec<Node>,
}

/// Basic Reader Functions
impl<'a> FdtReader<'a> {
    /// Read a 32-bit big-endian word at the cursor without advancing it.
    #[inline(always)]
    fn peek_u32(&self) -> Result<u32, FdtError> {
        let raw = self
            .blob
            .get(self.cursor..self.cursor + 4)
            .ok_or(FdtError::Truncated {
                offset: self.cursor,
            })?;
        Ok(BigEndian32::from_bytes([raw[0], raw[1], raw[2], raw[3]]).value())
    }

    /// Advance the cursor by 4 bytes.
    #[inline(always)]
    fn advance(&mut self) {
        self.cursor += 4;
    }

    /// Advance the cursor by specific bytes and align it to 4 bytes.
    #[inline(always)]
    fn advance_bytes_aligned(&mut self, step: usize) {
        self.cursor = (self.cursor + step).align_up(4);
    }

    /// Read a 32-bit big-endian word and advance the cursor by 4 bytes.
    #[inline(always)]
    fn read_u32(&mut self) -> Result<u32, FdtError> {
        let res = self.peek_u32()?;
        self.advance();
        Ok(res)
    }

    /// Read `len` bytes at the cursor and advance to the next 4-byte aligned position.
    #[inline(always)]
    fn readbytes_aligned(&mut self, len: usize) -> Result<&'a [u8], FdtError> {
        let res = self
            .blob
            .get(self.cursor..self.cursor + len)
            .ok_or(FdtError::Truncated {
                offset: self.cursor,
            })?;
        self.advance_bytes_aligned(len);
        Ok(res)
    }

    /// Advance past zero words and NOPs to the next meaningful token.
    #[inline(always)]
    fn skip(&mut self) -> Result<(), FdtError> {
        let mut p = self.peek_u32()?;
        while p == 0 || p == FdtNodeType::FDT_NOP.bits() {
            self.advance();
            p = self.peek_u32()?;
        }
        Ok(())
    }

    /// Read a NUL-terminated string starting at `offset` of the blob.
    fn str_at(&self, offset: usize) -> Result<&'a str, FdtError> {
        let tail = self.blob.get(offset..).ok_or(FdtError::Truncated { offset })?;
        let len = tail
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(FdtError::Truncated { offset })?;
        str::from_utf8(&tail[..len]).map_err(|_| FdtError::InvalidString { offset })
    }

    /// Read a NUL-terminated string at the cursor and advance to the next aligned position.
    #[inline(always)]
    fn readstr_aligned(&mut self) -> Result<&'a str, FdtError> {
        let res = self.str_at(self.cursor)?;
        self.advance_bytes_aligned(res.len() + 1);
        Ok(res)
    }

    /// Read a tag word and verify it equals `supposed`.
    fn read_and_check(&mut self, supposed: FdtNodeType) -> Result<(), FdtError> {
        let node_type = self.read_u32()?;
        if node_type != supposed.bits() {
            return Err(FdtError::InvalidNodeType {
                node_type: node_type as usize,
                cursor: self.cursor,
            });
        }
        Ok(())
    }
}

impl<'a> FdtReader<'a> {
    /// Expected FDT magic number (0xd00dfeed).
    pub const FDT_MAGIC: u32 = 0xd00dfeed;
    /// The FDT version this parser targets.
    pub const FDT_VERSION: usize = 17;
    /// The last compatible FDT version accepted by this parser.
    pub const LAST_COMP_VERSION: usize = 16;

    /// Create a reader over an FDT blob.
    ///
    /// This does not validate the blob; [FdtReader::read] validates before parsing.
    #[inline(always)]
    pub fn new(blob: &'a [u8]) -> FdtReader<'a> {
        FdtReader {
            blob,
            cursor: 0,
            nodes: vec![],
        }
    }

    /// Decode the FDT header.
    pub fn get_header(&self) -> Result<FdtHeader, FdtError> {
        FdtHeader::parse(self.blob).ok_or(FdtError::Truncated { offset: 0 })
    }

    /// Validate the FDT header (magic number, compatible version range and size).
    pub fn validate(&self) -> Result<(), FdtError> {
        let header = self.get_header()?;
        let magic = header.magic.value();

        // 1. Check the magic number
        if magic != Self::FDT_MAGIC {
            return Err(FdtError::InvalidMagic {
                magic: magic as usize,
            });
        }

        // 2. Check the fdt version. We use version 17, and the last compatible version is 16
        let version = header.version.value();
        if version < Self::LAST_COMP_VERSION as u32
            || header.last_comp_version.value() > Self::FDT_VERSION as u32
        {
            return Err(FdtError::IncompatibleVersion {
                version: version as usize,
            });
        }

        // 3. The blob must hold everything the header claims
        let totalsize = header.totalsize.value() as usize;
        if totalsize > self.blob.len() {
            return Err(FdtError::Truncated {
                offset: self.blob.len(),
            });
        }
        Ok(())
    }

    /// Read a null-terminated string from the FDT string table at `offset`.
    pub fn get_string(&self, offset: usize) -> Result<&'a str, FdtError> {
        let base = self.get_header()?.off_dt_strings.value() as usize;
        self.str_at(base + offset)
    }

    /// Read consecutive property entries from the structure block and return them.
    ///
    /// Stops when a non-`FDT_PROP` tag is encountered and returns the collected props.
    fn read_props(&mut self) -> Result<Vec<Property>, FdtError> {
        let mut res = Vec::<Property>::new();
        loop {
            self.skip()?;
            if self.peek_u32()? != FdtNodeType::FDT_PROP.bits() {
                break Ok(res);
            }
            self.read_u32()?;
            let len = self.read_u32()? as usize;
            let name_offset = self.read_u32()? as usize;
            let name = self.get_string(name_offset)?;
            let data = self.readbytes_aligned(len)?;
            res.push(Property::new(name, data));
        }
    }

    /// Parse a single node (name, properties and child nodes) from the structure block without
    /// setting its parent.
    ///
    /// Recursively parses subnodes until the matching `FDT_END_NODE` is found.
    fn read_node(&mut self) -> Result<usize, FdtError> {
        self.skip()?;
        self.read_and_check(FdtNodeType::FDT_BEGIN_NODE)?;
        let full_name = self.readstr_aligned()?;
        let props = self.read_props()?;
        let mut children = vec![];
        loop {
            self.skip()?;
            let nodetype = self.peek_u32()?;
            if nodetype == FdtNodeType::FDT_BEGIN_NODE.bits() {
                children.push(self.read_node()?);
            } else if nodetype == FdtNodeType::FDT_END_NODE.bits() {
                self.advance();
                break;
            } else {
                return Err(FdtError::InvalidNodeType {
                    node_type: nodetype as usize,
                    cursor: self.cursor,
                });
            }
        }
        let id = self.nodes.len();
        let mut node = Node::new(id, 0, full_name, props);
        node.children = children;
        self.nodes.push(node);
        Ok(id)
    }

    fn set_parent(&mut self, node_id: usize) {
        for child_idx in 0..self.nodes[node_id].children.len() {
            let sub_id = self.nodes[node_id].children[child_idx];
            self.nodes[sub_id].parent_id = node_id;
            self.set_parent(sub_id);
        }
    }

    fn read_internal(&mut self) -> Result<DeviceTree, FdtError> {
        self.validate()?;
        self.cursor = self.get_header()?.off_dt_struct.value() as usize;
        let root_id = self.read_node()?;
        self.set_parent(root_id);
        self.nodes[root_id].parent_id = root_id;
        self.skip()?;
        self.read_and_check(FdtNodeType::FDT_END)?;

        let mut tree = DeviceTree {
            root_id,
            container: vec![],
        };
        swap(&mut self.nodes, &mut tree.container);
        tree.mark_description_nodes();
        Ok(tree)
    }

    /// Parse the entire blob into a [DeviceTree].
    ///
    /// All strings and byte-array data are **copied**, so the blob can be dropped afterwards.
    pub fn read(&mut self) -> Result<DeviceTree, FdtError> {
        match self.read_internal() {
            Ok(res) => Ok(res),
            Err(err) => {
                self.cursor = 0;
                self.nodes.clear();
                Err(err)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdtError {
    InvalidNodeType { node_type: usize, cursor: usize },
    InvalidMagic { magic: usize },
    IncompatibleVersion { version: usize },
    Truncated { offset: usize },
    InvalidString { offset: usize },
}
