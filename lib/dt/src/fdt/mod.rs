//! Flattened device tree (DTB) blob layout.

use bitflags::bitflags;
use utils::endian::BigEndian32;

pub mod reader;

fn be32_at(raw: &[u8], at: usize) -> Option<BigEndian32> {
    let bytes: [u8; 4] = raw.get(at..at + 4)?.try_into().ok()?;
    Some(BigEndian32::from_bytes(bytes))
}

/// Blob header, fields in on-disk order.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FdtHeader {
    pub magic: BigEndian32,
    pub totalsize: BigEndian32,
    pub off_dt_struct: BigEndian32,
    pub off_dt_strings: BigEndian32,
    pub off_mem_rsvmap: BigEndian32,
    pub version: BigEndian32,
    pub last_comp_version: BigEndian32,
    pub boot_cpuid_phys: BigEndian32,
    pub size_dt_strings: BigEndian32,
    pub size_dt_struct: BigEndian32,
}

impl FdtHeader {
    pub const SIZE: usize = 40;

    /// [None] if `blob` is shorter than [FdtHeader::SIZE].
    pub fn parse(blob: &[u8]) -> Option<FdtHeader> {
        let mut words = [BigEndian32::from_bytes([0; 4]); 10];
        for (idx, word) in words.iter_mut().enumerate() {
            *word = be32_at(blob, idx * 4)?;
        }
        let [
            magic,
            totalsize,
            off_dt_struct,
            off_dt_strings,
            off_mem_rsvmap,
            version,
            last_comp_version,
            boot_cpuid_phys,
            size_dt_strings,
            size_dt_struct,
        ] = words;
        Some(FdtHeader {
            magic,
            totalsize,
            off_dt_struct,
            off_dt_strings,
            off_mem_rsvmap,
            version,
            last_comp_version,
            boot_cpuid_phys,
            size_dt_strings,
            size_dt_struct,
        })
    }
}

bitflags! {
    /// Tokens of the structure block.
    pub struct FdtNodeType: u32 {
        const FDT_BEGIN_NODE = 0x01;
        const FDT_END_NODE = 0x02;
        /// Followed by length, name offset and data.
        const FDT_PROP = 0x03;
        const FDT_NOP = 0x04;
        const FDT_END = 0x09;
    }
}
