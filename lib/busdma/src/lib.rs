//! Bus DMA resource management.
//!
//! A [DmaTag] describes the constraints (alignment, boundary, address window, segment limits)
//! under which a device may receive DMA memory. Tags form a hierarchy rooted at the bus tag of a
//! [DmaPlatform]; a child tag never relaxes its parent's constraints.
//!
//! Buffers are allocated against a tag and keep the tag's state alive:
//! - a [CoherentBuffer] returns its memory to the platform when released or dropped;
//! - a tag with outstanding buffers or child tags refuses [DmaTag::destroy].
//!
//! [LinearDmaPool] is a [DmaPlatform] over a linearly mapped memory range.
#![cfg_attr(not(test), no_std)]
extern crate alloc;

mod buffer;
mod error;
mod platform;
mod pool;
mod tag;

pub use buffer::CoherentBuffer;
pub use error::DmaError;
pub use platform::{AllocFlags, AllocRequest, DmaPlatform, DmaRegion};
pub use pool::{LinearDmaPool, PageNum, PoolStats};
pub use tag::{DmaConstraints, DmaTag, TagFlags};

/// Address as seen by a bus master.
pub type BusAddr = u64;

/// Granule of the DMA allocator.
pub const PAGE_SIZE: usize = 4096;

/// Highest address reachable by a 32-bit DMA engine.
pub const BUS_SPACE_MAXADDR_32BIT: BusAddr = 0xffff_ffff;

/// Highest address of the bus space.
pub const BUS_SPACE_MAXADDR: BusAddr = BusAddr::MAX;

/// No limit on transfer or segment size.
pub const BUS_SPACE_MAXSIZE: usize = usize::MAX;

/// No limit on the number of segments.
pub const BUS_SPACE_UNRESTRICTED: usize = usize::MAX;
