use core::fmt::{Display, Formatter};

/// Errors of the bus DMA layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// The platform has no DMA-capable bus.
    NoDmaBus,
    /// The constraints are malformed on their own.
    InvalidConstraints { reason: &'static str },
    /// The platform cannot provide memory that satisfies the constraints.
    Unsatisfiable,
    /// No contiguous region satisfying the tag is currently available.
    NoMemory,
    /// A non-blocking allocation found the allocator busy.
    WouldBlock,
    /// Coherent memory was requested from a non-coherent platform.
    CoherencyUnavailable,
    /// The tag still has buffers or child tags.
    TagBusy,
    /// The buffer was allocated against a different tag.
    ForeignBuffer,
    /// A memory range or region does not fit the pool.
    InvalidRegion,
}

impl Display for DmaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            DmaError::NoDmaBus => f.write_str("no DMA-capable bus"),
            DmaError::InvalidConstraints { reason } => {
                write!(f, "invalid DMA constraints: {}", reason)
            }
            DmaError::Unsatisfiable => f.write_str("DMA constraints cannot be satisfied"),
            DmaError::NoMemory => f.write_str("no contiguous DMA memory available"),
            DmaError::WouldBlock => f.write_str("DMA allocator busy"),
            DmaError::CoherencyUnavailable => f.write_str("coherent DMA memory unavailable"),
            DmaError::TagBusy => f.write_str("DMA tag still in use"),
            DmaError::ForeignBuffer => f.write_str("buffer belongs to another DMA tag"),
            DmaError::InvalidRegion => f.write_str("invalid DMA memory region"),
        }
    }
}
