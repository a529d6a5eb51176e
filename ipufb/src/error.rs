//! Error types of the driver and their printable form.

use crate::dev::{DriverAttachError, DriverDetachError, DriverProbeError};
use busdma::DmaError;
use core::fmt::{Debug, Display, Formatter, Write};

/// An error that can be printed to a string device
pub trait MessageError: Debug {
    /// Print the error message to a writer
    fn print_to_writer(&self, f: &mut dyn Write) {
        if let Err(err) = f.write_fmt(format_args!("{:?}", self)) {
            let _ = f.write_fmt(format_args!("Error on printing error message: {:?}", err));
        }
    }
}

impl Display for dyn MessageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        self.print_to_writer(f);
        Ok(())
    }
}

impl MessageError for DmaError {}
impl MessageError for DriverProbeError {}
impl MessageError for DriverAttachError {}
impl MessageError for DriverDetachError {}

/// Failures of the framebuffer driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FbError {
    /// The node is disabled or none of its compatible strings is supported.
    DeviceNotCompatible,
    /// The DMA tag could not be created; nothing was allocated.
    DmaTagCreationFailed(DmaError),
    /// The framebuffer could not be allocated; the DMA tag was released again.
    AllocationFailed(DmaError),
}

impl MessageError for FbError {}

impl Display for FbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            FbError::DeviceNotCompatible => f.write_str("device not compatible"),
            FbError::DmaTagCreationFailed(err) => write!(f, "cannot create dma tag: {}", err),
            FbError::AllocationFailed(err) => write!(f, "cannot allocate framebuffer: {}", err),
        }
    }
}

impl From<DriverProbeError> for FbError {
    fn from(_: DriverProbeError) -> Self {
        FbError::DeviceNotCompatible
    }
}

impl From<FbError> for DriverAttachError {
    fn from(err: FbError) -> Self {
        match err {
            FbError::DeviceNotCompatible => DriverAttachError::Customized {
                info: "device not compatible",
            },
            FbError::DmaTagCreationFailed(err) => DriverAttachError::DmaTagCreationFailed(err),
            FbError::AllocationFailed(err) => DriverAttachError::AllocationFailed(err),
        }
    }
}
