//! Identity check of IPUv3 nodes.

use crate::dev::{Device, DriverProbeError, ProbeMatch, ProbePriority};

/// Compatible strings of the IPUv3.
pub const FB_COMPAT: &[&str] = &["fsl,ipu3", "fsl,imx6q-ipu"];

pub const FB_DESC: &str = "i.MX5x Image Processing Unit v3 (FB)";

/// Decide whether `dev` is an enabled IPUv3.
///
/// The status is checked first, so a disabled node is rejected whatever its compatible list.
pub fn resolve(dev: &Device) -> Result<ProbeMatch, DriverProbeError> {
    if !dev.status_okay() {
        return Err(DriverProbeError::Disabled);
    }
    if !FB_COMPAT.iter().any(|comp| dev.is_compatible(comp)) {
        return Err(DriverProbeError::NotCompatible);
    }
    Ok(ProbeMatch {
        priority: ProbePriority::Default,
        desc: FB_DESC,
    })
}
