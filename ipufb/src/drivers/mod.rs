//! Drivers shipped with the crate.

use crate::dev::RegistryBuilder;
use log::warn;

pub mod fb;

/// Register every driver of the crate with `builder`.
pub fn register_drivers(builder: &mut RegistryBuilder) {
    for entry in [fb::DRIVER_ENTRY] {
        if let Err(err) = builder.register(entry) {
            warn!("Driver '{}' not registered: {:?}", entry.class, err);
        }
    }
}
