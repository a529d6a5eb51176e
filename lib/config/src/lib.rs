//! Build-time configuration for the framebuffer driver.
//! The constants are generated by `build.rs` from `flags.json` at the workspace root.

#![no_std]
#![deny(missing_docs)]

/// Generated flags.
pub mod build_flags {
    include!(concat!(env!("OUT_DIR"), "/build_flags.rs"));
}

pub use build_flags::*;

