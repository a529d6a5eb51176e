//! Small helpers shared by the driver crates: alignment arithmetic,
//! big-endian cells and newtype wrapper macros.
#![cfg_attr(not(test), no_std)]

pub mod endian;
pub mod macros;
pub mod num;
