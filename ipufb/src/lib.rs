//! DMA-backed framebuffer driver for the i.MX5x/i.MX6 Image Processing Unit v3.
//!
//! The crate holds the pieces a kernel links in to bind the IPUv3 framebuffer:
//! - [dev]: platform devices built from the device tree, the driver registry and the
//!   [dev::PlatformBus] that probes, attaches and detaches drivers;
//! - [drivers::fb]: the framebuffer driver itself, which owns one coherent DMA buffer per
//!   bound device;
//! - [report] and [logging]: diagnostics.
#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod dev;
pub mod drivers;
pub mod error;
pub mod logging;
pub mod report;
