// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! STM32WL Secure Boot Common Library
//!
//! This crate provides the error type, boot-time logging, configuration
//! structures and the flash region map shared by the secure boot, HAL and
//! key management crates.
//!
//! # Features
//!
//! - `std`: Enable standard library support (disabled by default for embedded)
//! - `defmt`: Enable defmt formatting of errors for embedded debugging
//!
//! # Memory Map
//!
//! Region boundaries that the vendor toolchain expresses as linker symbols
//! are described here as `const` [`RegionMap`] presets, validated once at
//! integration time with [`RegionMap::validate`].

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(feature = "std")]
extern crate std;

pub mod errors;
pub mod config;
pub mod log;
pub mod constants;
pub mod regions;

// Re-export commonly used items
pub use errors::{Error, Result};
pub use config::{BootConfig, FlashGeometry, Protection, ProtectionSet, SlotConfig};
pub use regions::{FlashRegion, MemorySpace, MemoryWindow, RegionKind, RegionMap};
