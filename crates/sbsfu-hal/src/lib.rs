// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Hardware Abstraction Layer for the STM32WL secure boot components
//!
//! The HAL is structured in layers:
//!
//! 1. **Traits**: flash program/erase and boot protection interfaces (`traits`)
//! 2. **Drivers**: STM32WL register-level implementations (`stm32wl`, feature `stm32wl`)
//! 3. **Simulation**: RAM-backed implementations for host tests (`sim`)
//!
//! # Flash access protocol
//!
//! The flash controller is a single shared resource. Callers unlock it before
//! a program or erase sequence and lock it again afterwards; drivers reject
//! program/erase requests while locked.

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod traits;
pub mod error;
pub mod sim;

#[cfg(feature = "stm32wl")]
pub mod stm32wl;

// Re-export main traits
pub use traits::*;
pub use error::{HalError, HalResult};
